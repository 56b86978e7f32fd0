use super::resolver::{PassthroughResolver, ProjectResolver};
use super::stats::{ClientStats, TransportStats};
use super::transmission::{PING_PATH, SENSORDATA_PATH, encode_record, endpoint, normalize_host};
use super::SensorTransport;
use crate::domain::{EventBatch, UnsentBatch};
use reqwest::{Client, ClientBuilder, RequestBuilder};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Server rejected request: HTTP {status}")]
    ServerRejected { status: u16 },
    #[error("Server unreachable: {0}")]
    Unreachable(String),
    #[error("Request timeout: {0}")]
    Timeout(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl TransportError {
    fn from_request(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            TransportError::Timeout(error.to_string())
        } else if error.is_connect() {
            TransportError::Unreachable(error.to_string())
        } else {
            TransportError::Network(error)
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub timeout: Duration,
    pub user: String,
    pub password: String,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:9876/sensorbase/".to_string(),
            timeout: Duration::from_secs(10),
            user: String::new(),
            password: String::new(),
            user_agent: format!("sensorshell/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// HTTP transport to the collection service. One instance per process,
/// shared by reference between shells and the offline store.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    config: ClientConfig,
    sensordata_url: Url,
    resolver: Arc<dyn ProjectResolver>,
    stats: Arc<ClientStats>,
}

impl HttpClient {
    pub fn new(config: ClientConfig) -> Result<Self, TransportError> {
        Self::with_resolver(config, Arc::new(PassthroughResolver))
    }

    pub fn with_resolver(
        config: ClientConfig,
        resolver: Arc<dyn ProjectResolver>,
    ) -> Result<Self, TransportError> {
        let host = normalize_host(&config.host)?;
        let sensordata_url = endpoint(&host, SENSORDATA_PATH)?;

        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                TransportError::InvalidConfiguration(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            config,
            sensordata_url,
            resolver,
            stats: Arc::new(ClientStats::new()),
        })
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn stats(&self) -> TransportStats {
        self.stats.snapshot()
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        if self.config.user.is_empty() {
            request
        } else {
            request.basic_auth(&self.config.user, Some(&self.config.password))
        }
    }

    async fn ping(&self, host: &str, timeout: Duration) -> Result<bool, TransportError> {
        let url = endpoint(&normalize_host(host)?, PING_PATH)?;
        let response = self
            .authorize(self.client.get(url))
            .timeout(timeout)
            .send()
            .await
            .map_err(TransportError::from_request)?;
        Ok(response.status().is_success())
    }

    async fn send_record(&self, url: Url) -> Result<(), TransportError> {
        let start = Instant::now();
        let result = self.authorize(self.client.get(url)).send().await;
        let latency = start.elapsed();

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.stats.record_request(false, latency);
                return Err(TransportError::from_request(e));
            }
        };

        let status = response.status();
        self.stats.record_request(status.is_success(), latency);
        if status.is_success() {
            Ok(())
        } else {
            Err(TransportError::ServerRejected {
                status: status.as_u16(),
            })
        }
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("host", &self.config.host)
            .field("timeout", &self.config.timeout)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl SensorTransport for HttpClient {
    async fn is_reachable(&self, host: &str, timeout: Duration) -> bool {
        let reachable = match self.ping(host, timeout).await {
            Ok(reachable) => reachable,
            Err(e) => {
                debug!(host, error = %e, "Ping failed");
                false
            }
        };
        self.stats.record_ping(reachable);
        reachable
    }

    async fn post_batch(&self, batch: &EventBatch) -> Result<UnsentBatch, TransportError> {
        let start = Instant::now();
        let mut unsent = UnsentBatch::new();
        let mut sent = 0usize;

        for record in batch {
            let project_id = if record.project_uri().is_empty() {
                None
            } else {
                match self.resolver.resolve(record.project_uri()) {
                    Some(id) => Some(id),
                    None => {
                        unsent.push(record.clone());
                        continue;
                    }
                }
            };

            let url = encode_record(&self.sensordata_url, record, project_id.as_deref());
            if let Err(e) = self.send_record(url).await {
                warn!(
                    batch_id = batch.id(),
                    sent,
                    records = batch.len(),
                    error = %e,
                    "Batch transmission failed"
                );
                return Err(e);
            }
            sent += 1;
        }

        if !unsent.is_empty() {
            info!(
                batch_id = batch.id(),
                unresolved = unsent.len(),
                "Records left unsent until their project is known"
            );
        }
        debug!(
            batch_id = batch.id(),
            sent,
            latency = ?start.elapsed(),
            "Sent sensor data batch"
        );

        Ok(unsent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_rejects_invalid_host() {
        let config = ClientConfig {
            host: "::nope::".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            HttpClient::new(config),
            Err(TransportError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_false_not_error() {
        let client = HttpClient::new(ClientConfig::default()).unwrap();
        // Port 9 (discard) on localhost is not served in test environments.
        let reachable = client
            .is_reachable("http://127.0.0.1:9/sensorbase/", Duration::from_millis(300))
            .await;
        assert!(!reachable);
        assert_eq!(client.stats().failed_pings, 1);
    }

    #[tokio::test]
    async fn test_invalid_probe_host_is_unreachable() {
        let client = HttpClient::new(ClientConfig::default()).unwrap();
        assert!(!client.is_reachable("garbage", Duration::from_millis(100)).await);
    }
}
