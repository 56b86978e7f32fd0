use super::routing::{Router, RoutingPolicy};
use super::single::SingleShell;
use super::ShellError;
use crate::app::config::ShellProperties;
use crate::domain::{EventRecord, now_millis};
use crate::sender::SensorTransport;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

/// Spreads records over several single shells so their timers post in
/// parallel. Nothing is persisted in this mode.
pub struct MultiShell<T: SensorTransport> {
    shells: Vec<SingleShell<T>>,
    router: Router,
    properties: ShellProperties,
}

impl<T: SensorTransport> MultiShell<T> {
    pub async fn start(properties: ShellProperties, transport: Arc<T>) -> Result<Self, ShellError> {
        let count = properties.multishell_num_shells.max(1);
        let constituent = properties.constituent();

        let started = join_all(
            (0..count).map(|_| SingleShell::start(constituent.clone(), transport.clone())),
        )
        .await;
        let shells = started.into_iter().collect::<Result<Vec<_>, _>>()?;

        let router = Router::new(
            RoutingPolicy::from_batch_size(properties.multishell_batch_size),
            count,
        );
        if router.policy() == RoutingPolicy::Random {
            warn!("Multi-shell batch size is 0, routing records at random");
        }
        info!(
            shells = count,
            batch_size = properties.multishell_batch_size,
            "Multi-shell started"
        );

        Ok(Self {
            shells,
            router,
            properties,
        })
    }

    pub fn properties(&self) -> &ShellProperties {
        &self.properties
    }

    pub fn shells(&self) -> &[SingleShell<T>] {
        &self.shells
    }

    pub async fn add<I, K, V>(&self, pairs: I) -> Result<(), ShellError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let record = EventRecord::from_description(pairs, now_millis())?;
        self.add_record(record).await
    }

    pub async fn add_record(&self, record: EventRecord) -> Result<(), ShellError> {
        let shell = &self.shells[self.router.next()];
        shell.add_record(record).await
    }

    /// Sends every shell in turn and sums what was sent. Every shell is
    /// attempted even when an earlier one fails.
    pub async fn send(&self) -> Result<usize, ShellError> {
        let mut total = 0;
        let mut errors = Vec::new();
        for shell in &self.shells {
            match shell.send().await {
                Ok(sent) => total += sent,
                Err(e) => errors.push(e),
            }
        }
        match ShellError::aggregate(errors) {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }

    /// Quits every shell in turn; all failures are returned together.
    pub async fn quit(&self) -> Result<usize, ShellError> {
        let mut total = 0;
        let mut errors = Vec::new();
        for shell in &self.shells {
            match shell.quit().await {
                Ok(sent) => total += sent,
                Err(e) => errors.push(e),
            }
        }
        info!(sent = total, "Multi-shell stopped");
        match ShellError::aggregate(errors) {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }

    pub async fn ping(&self) -> bool {
        match self.shells.first() {
            Some(shell) => shell.ping().await,
            None => false,
        }
    }

    pub async fn queued_len(&self) -> usize {
        let mut total = 0;
        for shell in &self.shells {
            total += shell.queued_len().await;
        }
        total
    }
}
