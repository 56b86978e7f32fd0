use super::ShellError;
use crate::app::config::ShellProperties;
use crate::domain::{EventBatch, EventRecord, now_millis};
use crate::reliability::{OfflineStore, RecoveryOutcome};
use crate::sender::SensorTransport;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellState {
    Created,
    Active,
    Quitting,
    Stopped,
}

struct ShellCore {
    state: ShellState,
    queue: EventBatch,
}

struct ShellInner<T: SensorTransport> {
    transport: Arc<T>,
    properties: ShellProperties,
    offline: Option<Arc<OfflineStore>>,
    core: Mutex<ShellCore>,
    background_error: parking_lot::Mutex<Option<ShellError>>,
}

struct AutosendTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// One in-memory queue flushed to the collector by size, by timer, or on
/// request. Every public operation locks the shell core, so calls on one
/// instance never interleave.
pub struct SingleShell<T: SensorTransport> {
    inner: Arc<ShellInner<T>>,
    autosend: parking_lot::Mutex<Option<AutosendTask>>,
}

impl<T: SensorTransport> SingleShell<T> {
    /// Opens the offline store, replays offline data when recovery is enabled
    /// and the server answers, then starts the auto-send timer.
    pub async fn start(properties: ShellProperties, transport: Arc<T>) -> Result<Self, ShellError> {
        let offline = if properties.offline_cache_enabled || properties.offline_recovery_enabled {
            match OfflineStore::open(properties.offline_config()).await {
                Ok(store) => Some(Arc::new(store)),
                Err(e) => {
                    warn!(
                        directory = %properties.offline_dir.display(),
                        "Offline store unavailable, continuing without it: {e}"
                    );
                    None
                }
            }
        } else {
            None
        };

        let inner = Arc::new(ShellInner {
            transport,
            properties,
            offline,
            core: Mutex::new(ShellCore {
                state: ShellState::Created,
                queue: EventBatch::new(),
            }),
            background_error: parking_lot::Mutex::new(None),
        });

        if inner.properties.offline_recovery_enabled
            && let Some(store) = &inner.offline
        {
            let outcome = store
                .recover(
                    inner.transport.as_ref(),
                    &inner.properties.host,
                    inner.properties.ping_timeout,
                )
                .await;
            debug!(outcome = ?outcome, "Startup offline recovery finished");
        }

        inner.core.lock().await.state = ShellState::Active;

        let autosend = spawn_autosend(&inner);
        let shell = Self {
            inner,
            autosend: parking_lot::Mutex::new(autosend),
        };
        info!(
            host = %shell.inner.properties.host,
            autosend_interval = ?shell.inner.properties.autosend_interval,
            max_buffer = shell.inner.properties.autosend_max_buffer,
            offline_cache = shell.offline_cache_enabled(),
            "Sensor shell started"
        );
        Ok(shell)
    }

    pub fn properties(&self) -> &ShellProperties {
        &self.inner.properties
    }

    pub fn offline_store(&self) -> Option<Arc<OfflineStore>> {
        self.inner.offline.clone()
    }

    fn offline_cache_enabled(&self) -> bool {
        self.inner.cache().is_some()
    }

    pub async fn state(&self) -> ShellState {
        self.inner.core.lock().await.state
    }

    pub async fn queued_len(&self) -> usize {
        self.inner.core.lock().await.queue.len()
    }

    /// Builds a record from an event description and queues it. A missing
    /// `Timestamp` is the current time; a missing `Runtime` is the timestamp.
    pub async fn add<I, K, V>(&self, pairs: I) -> Result<(), ShellError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let record = EventRecord::from_description(pairs, now_millis())?;
        self.add_record(record).await
    }

    /// Queues a record. Once the queue grows past the configured maximum the
    /// caller waits for a flush before this returns. Only a flush that lost
    /// data fails the call; other flush errors are reported by `quit`.
    pub async fn add_record(&self, record: EventRecord) -> Result<(), ShellError> {
        let mut core = self.inner.core.lock().await;
        if core.state != ShellState::Active {
            return Err(ShellError::Stopped);
        }
        core.queue.push(record);

        let max_buffer = self.inner.properties.autosend_max_buffer;
        if max_buffer != 0 && core.queue.len() > max_buffer {
            debug!(queued = core.queue.len(), max_buffer, "Buffer full, sending");
            match self.inner.send_locked(&mut core).await {
                Err(e) if e.is_data_loss() => return Err(e),
                Err(e) => {
                    warn!("Buffer flush failed, records kept for retry: {e}");
                    *self.inner.background_error.lock() = Some(e);
                }
                Ok(_) => {}
            }
        }
        Ok(())
    }

    /// Flushes the queue. Returns the number of records the server accepted;
    /// records diverted to the offline store count as zero.
    pub async fn send(&self) -> Result<usize, ShellError> {
        self.inner.send().await
    }

    pub async fn ping(&self) -> bool {
        self.inner
            .transport
            .is_reachable(&self.inner.properties.host, self.inner.properties.ping_timeout)
            .await
    }

    pub async fn has_offline_data(&self) -> bool {
        match &self.inner.offline {
            Some(store) => store.has_offline_data().await,
            None => false,
        }
    }

    pub async fn recover(&self) -> RecoveryOutcome {
        match &self.inner.offline {
            Some(store) => {
                store
                    .recover(
                        self.inner.transport.as_ref(),
                        &self.inner.properties.host,
                        self.inner.properties.ping_timeout,
                    )
                    .await
            }
            None => RecoveryOutcome::NothingToRecover,
        }
    }

    /// Stops the timer, runs a final send and closes the offline store.
    ///
    /// Errors from the final send or from an earlier auto-send are returned
    /// only while data is still unsent; lost data is always reported.
    pub async fn quit(&self) -> Result<usize, ShellError> {
        let task = self.autosend.lock().take();
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                error!("Auto-send task failed: {e}");
            }
        }

        let mut core = self.inner.core.lock().await;
        if core.state == ShellState::Stopped {
            return Ok(0);
        }
        core.state = ShellState::Quitting;

        let mut errors = Vec::new();
        let sent = match self.inner.send_locked(&mut core).await {
            Ok(sent) => sent,
            Err(e) => {
                errors.push(e);
                0
            }
        };
        if let Some(e) = self.inner.background_error.lock().take() {
            errors.push(e);
        }

        let leftover = core.queue.take();
        if !leftover.is_empty()
            && let Err(e) = self.inner.divert(leftover, &ShellError::Stopped).await
        {
            errors.push(e);
        }

        let mut data_remains = false;
        if let Some(store) = &self.inner.offline {
            if let Err(e) = store.close().await {
                warn!("Failed to close offline store: {e}");
            }
            data_remains = store.has_offline_data().await;
        }
        core.state = ShellState::Stopped;
        drop(core);

        info!(sent, "Sensor shell stopped");

        let reported: Vec<ShellError> = errors
            .into_iter()
            .filter(|e| {
                let keep = e.is_data_loss() || data_remains;
                if !keep {
                    debug!("Not reporting resolved failure: {e}");
                }
                keep
            })
            .collect();
        match ShellError::aggregate(reported) {
            Some(e) => Err(e),
            None => Ok(sent),
        }
    }
}

impl<T: SensorTransport> Drop for SingleShell<T> {
    fn drop(&mut self) {
        if let Some(task) = self.autosend.lock().take() {
            task.cancel.cancel();
        }
    }
}

impl<T: SensorTransport> ShellInner<T> {
    fn cache(&self) -> Option<&Arc<OfflineStore>> {
        self.offline
            .as_ref()
            .filter(|_| self.properties.offline_cache_enabled)
    }

    async fn send(&self) -> Result<usize, ShellError> {
        let mut core = self.core.lock().await;
        match core.state {
            ShellState::Stopped => Err(ShellError::Stopped),
            _ => self.send_locked(&mut core).await,
        }
    }

    async fn send_locked(&self, core: &mut ShellCore) -> Result<usize, ShellError> {
        if core.queue.is_empty() {
            return Ok(0);
        }

        let host = &self.properties.host;
        if !self
            .transport
            .is_reachable(host, self.properties.ping_timeout)
            .await
        {
            let batch = core.queue.take();
            warn!(host = %host, records = batch.len(), "Server unreachable");
            let cause = ShellError::Unreachable { host: host.clone() };
            self.divert(batch, &cause).await?;
            return Ok(0);
        }

        let batch = core.queue.take();
        match self.transport.post_batch(&batch).await {
            Ok(unsent) => {
                let sent = batch.len() - unsent.len();
                if !unsent.is_empty() {
                    debug!(unsent = unsent.len(), "Keeping unresolved records queued");
                    core.queue.prepend(unsent);
                }
                info!(host = %host, records = sent, "Sent sensor data");
                Ok(sent)
            }
            Err(e) => {
                warn!(host = %host, records = batch.len(), "Sending sensor data failed: {e}");
                let cause = ShellError::Transport(e);
                self.divert(batch, &cause).await?;
                Err(cause)
            }
        }
    }

    /// Hands a batch the server did not take to the offline store, or reports
    /// it lost when there is no offline cache.
    async fn divert(&self, batch: EventBatch, cause: &ShellError) -> Result<(), ShellError> {
        let count = batch.len();
        let Some(store) = self.cache() else {
            error!(records = count, "Offline cache disabled, dropping records: {cause}");
            return Err(ShellError::DataLost {
                count,
                reason: cause.to_string(),
            });
        };

        match store.store(batch).await {
            Ok(stored) => {
                info!(records = stored, "Stored sensor data offline");
                Ok(())
            }
            Err(e) => {
                error!(records = count, "Offline storage failed: {e}");
                Err(ShellError::DataLost {
                    count,
                    reason: format!("{cause}; offline storage failed: {e}"),
                })
            }
        }
    }
}

fn spawn_autosend<T: SensorTransport>(inner: &Arc<ShellInner<T>>) -> Option<AutosendTask> {
    let period = inner.properties.autosend_interval;
    if period.is_zero() {
        return None;
    }

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let inner = inner.clone();
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = inner.send().await {
                        warn!("Auto-send failed: {e}");
                        *inner.background_error.lock() = Some(e);
                    }
                }
            }
        }
        debug!("Auto-send task stopped");
    });

    Some(AutosendTask { cancel, handle })
}
