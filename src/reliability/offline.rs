use super::format::{parse_records, serialize_records};
use super::recovery::PostGuard;
use crate::domain::{EventBatch, EventRecord};
use crate::sender::SensorTransport;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const ACTIVE_FILE: &str = "active.sensordata";
pub const READY_FILE: &str = "ready.sensordata";

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Offline writer is closed")]
    WriterClosed,
    #[error("Invalid offline directory: {0}")]
    InvalidDirectory(String),
}

#[derive(Debug, Clone)]
pub struct OfflineConfig {
    pub directory: PathBuf,
    pub queue_capacity: usize,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("/tmp/sensorshell/offline"),
            queue_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromoteOutcome {
    /// The active file was renamed to the ready file.
    Promoted,
    /// A ready file already exists and has not been consumed yet.
    AlreadyReady,
    NothingToPromote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    NothingToRecover,
    Unreachable,
    AlreadyRunning,
    Recovered { sent: usize, deferred: usize },
    Failed { reason: String },
}

enum WriterCommand {
    Append(Vec<EventRecord>),
    Flush(oneshot::Sender<()>),
    Promote(oneshot::Sender<PromoteOutcome>),
}

/// Durable local buffer for records the transport could not send.
///
/// Callers only enqueue; the active file is owned by a single writer task
/// that appends in FIFO order and, on a promote command, renames the active
/// file to the ready file so recovery never reads a file still being written.
pub struct OfflineStore {
    active_path: PathBuf,
    ready_path: PathBuf,
    sender: Mutex<Option<mpsc::Sender<WriterCommand>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    queued: Arc<AtomicUsize>,
    deferred: Mutex<EventBatch>,
    recovering: PostGuard,
}

impl OfflineStore {
    pub async fn open(config: OfflineConfig) -> Result<Self, PersistenceError> {
        if config.directory.as_os_str().is_empty() {
            return Err(PersistenceError::InvalidDirectory(
                "offline directory is empty".to_string(),
            ));
        }
        fs::create_dir_all(&config.directory).await?;

        let active_path = config.directory.join(ACTIVE_FILE);
        let ready_path = config.directory.join(READY_FILE);
        let queued = Arc::new(AtomicUsize::new(0));

        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let writer = OfflineWriter {
            active_path: active_path.clone(),
            ready_path: ready_path.clone(),
            file: None,
            queued: queued.clone(),
        };
        let handle = tokio::spawn(writer.run(rx));

        debug!(directory = %config.directory.display(), "Offline store opened");

        Ok(Self {
            active_path,
            ready_path,
            sender: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(handle)),
            queued,
            deferred: Mutex::new(EventBatch::new()),
            recovering: PostGuard::new(),
        })
    }

    pub fn active_path(&self) -> &Path {
        &self.active_path
    }

    pub fn ready_path(&self) -> &Path {
        &self.ready_path
    }

    /// The flag every recovery of this store holds while it posts.
    pub fn post_guard(&self) -> PostGuard {
        self.recovering.clone()
    }

    fn sender(&self) -> Result<mpsc::Sender<WriterCommand>, PersistenceError> {
        self.sender
            .lock()
            .as_ref()
            .cloned()
            .ok_or(PersistenceError::WriterClosed)
    }

    /// Enqueues `batch` for appending, together with any records a previous
    /// recovery deferred. Returns the number of records handed to the writer.
    pub async fn store(&self, batch: EventBatch) -> Result<usize, PersistenceError> {
        let mut records = std::mem::take(&mut *self.deferred.lock()).into_records();
        records.extend(batch);
        if records.is_empty() {
            return Ok(0);
        }

        let count = records.len();
        let sender = match self.sender() {
            Ok(sender) => sender,
            Err(e) => {
                error!(records = count, "Dropping offline records: {e}");
                return Err(e);
            }
        };

        self.queued.fetch_add(count, Ordering::SeqCst);
        if sender.send(WriterCommand::Append(records)).await.is_err() {
            self.queued.fetch_sub(count, Ordering::SeqCst);
            error!(records = count, "Dropping offline records: writer stopped");
            return Err(PersistenceError::WriterClosed);
        }

        debug!(records = count, "Queued records for offline storage");
        Ok(count)
    }

    /// Waits until everything enqueued so far has been written.
    pub async fn flush(&self) -> Result<(), PersistenceError> {
        let (ack, done) = oneshot::channel();
        self.sender()?
            .send(WriterCommand::Flush(ack))
            .await
            .map_err(|_| PersistenceError::WriterClosed)?;
        done.await.map_err(|_| PersistenceError::WriterClosed)
    }

    /// Closes the active file and hands it over as the ready file.
    pub async fn promote(&self) -> Result<PromoteOutcome, PersistenceError> {
        let (ack, done) = oneshot::channel();
        self.sender()?
            .send(WriterCommand::Promote(ack))
            .await
            .map_err(|_| PersistenceError::WriterClosed)?;
        done.await.map_err(|_| PersistenceError::WriterClosed)
    }

    pub async fn has_offline_data(&self) -> bool {
        let pending = self.queued.load(Ordering::SeqCst) > 0 || self.deferred_len() > 0;
        pending
            || file_has_data(&self.ready_path).await
            || file_has_data(&self.active_path).await
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.lock().len()
    }

    /// Replays persisted records once the server is reachable.
    ///
    /// Returns without touching the network when there is nothing on disk.
    /// The ready file is deleted only after the post attempt completes; records
    /// the transport hands back unsent stay in memory and join the next
    /// `store`. A rejected post keeps the ready file for the next attempt.
    pub async fn recover<T: SensorTransport>(
        &self,
        transport: &T,
        host: &str,
        ping_timeout: Duration,
    ) -> RecoveryOutcome {
        let Some(_permit) = self.recovering.try_acquire() else {
            return RecoveryOutcome::AlreadyRunning;
        };

        let ready_exists = file_has_data(&self.ready_path).await;
        if !ready_exists
            && self.queued.load(Ordering::SeqCst) == 0
            && !file_has_data(&self.active_path).await
        {
            return RecoveryOutcome::NothingToRecover;
        }

        if !transport.is_reachable(host, ping_timeout).await {
            debug!(host, "Server unreachable, offline data stays on disk");
            return RecoveryOutcome::Unreachable;
        }

        match self.promote().await {
            Ok(PromoteOutcome::NothingToPromote) if !ready_exists => {
                return RecoveryOutcome::NothingToRecover;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Offline promote failed: {e}");
                return RecoveryOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        }

        let text = match fs::read_to_string(&self.ready_path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return RecoveryOutcome::NothingToRecover;
            }
            Err(e) => {
                error!(path = %self.ready_path.display(), "Failed to read offline data: {e}");
                return RecoveryOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let parsed = parse_records(&text);
        if parsed.skipped > 0 {
            warn!(skipped = parsed.skipped, "Skipped unreadable offline records");
        }

        let batch = EventBatch::from_records(parsed.records);
        let total = batch.len();
        let unsent = if batch.is_empty() {
            EventBatch::new()
        } else {
            match transport.post_batch(&batch).await {
                Ok(unsent) => unsent,
                Err(e) => {
                    warn!(records = total, "Offline recovery post failed: {e}");
                    return RecoveryOutcome::Failed {
                        reason: e.to_string(),
                    };
                }
            }
        };

        let deferred = unsent.len();
        if deferred > 0 {
            self.deferred.lock().prepend(unsent);
        }

        if let Err(e) = fs::remove_file(&self.ready_path).await {
            error!(path = %self.ready_path.display(), "Failed to delete recovered offline file: {e}");
        }

        let sent = total - deferred;
        info!(sent, deferred, "Recovered offline sensor data");
        RecoveryOutcome::Recovered { sent, deferred }
    }

    /// Persists deferred records, waits for the writer to drain and stops it.
    pub async fn close(&self) -> Result<(), PersistenceError> {
        let has_deferred = self.deferred_len() > 0;
        if has_deferred && let Err(e) = self.store(EventBatch::new()).await {
            warn!("Failed to persist deferred records on close: {e}");
        }

        drop(self.sender.lock().take());
        let handle = self.writer.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            error!("Offline writer task failed: {e}");
        }
        Ok(())
    }
}

async fn file_has_data(path: &Path) -> bool {
    fs::metadata(path).await.is_ok_and(|meta| meta.len() > 0)
}

struct OfflineWriter {
    active_path: PathBuf,
    ready_path: PathBuf,
    file: Option<fs::File>,
    queued: Arc<AtomicUsize>,
}

impl OfflineWriter {
    async fn run(mut self, mut rx: mpsc::Receiver<WriterCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                WriterCommand::Append(records) => {
                    let count = records.len();
                    if let Err(e) = self.append(&records).await {
                        error!(
                            records = count,
                            path = %self.active_path.display(),
                            "Failed to persist offline records: {e}"
                        );
                        self.file = None;
                    }
                    self.queued.fetch_sub(count, Ordering::SeqCst);
                }
                WriterCommand::Flush(ack) => {
                    if let Some(file) = self.file.as_mut()
                        && let Err(e) = file.flush().await
                    {
                        error!("Failed to flush offline file: {e}");
                    }
                    let _ = ack.send(());
                }
                WriterCommand::Promote(ack) => {
                    let outcome = match self.promote().await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            error!("Failed to promote offline file: {e}");
                            PromoteOutcome::NothingToPromote
                        }
                    };
                    let _ = ack.send(outcome);
                }
            }
        }

        if let Some(mut file) = self.file.take()
            && let Err(e) = file.flush().await
        {
            error!("Failed to flush offline file on shutdown: {e}");
        }
        debug!("Offline writer stopped");
    }

    async fn append(&mut self, records: &[EventRecord]) -> Result<(), PersistenceError> {
        if self.file.is_none() {
            let file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.active_path)
                .await?;
            self.file = Some(file);
        }
        let Some(file) = self.file.as_mut() else {
            return Err(PersistenceError::WriterClosed);
        };

        let text = serialize_records(records);
        file.write_all(text.as_bytes()).await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn promote(&mut self) -> Result<PromoteOutcome, PersistenceError> {
        if file_has_data(&self.ready_path).await {
            return Ok(PromoteOutcome::AlreadyReady);
        }

        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        }

        if !file_has_data(&self.active_path).await {
            return Ok(PromoteOutcome::NothingToPromote);
        }

        fs::rename(&self.active_path, &self.ready_path).await?;
        debug!(path = %self.ready_path.display(), "Promoted offline file");
        Ok(PromoteOutcome::Promoted)
    }
}
