use super::offline::{OfflineStore, RecoveryOutcome};
use crate::sender::SensorTransport;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// "A post is happening" flag. Clones share the flag. Each offline store owns
/// one, and every recovery of that store (startup, `recover` command, periodic
/// job) goes through it.
#[derive(Debug, Clone, Default)]
pub struct PostGuard {
    busy: Arc<AtomicBool>,
}

impl PostGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<PostPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PostPermit {
                busy: self.busy.clone(),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Clears the guard when dropped.
#[derive(Debug)]
pub struct PostPermit {
    busy: Arc<AtomicBool>,
}

impl Drop for PostPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Background job replaying offline data, either on a fixed period or once
/// (for example right after a batch of work was submitted).
pub struct OfflineRecovery<T: SensorTransport> {
    store: Arc<OfflineStore>,
    transport: Arc<T>,
    host: String,
    ping_timeout: Duration,
}

impl<T: SensorTransport> OfflineRecovery<T> {
    pub fn new(
        store: Arc<OfflineStore>,
        transport: Arc<T>,
        host: impl Into<String>,
        ping_timeout: Duration,
    ) -> Self {
        Self {
            store,
            transport,
            host: host.into(),
            ping_timeout,
        }
    }

    /// One recovery attempt. Failures are logged and left for the next run.
    pub async fn run_once(&self) -> RecoveryOutcome {
        let outcome = self
            .store
            .recover(self.transport.as_ref(), &self.host, self.ping_timeout)
            .await;

        match &outcome {
            RecoveryOutcome::Failed { reason } => {
                warn!(host = %self.host, "Offline recovery failed, will retry: {reason}");
            }
            RecoveryOutcome::Recovered { sent, deferred } => {
                debug!(sent, deferred, "Offline recovery run finished");
            }
            RecoveryOutcome::AlreadyRunning => {
                debug!("Offline recovery skipped: a post is already in progress");
            }
            other => debug!(outcome = ?other, "Offline recovery run finished"),
        }
        outcome
    }

    pub fn spawn_once(self: Arc<Self>) -> JoinHandle<RecoveryOutcome> {
        tokio::spawn(async move { self.run_once().await })
    }

    /// Runs recovery every `period` until `cancel` fires. The first run happens
    /// one full period after spawning.
    pub fn spawn_periodic(
        self: Arc<Self>,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            info!(period = ?period, "Offline recovery task started");
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                }
            }
            debug!("Offline recovery task stopped");
        })
    }
}
