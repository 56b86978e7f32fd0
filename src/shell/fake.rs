use crate::domain::{EventBatch, EventRecord, UnsentBatch};
use crate::sender::{SensorTransport, TransportError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// In-memory transport for shell tests.
#[derive(Default)]
pub struct FakeTransport {
    reachable: AtomicBool,
    reject_status: Mutex<Option<u16>>,
    unresolved_project: Mutex<Option<String>>,
    pub posted: Mutex<Vec<EventRecord>>,
    pub post_calls: AtomicUsize,
    pub pings: AtomicUsize,
}

impl FakeTransport {
    pub fn reachable() -> Self {
        let transport = Self::default();
        transport.set_reachable(true);
        transport
    }

    pub fn unreachable() -> Self {
        Self::default()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn reject_with(&self, status: Option<u16>) {
        *self.reject_status.lock() = status;
    }

    /// Records of this project come back unsent.
    pub fn hold_project(&self, project_uri: Option<&str>) {
        *self.unresolved_project.lock() = project_uri.map(str::to_string);
    }

    pub fn posted_len(&self) -> usize {
        self.posted.lock().len()
    }
}

impl SensorTransport for FakeTransport {
    async fn is_reachable(&self, _host: &str, _timeout: Duration) -> bool {
        self.pings.fetch_add(1, Ordering::SeqCst);
        self.reachable.load(Ordering::SeqCst)
    }

    async fn post_batch(&self, batch: &EventBatch) -> Result<UnsentBatch, TransportError> {
        self.post_calls.fetch_add(1, Ordering::SeqCst);
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable("fake transport is down".to_string()));
        }
        let rejected = *self.reject_status.lock();
        if let Some(status) = rejected {
            return Err(TransportError::ServerRejected { status });
        }

        let held = self.unresolved_project.lock().clone();
        let mut unsent = UnsentBatch::new();
        let mut posted = self.posted.lock();
        for record in batch {
            if held.as_deref() == Some(record.project_uri()) {
                unsent.push(record.clone());
            } else {
                posted.push(record.clone());
            }
        }
        Ok(unsent)
    }
}
