pub mod client;
pub mod resolver;
pub mod stats;
pub mod transmission;

pub use client::{ClientConfig, HttpClient, TransportError};
pub use resolver::{PassthroughResolver, ProjectResolver, StaticResolver};
pub use stats::{ClientStats, TransportStats};
pub use transmission::{encode_record, normalize_host};

use crate::domain::{EventBatch, UnsentBatch};
use std::future::Future;
use std::time::Duration;

/// Transport seam the shells and the offline store are generic over.
///
/// Calls are synchronous from the caller's point of view; callers run them
/// off the event-capturing path.
pub trait SensorTransport: Send + Sync + 'static {
    /// Best-effort reachability probe. Never fails: any I/O error, DNS failure
    /// or timeout reads as `false`.
    fn is_reachable(&self, host: &str, timeout: Duration) -> impl Future<Output = bool> + Send;

    /// Sends every record of `batch`.
    ///
    /// `Ok` with an empty batch means everything was sent. A non-empty `Ok`
    /// holds exactly the records that could not be resolved yet and were not
    /// transmitted. A non-success server status fails the whole call.
    fn post_batch(
        &self,
        batch: &EventBatch,
    ) -> impl Future<Output = Result<UnsentBatch, TransportError>> + Send;
}
