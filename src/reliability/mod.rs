//! Offline durability: the flat-file store for records the transport could
//! not deliver, and the background job that replays them.

pub mod format;
pub mod offline;
pub mod recovery;

pub use format::{ParsedRecords, parse_records, serialize_record, serialize_records};
pub use offline::{
    ACTIVE_FILE, OfflineConfig, OfflineStore, PersistenceError, PromoteOutcome, READY_FILE,
    RecoveryOutcome,
};
pub use recovery::{OfflineRecovery, PostGuard, PostPermit};
