//! Domain layer for sensorshell.
//!
//! Contains the canonical types shared across all modules:
//! - `EventRecord`: one telemetry observation
//! - `EventBatch`: the unit of transmission and offline persistence
//! - `MalformedEventError`: rejection of a bad event description

pub mod batch;
pub mod error;
pub mod event;

pub use batch::{EventBatch, UnsentBatch};
pub use error::MalformedEventError;
pub use event::{
    EventRecord, KEY_PROJECT_URI, KEY_RESOURCE, KEY_RUNTIME, KEY_SENSOR_DATA_TYPE, KEY_TIMESTAMP,
    KEY_TOOL, KEY_URI, format_timestamp, now_millis, parse_timestamp,
};
