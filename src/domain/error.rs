use thiserror::Error;

/// Rejection of a single event description. The shell queue is never touched
/// when this is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedEventError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid {field} value '{value}': expected epoch millis or RFC 3339")]
    InvalidTimestamp { field: &'static str, value: String },

    #[error("Empty property key")]
    EmptyPropertyKey,
}
