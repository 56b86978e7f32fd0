//! Shells accumulate records and flush them to the collector.
//!
//! [`SingleShell`] owns one in-memory queue, an auto-send timer and an
//! optional offline store. [`MultiShell`] fans `add` calls out over several
//! single shells. [`Shell`] is the one surface the command layer talks to.

mod multi;
mod routing;
mod single;

#[cfg(test)]
pub(crate) mod fake;

pub use multi::MultiShell;
pub use routing::{Router, RoutingPolicy};
pub use single::{ShellState, SingleShell};

use crate::app::config::ShellProperties;
use crate::domain::{EventRecord, MalformedEventError};
use crate::reliability::{OfflineStore, PersistenceError, RecoveryOutcome};
use crate::sender::{SensorTransport, TransportError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShellError {
    #[error("Malformed event: {0}")]
    Malformed(#[from] MalformedEventError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Server unreachable: {host}")]
    Unreachable { host: String },
    #[error("Lost {count} sensor data records: {reason}")]
    DataLost { count: usize, reason: String },
    #[error("Offline persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("Shell is stopped")]
    Stopped,
    #[error("{} shells failed: {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<ShellError>),
}

fn join_errors(errors: &[ShellError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ShellError {
    pub fn is_data_loss(&self) -> bool {
        match self {
            ShellError::DataLost { .. } => true,
            ShellError::Aggregate(errors) => errors.iter().any(ShellError::is_data_loss),
            _ => false,
        }
    }

    /// Folds several failures into one error, if there were any.
    pub fn aggregate(mut errors: Vec<ShellError>) -> Option<ShellError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(ShellError::Aggregate(errors)),
        }
    }
}

/// Either shell variant behind one interface.
pub enum Shell<T: SensorTransport> {
    Single(SingleShell<T>),
    Multi(MultiShell<T>),
}

impl<T: SensorTransport> Shell<T> {
    /// Starts a multi-shell when `multishell_enabled` is set, a single shell
    /// otherwise.
    pub async fn start(properties: ShellProperties, transport: Arc<T>) -> Result<Self, ShellError> {
        let properties = properties.normalized();
        if properties.multishell_enabled {
            Ok(Shell::Multi(MultiShell::start(properties, transport).await?))
        } else {
            Ok(Shell::Single(SingleShell::start(properties, transport).await?))
        }
    }

    pub fn properties(&self) -> &ShellProperties {
        match self {
            Shell::Single(shell) => shell.properties(),
            Shell::Multi(shell) => shell.properties(),
        }
    }

    /// Queues one event description (`Tool`, `SensorDataType`, `Timestamp`,
    /// `Runtime`, `URI`, `ProjectURI`, anything else becomes a property).
    pub async fn add<I, K, V>(&self, pairs: I) -> Result<(), ShellError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        match self {
            Shell::Single(shell) => shell.add(pairs).await,
            Shell::Multi(shell) => shell.add(pairs).await,
        }
    }

    pub async fn add_record(&self, record: EventRecord) -> Result<(), ShellError> {
        match self {
            Shell::Single(shell) => shell.add_record(record).await,
            Shell::Multi(shell) => shell.add_record(record).await,
        }
    }

    pub async fn send(&self) -> Result<usize, ShellError> {
        match self {
            Shell::Single(shell) => shell.send().await,
            Shell::Multi(shell) => shell.send().await,
        }
    }

    pub async fn quit(&self) -> Result<usize, ShellError> {
        match self {
            Shell::Single(shell) => shell.quit().await,
            Shell::Multi(shell) => shell.quit().await,
        }
    }

    pub async fn ping(&self) -> bool {
        match self {
            Shell::Single(shell) => shell.ping().await,
            Shell::Multi(shell) => shell.ping().await,
        }
    }

    /// Always false for a multi-shell, which never persists.
    pub async fn has_offline_data(&self) -> bool {
        match self {
            Shell::Single(shell) => shell.has_offline_data().await,
            Shell::Multi(_) => false,
        }
    }

    pub async fn recover(&self) -> RecoveryOutcome {
        match self {
            Shell::Single(shell) => shell.recover().await,
            Shell::Multi(_) => RecoveryOutcome::NothingToRecover,
        }
    }

    pub async fn queued_len(&self) -> usize {
        match self {
            Shell::Single(shell) => shell.queued_len().await,
            Shell::Multi(shell) => shell.queued_len().await,
        }
    }

    pub fn offline_store(&self) -> Option<Arc<OfflineStore>> {
        match self {
            Shell::Single(shell) => shell.offline_store(),
            Shell::Multi(_) => None,
        }
    }
}
