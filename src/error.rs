//! Error types shared across the crate.

use std::io;

use thiserror::Error;

/// Errors raised while building or running a watch registration.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid {field} pattern: {source}")]
    Pattern {
        field: &'static str,
        #[source]
        source: regex::Error,
    },
    #[error("Invalid trigger rule: {0}")]
    Rule(String),
    #[error("Trigger references unknown router `{name}`")]
    UnknownRouter { name: String },
    #[error("Unparseable record: {0}")]
    Record(#[from] serde_json::Error),
    #[error("Failed to watch directory: {0}")]
    Watch(#[from] notify::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a [`Router`](crate::Router) while delivering.
///
/// Delivery is fire-and-forget from the engine's point of view, so this is
/// only ever logged.
#[derive(Debug, Error)]
#[error("Delivery failed: {source}")]
pub struct DeliveryError {
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl DeliveryError {
    pub fn new(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        DeliveryError {
            source: source.into(),
        }
    }
}

pub(crate) fn pattern(field: &'static str, pattern: &str) -> Result<regex::Regex> {
    regex::Regex::new(pattern).map_err(|source| Error::Pattern { field, source })
}
