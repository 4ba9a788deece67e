//! Error types for event handling.

use thiserror::Error;

/// Errors opening an event log. Writes never fail the caller: a sink
/// that cannot persist an event warns and drops it.
#[derive(Debug, Error)]
pub enum EventError {
    /// The log file could not be opened.
    #[error("event log I/O error: {0}")]
    Io(#[from] std::io::Error),
}
