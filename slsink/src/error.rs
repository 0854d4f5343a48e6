//! Error types for slsink
//!
//! Defines the sink's error taxonomy using thiserror. Transient conditions
//! (hardware query failures, rejected enqueues) are separate variants so callers
//! can tell "try again later" apart from fatal open failures.

use thiserror::Error;

/// Main error type for the sink
#[derive(Error, Debug)]
pub enum Error {
    /// Hardware resource creation failed; the sink instance is unusable
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// Hardware state could not be queried (transient)
    #[error("Hardware query error: {0}")]
    HardwareQuery(String),

    /// Hardware refused a unit (transient backpressure or hardware failure)
    #[error("Enqueue rejected: {0}")]
    EnqueueRejected(String),

    /// Ring buffer too full for a write
    #[error("Capacity exceeded: requested {requested} bytes, {space} free")]
    CapacityExceeded { requested: usize, space: usize },

    /// Hardware has not acknowledged any unit yet, so latency is unknown
    #[error("Latency unavailable: hardware has not consumed a buffer yet")]
    LatencyUnavailable,

    /// Operation not valid in the current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration rejected
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors from the common crate
    #[error(transparent)]
    Common(#[from] slsink_common::Error),
}

impl Error {
    /// Whether the caller may retry the operation later
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::HardwareQuery(_)
                | Error::EnqueueRejected(_)
                | Error::CapacityExceeded { .. }
                | Error::LatencyUnavailable
        )
    }
}

/// Convenience Result type using the sink Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::LatencyUnavailable.is_transient());
        assert!(Error::HardwareQuery("gone".to_string()).is_transient());
        assert!(!Error::Initialization("no engine".to_string()).is_transient());
        assert!(!Error::InvalidState("closed".to_string()).is_transient());
    }
}
