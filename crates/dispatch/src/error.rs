//! Dispatcher errors
//!
//! Only configuration problems surface as errors. A failing work unit is
//! never an error of the batch; it is recorded in that unit's
//! [`Outcome`](crate::Outcome).

use thiserror::Error;

/// Errors returned by the dispatcher before any work unit executes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Concurrency capacity must be at least 1
    #[error("invalid concurrency capacity {0}: must be at least 1")]
    InvalidCapacity(usize),

    /// The batch contained no work units
    #[error("batch is empty")]
    EmptyBatch,

    /// A per-unit timeout of zero would fail every unit
    #[error("invalid unit timeout: must be greater than zero")]
    InvalidTimeout,

    /// An environment variable could not be parsed
    #[error("invalid value {value:?} for environment variable {name}")]
    InvalidEnv { name: String, value: String },

    /// The limiter was closed, no permits can be granted
    #[error("concurrency limiter is closed")]
    LimiterClosed,
}

impl DispatchError {
    /// Whether this error is a configuration error.
    ///
    /// Everything except [`DispatchError::LimiterClosed`] is detected from
    /// the arguments alone.
    pub fn is_configuration(&self) -> bool {
        !matches!(self, DispatchError::LimiterClosed)
    }
}

/// Result alias for dispatcher operations
pub type Result<T> = std::result::Result<T, DispatchError>;
