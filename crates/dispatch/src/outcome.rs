//! Resolved results of work units

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a work unit failed
#[derive(Debug)]
pub enum Failure<E> {
    /// The operation itself returned an error; the payload is kept as-is
    Operation(E),
    /// The operation ran longer than the configured unit timeout
    Timeout { limit: Duration },
    /// The operation panicked
    Panicked { message: String },
}

impl<E> Failure<E> {
    pub fn kind(&self) -> FailureKind {
        match self {
            Failure::Operation(_) => FailureKind::Operation,
            Failure::Timeout { .. } => FailureKind::Timeout,
            Failure::Panicked { .. } => FailureKind::Panicked,
        }
    }

    /// The operation's own error, if that is what failed
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            Failure::Operation(e) => Some(e),
            _ => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for Failure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Operation(e) => write!(f, "{e}"),
            Failure::Timeout { limit } => write!(f, "timed out after {limit:?}"),
            Failure::Panicked { message } => write!(f, "panicked: {message}"),
        }
    }
}

/// Failure classification without the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Operation,
    Timeout,
    Panicked,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Operation => "operation",
            FailureKind::Timeout => "timeout",
            FailureKind::Panicked => "panicked",
        };
        f.write_str(s)
    }
}

/// The resolved result of one work unit
///
/// Exactly one outcome is produced per submitted unit.
#[derive(Debug)]
pub enum Outcome<T, E = anyhow::Error> {
    Success(T),
    Failure(Failure<E>),
    /// The batch was cancelled before this unit resolved
    Cancelled,
}

impl<T, E> Outcome<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    pub fn status(&self) -> OutcomeStatus {
        match self {
            Outcome::Success(_) => OutcomeStatus::Success,
            Outcome::Failure(failure) => OutcomeStatus::Failure(failure.kind()),
            Outcome::Cancelled => OutcomeStatus::Cancelled,
        }
    }

    pub fn success(&self) -> Option<&T> {
        match self {
            Outcome::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure<E>> {
        match self {
            Outcome::Failure(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn into_success(self) -> Option<T> {
        match self {
            Outcome::Success(value) => Some(value),
            _ => None,
        }
    }

    /// Convert into a `Result`, with cancellation reported as `None` on the error side
    pub fn into_result(self) -> Result<T, Option<Failure<E>>> {
        match self {
            Outcome::Success(value) => Ok(value),
            Outcome::Failure(failure) => Err(Some(failure)),
            Outcome::Cancelled => Err(None),
        }
    }
}

impl<T, E> From<Result<T, E>> for Outcome<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(e) => Outcome::Failure(Failure::Operation(e)),
        }
    }
}

/// Payload-free view of an [`Outcome`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "status", content = "kind", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Failure(FailureKind),
    Cancelled,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeStatus::Success => f.write_str("success"),
            OutcomeStatus::Failure(kind) => write!(f, "failure ({kind})"),
            OutcomeStatus::Cancelled => f.write_str("cancelled"),
        }
    }
}
