//! # Fanout Dispatcher
//!
//! Runs an ordered batch of independent async work units with at most `C`
//! of them in flight, and returns one outcome per unit in submission order.
//!
//! ## Features
//!
//! - **Bounded concurrency**: a FIFO-fair permit limiter, shareable across batches
//! - **Index-aligned results**: `outcomes[i]` always belongs to unit `i`
//! - **Partial-failure isolation**: errors, timeouts and panics stay in their slot
//! - **Progress events**: one per resolved unit, in completion order
//! - **Rate limiting**: optional chunked execution with a pause between chunks
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Dispatcher                          │
//! │   (admits units in order, aggregates outcomes by index)     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ConcurrencyLimiter                       │
//! │        (counting semaphore, waiters served in order)        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         WorkUnit                            │
//! │   (opaque async operation, started only once admitted)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use fanout_dispatch::prelude::*;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), DispatchError> {
//! let config = DispatcherConfig::new(2).with_unit_timeout(Duration::from_secs(5));
//! let dispatcher = Dispatcher::new(config)?;
//!
//! let batch: Batch<String> = ["news", "weather", "sports"]
//!     .into_iter()
//!     .map(|topic| {
//!         WorkUnit::new(topic, move || async move { Ok(format!("summary of {topic}")) })
//!     })
//!     .collect();
//!
//! let report = dispatcher
//!     .run_batch_with_progress(batch, |event: &ProgressEvent<'_, String, anyhow::Error>| {
//!         println!("{}/{} {} {}", event.resolved, event.total, event.unit_id, event.outcome.status());
//!     })
//!     .await?;
//!
//! assert!(report.all_succeeded());
//! assert_eq!(report.outcomes[1].success().map(String::as_str), Some("summary of weather"));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod limiter;
pub mod outcome;
pub mod progress;
pub mod rate_limit;
pub mod report;
pub mod unit;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::DispatcherConfig;
    pub use crate::dispatcher::{run_batch, Dispatcher};
    pub use crate::error::DispatchError;
    pub use crate::limiter::{ConcurrencyLimiter, Permit};
    pub use crate::outcome::{Failure, FailureKind, Outcome, OutcomeStatus};
    pub use crate::progress::{ProgressEvent, ProgressObserver, ProgressSnapshot};
    pub use crate::rate_limit::{PausePolicy, RateLimit};
    pub use crate::report::{BatchReport, BatchSummary, LatencySummary};
    pub use crate::unit::{Batch, UnitId, WorkUnit};
}

// Re-export key types at crate root
pub use config::DispatcherConfig;
pub use dispatcher::{run_batch, Dispatcher};
pub use error::{DispatchError, Result};
pub use limiter::{ConcurrencyLimiter, Permit};
pub use outcome::{Failure, FailureKind, Outcome, OutcomeStatus};
pub use progress::{ProgressEvent, ProgressObserver, ProgressSnapshot};
pub use rate_limit::{PausePolicy, RateLimit};
pub use report::{BatchReport, BatchSummary, LatencySummary};
pub use tokio_util::sync::CancellationToken;
pub use unit::{Batch, UnitId, WorkUnit};
