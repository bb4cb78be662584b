//! Progress reporting
//!
//! One [`ProgressEvent`] is emitted per resolved unit, in completion order.
//! Events borrow the outcome; observers that need to move data elsewhere
//! (a channel, a UI thread) take a [`ProgressSnapshot`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::outcome::{Outcome, OutcomeStatus};
use crate::unit::UnitId;

/// Notification that one unit has resolved
#[derive(Debug)]
pub struct ProgressEvent<'a, T, E> {
    /// Position of the unit in the submitted batch
    pub index: usize,
    pub unit_id: &'a UnitId,
    pub outcome: &'a Outcome<T, E>,
    /// Units resolved so far, including this one (1-based)
    pub resolved: usize,
    /// Batch size
    pub total: usize,
    /// How long the unit ran; `None` if it never started
    pub elapsed: Option<Duration>,
}

impl<T, E> ProgressEvent<'_, T, E> {
    /// Whether this is the last event of the batch
    pub fn is_last(&self) -> bool {
        self.resolved == self.total
    }

    /// Fraction of the batch resolved, in `0.0..=1.0`
    pub fn fraction(&self) -> f64 {
        self.resolved as f64 / self.total.max(1) as f64
    }

    /// Owned, payload-free copy of this event
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            index: self.index,
            unit_id: self.unit_id.clone(),
            status: self.outcome.status(),
            resolved: self.resolved,
            total: self.total,
            elapsed_ms: self.elapsed.map(|d| d.as_millis() as u64),
        }
    }
}

/// Owned summary of a [`ProgressEvent`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub index: usize,
    pub unit_id: UnitId,
    pub status: OutcomeStatus,
    pub resolved: usize,
    pub total: usize,
    pub elapsed_ms: Option<u64>,
}

/// Receives progress events from a running batch
///
/// Called from the coordinating task, so implementations should return
/// quickly. Any `Fn(&ProgressEvent<T, E>) + Send + Sync` closure is an
/// observer, and so is an unbounded sender of [`ProgressSnapshot`]s.
pub trait ProgressObserver<T, E>: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent<'_, T, E>);
}

impl<T, E, F> ProgressObserver<T, E> for F
where
    F: Fn(&ProgressEvent<'_, T, E>) + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent<'_, T, E>) {
        self(event)
    }
}

impl<T, E> ProgressObserver<T, E> for mpsc::UnboundedSender<ProgressSnapshot> {
    fn on_progress(&self, event: &ProgressEvent<'_, T, E>) {
        // A dropped receiver just means nobody is listening any more
        let _ = self.send(event.snapshot());
    }
}
