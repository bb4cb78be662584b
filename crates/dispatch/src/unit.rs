//! Work units and batches
//!
//! A work unit is one deferred async operation, typically a single remote
//! call. The dispatcher never looks inside it; it only invokes the thunk
//! once and records what comes back.

use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

/// Identifier used to correlate a unit in progress events, logs and reports
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UnitId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

type Thunk<T, E> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T, E>> + Send>;

/// A single deferred async operation
///
/// The thunk is consumed when the dispatcher runs the unit, so a unit can
/// execute at most once.
///
/// # Example
///
/// ```
/// use fanout_dispatch::WorkUnit;
///
/// let unit: WorkUnit<u32> = WorkUnit::new("answer", || async { Ok(42) });
/// assert_eq!(unit.id().as_str(), "answer");
/// ```
pub struct WorkUnit<T, E = anyhow::Error> {
    id: UnitId,
    thunk: Thunk<T, E>,
}

impl<T, E> WorkUnit<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Create a unit from an id and a zero-argument async operation
    pub fn new<F, Fut>(id: impl Into<UnitId>, operation: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            id: id.into(),
            thunk: Box::new(move || operation().boxed()),
        }
    }
}

impl<T, E> WorkUnit<T, E> {
    pub fn id(&self) -> &UnitId {
        &self.id
    }

    /// Split into the id and the started operation.
    pub(crate) fn start(self) -> (UnitId, BoxFuture<'static, Result<T, E>>) {
        let future = (self.thunk)();
        (self.id, future)
    }
}

impl<T, E> fmt::Debug for WorkUnit<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkUnit").field("id", &self.id).finish_non_exhaustive()
    }
}

/// An ordered group of work units submitted together
pub struct Batch<T, E = anyhow::Error> {
    units: Vec<WorkUnit<T, E>>,
}

impl<T, E> Batch<T, E> {
    pub fn new() -> Self {
        Self { units: Vec::new() }
    }

    pub fn push(&mut self, unit: WorkUnit<T, E>) {
        self.units.push(unit);
    }

    /// Append a unit, builder style
    pub fn with_unit(mut self, unit: WorkUnit<T, E>) -> Self {
        self.units.push(unit);
        self
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Ids in submission order
    pub fn ids(&self) -> impl Iterator<Item = &UnitId> {
        self.units.iter().map(WorkUnit::id)
    }

    pub(crate) fn into_units(self) -> Vec<WorkUnit<T, E>> {
        self.units
    }
}

impl<T, E> Default for Batch<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> From<Vec<WorkUnit<T, E>>> for Batch<T, E> {
    fn from(units: Vec<WorkUnit<T, E>>) -> Self {
        Self { units }
    }
}

impl<T, E> FromIterator<WorkUnit<T, E>> for Batch<T, E> {
    fn from_iter<I: IntoIterator<Item = WorkUnit<T, E>>>(iter: I) -> Self {
        Self {
            units: iter.into_iter().collect(),
        }
    }
}

impl<T, E> fmt::Debug for Batch<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.ids()).finish()
    }
}
