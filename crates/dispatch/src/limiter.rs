//! Concurrency limiter
//!
//! A permit-counting gate with a fixed capacity. Permits are granted in
//! request order (tokio's semaphore is fair), so no waiting unit starves.
//! Release is tied to ownership of the [`Permit`]: dropping it returns the
//! permit, on every exit path, exactly once.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{DispatchError, Result};

/// Shared permit pool bounding how many units run at once
///
/// Cloning the limiter shares the pool. Pass the same instance to several
/// dispatchers to enforce a process-wide cap.
///
/// # Example
///
/// ```
/// use fanout_dispatch::ConcurrencyLimiter;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let limiter = ConcurrencyLimiter::new(2).unwrap();
/// let permit = limiter.acquire().await.unwrap();
/// assert_eq!(limiter.in_flight(), 1);
/// permit.release();
/// assert_eq!(limiter.in_flight(), 0);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ConcurrencyLimiter {
    /// Create a limiter with `capacity` permits
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidCapacity`] if `capacity` is zero or
    /// larger than the semaphore supports.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 || capacity > Semaphore::MAX_PERMITS {
            return Err(DispatchError::InvalidCapacity(capacity));
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        })
    }

    /// Wait for a permit
    ///
    /// Suspends until a permit is free. Waiters are served first come,
    /// first served.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::LimiterClosed`] once [`close`](Self::close)
    /// has been called.
    pub async fn acquire(&self) -> Result<Permit> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| DispatchError::LimiterClosed)?;
        Ok(Permit { _permit: permit })
    }

    /// Take a permit only if one is free right now
    pub fn try_acquire(&self) -> Option<Permit> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| Permit { _permit: permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of free permits
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Number of permits currently held
    pub fn in_flight(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }

    /// Stop granting permits. Pending and future acquires fail.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}

/// A held permit, returned to the pool when dropped
#[derive(Debug)]
#[must_use = "dropping a permit releases it immediately"]
pub struct Permit {
    _permit: OwnedSemaphorePermit,
}

impl Permit {
    /// Return the permit to the pool
    pub fn release(self) {
        drop(self);
    }
}
