//! Bounded concurrency slots for one job kind.
//!
//! [`ConcurrencyLimiter`] is a non-blocking counting gate: `try_acquire`
//! either takes a slot immediately or reports that the ceiling is reached.
//! It never queues callers. [`SlotGuard`] releases its slot on drop, so a
//! slot taken through [`ConcurrencyLimiter::try_acquire_guard`] is returned
//! exactly once on every exit path, including task cancellation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub struct ConcurrencyLimiter {
    max_concurrent: usize,
    in_flight: AtomicUsize,
}

impl ConcurrencyLimiter {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Number of slots currently held.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Take a slot if fewer than `max_concurrent` are held.
    ///
    /// Check and increment happen in one compare-exchange, so concurrent
    /// callers can never push the count past the ceiling.
    pub fn try_acquire(&self) -> bool {
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.max_concurrent).then_some(current + 1)
            })
            .is_ok()
    }

    /// Return a slot taken with [`try_acquire`](Self::try_acquire).
    ///
    /// Must be called exactly once per successful acquire. A release with no
    /// slot held is ignored and logged rather than wrapping the counter.
    pub fn release(&self) {
        let result = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            });
        if result.is_err() {
            tracing::error!("Concurrency slot released while none was held");
        }
    }

    /// Take a slot wrapped in a guard that releases it on drop.
    pub fn try_acquire_guard(self: &Arc<Self>) -> Option<SlotGuard> {
        self.try_acquire().then(|| SlotGuard {
            limiter: Arc::clone(self),
        })
    }
}

/// One held concurrency slot. Dropping it releases the slot.
#[derive(Debug)]
pub struct SlotGuard {
    limiter: Arc<ConcurrencyLimiter>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.limiter.release();
    }
}
