//! A small object pool in the sync-pool pattern.
//!
//! Pools here are only worth their overhead for objects whose construction
//! cost is amortized across many uses (hash maps, scratch buffers for large
//! transactions). Callers acquire, mutate, and release; release-side policy
//! (clear and retain, or drop oversized objects) lives at the call site.

use parking_lot::Mutex;

/// A bounded free-list of reusable objects.
pub struct Pool<T> {
    items: Mutex<Vec<T>>,
    capacity: usize,
}

impl<T> Pool<T> {
    /// A pool retaining at most `capacity` idle objects.
    #[must_use]
    pub const fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Take an object from the pool, constructing one with `make` when the
    /// pool is empty.
    pub fn acquire_with(&self, make: impl FnOnce() -> T) -> T {
        self.items.lock().pop().unwrap_or_else(make)
    }

    /// Return an object to the pool. Dropped on the floor once the pool
    /// holds `capacity` idle objects.
    pub fn release(&self, item: T) {
        let mut items = self.items.lock();
        if items.len() < self.capacity {
            items.push(item);
        }
    }

    /// Number of idle objects currently pooled.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.items.lock().len()
    }
}
