//! The writer gate: blocking single-writer exclusion.
//!
//! A write transaction acquires the gate at begin and releases it only at
//! commit or abort, which can span many calls; a lock guard cannot express
//! that, so the gate is a condvar-backed binary semaphore.

use parking_lot::{Condvar, Mutex};

/// Blocking mutual exclusion for write transactions.
pub struct WriterGate {
    held: Mutex<bool>,
    released: Condvar,
}

impl WriterGate {
    /// A free gate.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            held: Mutex::new(false),
            released: Condvar::new(),
        }
    }

    /// Acquire the gate, blocking while another writer holds it.
    pub fn acquire(&self) {
        let mut held = self.held.lock();
        while *held {
            self.released.wait(&mut held);
        }
        *held = true;
    }

    /// Release the gate and wake one waiter.
    pub fn release(&self) {
        let mut held = self.held.lock();
        debug_assert!(*held, "WriterGate released while free");
        *held = false;
        self.released.notify_one();
    }

    /// Whether a writer currently holds the gate.
    #[must_use]
    pub fn is_held(&self) -> bool {
        *self.held.lock()
    }
}

impl Default for WriterGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn acquire_release() {
        let gate = WriterGate::new();
        assert!(!gate.is_held());
        gate.acquire();
        assert!(gate.is_held());
        gate.release();
        assert!(!gate.is_held());
    }

    #[test]
    fn second_writer_blocks_until_release() {
        let gate = Arc::new(WriterGate::new());
        gate.acquire();

        let g2 = Arc::clone(&gate);
        let waiter = std::thread::spawn(move || {
            g2.acquire();
            g2.release();
        });

        // The waiter cannot finish while we hold the gate.
        std::thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        gate.release();
        waiter.join().expect("waiter finishes after release");
    }
}
