//! Shared completion counter.

use parking_lot::Mutex;

/// Thread-safe countdown shared by several in-flight buffers.
///
/// Used when many requests must all complete before a dependent action
/// fires, e.g. a full metadata refresh fanned out over several requests.
/// The decrement-and-check is performed under the counter's own lock so
/// exactly one completer observes the transition to zero.
#[derive(Debug)]
pub struct CompletionCounter {
    remaining: Mutex<i32>,
}

impl CompletionCounter {
    pub fn new(count: i32) -> Self {
        Self {
            remaining: Mutex::new(count),
        }
    }

    /// Decrements the counter. Returns true for exactly the call that
    /// reaches zero.
    pub fn decr_and_check(&self) -> bool {
        let mut remaining = self.remaining.lock();
        *remaining -= 1;
        *remaining == 0
    }

    pub fn remaining(&self) -> i32 {
        *self.remaining.lock()
    }
}
