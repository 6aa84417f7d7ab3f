//! Process-wide sequence numbering for outbound commands.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic sequence-number generator.
///
/// Sequence numbers correlate a command with the response that answers it,
/// so they must be unique for the lifetime of the process. The generator is
/// injected into the dispatcher rather than kept as a process global, which
/// lets tests pin the starting point.
#[derive(Debug)]
pub struct SequenceGenerator {
    next: AtomicU64,
}

impl SequenceGenerator {
    /// Create a generator starting at 1.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Create a generator starting at an arbitrary value.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Hand out the next sequence number. Never returns the same value twice.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SequenceGenerator {
    fn default() -> Self {
        Self::new()
    }
}
