//! Correlation of outbound sequence numbers with inbound acknowledgments.
//!
//! The table is the only structure shared between the outbound dispatcher
//! and the inbound processor, so it must support concurrent read/write
//! without external locking.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;

/// Correlation state for one in-flight sequence number.
#[derive(Debug)]
struct Pending {
    /// One-shot release signal; present only while a dispatch cycle waits.
    signal: Option<oneshot::Sender<()>>,
    /// Total send attempts so far, counting the first.
    attempts: u32,
    /// Command kind label, kept for inbound handling and logging.
    kind: String,
}

/// Concurrent map from sequence number to acknowledgment state.
///
/// Entries exist only for commands that expect a correlated response;
/// bulk-refresh sends are never tracked. Release is remove-then-signal,
/// so a signal fires at most once per entry.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    pending: DashMap<u64, Pending>,
}

impl CorrelationTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the acknowledgment signal for a sequence ahead of a send.
    ///
    /// First arm creates the entry with the attempt counter at 1; arming an
    /// existing entry is a retry of the same sequence and counts another
    /// attempt. The returned receiver resolves when the entry is
    /// acknowledged and errors when the entry is dropped unacknowledged.
    pub fn arm(&self, sequence: u64, kind: &str) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        match self.pending.entry(sequence) {
            Entry::Occupied(mut occupied) => {
                let pending = occupied.get_mut();
                pending.attempts += 1;
                pending.signal = Some(tx);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Pending {
                    signal: Some(tx),
                    attempts: 1,
                    kind: kind.to_string(),
                });
            }
        }
        rx
    }

    /// Record a send that expects a later correlated response but blocks
    /// nobody (streaming/telemetry activation).
    pub fn track(&self, sequence: u64, kind: &str) {
        self.pending.entry(sequence).or_insert(Pending {
            signal: None,
            attempts: 1,
            kind: kind.to_string(),
        });
    }

    /// Release the entry for a sequence, waking its waiter if one exists.
    ///
    /// Returns the recorded kind label, or `None` when the sequence is
    /// unknown (already released, never tracked, or cleared by a stop).
    pub fn acknowledge(&self, sequence: u64) -> Option<String> {
        let (_, mut pending) = self.pending.remove(&sequence)?;
        if let Some(signal) = pending.signal.take() {
            let _ = signal.send(());
        }
        Some(pending.kind)
    }

    /// Send attempts so far for a sequence; 0 when the entry is absent.
    pub fn attempts(&self, sequence: u64) -> u32 {
        self.pending
            .get(&sequence)
            .map(|pending| pending.attempts)
            .unwrap_or(0)
    }

    /// Whether a sequence is still pending.
    pub fn contains(&self, sequence: u64) -> bool {
        self.pending.contains_key(&sequence)
    }

    /// Drop an entry without waking its waiter.
    pub fn remove(&self, sequence: u64) {
        self.pending.remove(&sequence);
    }

    /// Drop every entry. Waiters observe the dropped signal and abandon.
    pub fn clear(&self) {
        self.pending.clear();
    }

    /// Number of pending entries.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acknowledge_releases_waiter() {
        let table = CorrelationTable::new();
        let rx = table.arm(7, "switch");

        assert_eq!(table.acknowledge(7).as_deref(), Some("switch"));
        assert!(rx.await.is_ok());
        assert!(!table.contains(7));
    }

    #[tokio::test]
    async fn test_acknowledge_unknown_sequence_is_none() {
        let table = CorrelationTable::new();
        assert_eq!(table.acknowledge(99), None);
    }

    #[tokio::test]
    async fn test_rearm_counts_attempts() {
        let table = CorrelationTable::new();

        let _rx1 = table.arm(3, "brightness");
        assert_eq!(table.attempts(3), 1);

        let _rx2 = table.arm(3, "brightness");
        let _rx3 = table.arm(3, "brightness");
        assert_eq!(table.attempts(3), 3);
    }

    #[tokio::test]
    async fn test_rearm_invalidates_previous_receiver() {
        let table = CorrelationTable::new();

        let rx1 = table.arm(5, "switch");
        let rx2 = table.arm(5, "switch");

        assert!(table.acknowledge(5).is_some());
        // The superseded receiver sees its sender dropped, not a release.
        assert!(rx1.await.is_err());
        assert!(rx2.await.is_ok());
    }

    #[tokio::test]
    async fn test_tracked_entry_has_no_waiter() {
        let table = CorrelationTable::new();
        table.track(11, "streaming_activate");

        assert!(table.contains(11));
        assert_eq!(table.acknowledge(11).as_deref(), Some("streaming_activate"));
    }

    #[tokio::test]
    async fn test_clear_drops_waiters() {
        let table = CorrelationTable::new();
        let rx = table.arm(1, "switch");
        table.track(2, "streaming_activate");

        table.clear();
        assert_eq!(table.pending_count(), 0);
        assert!(rx.await.is_err());
    }
}
