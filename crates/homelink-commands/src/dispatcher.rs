//! Outbound dispatch loop: sequence assignment, send, ack wait, retry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use homelink_core::{CorrelationTable, SequenceGenerator};

use crate::command::{CommandMessage, DispatchClass};
use crate::queue::{CommandQueue, DEFAULT_QUEUE_CAPACITY};
use crate::router::TransportRouter;
use crate::transport::AccessMode;

/// Dispatcher tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// How long one cycle waits for an acknowledgment, in milliseconds
    pub ack_timeout_ms: u64,
    /// Total send attempts per tracked command, counting the first
    pub max_attempts: u32,
    /// Poll interval while the queue is empty
    pub poll_interval_ms: u64,
    /// Outbound queue capacity
    pub queue_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 1000,
            max_attempts: 3,
            poll_interval_ms: 50,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Dispatcher counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherStats {
    /// Tracked commands acknowledged in time
    pub acknowledged: u64,
    /// Tracked commands dropped after the final attempt
    pub dropped: u64,
}

/// Single-consumer dispatcher draining the outbound queue.
///
/// Any number of producer tasks may call [`queue_message`]; exactly one
/// consumer loop runs the processing cycle, so at most one tracked command
/// is in flight awaiting acknowledgment at a time. Failures never propagate
/// to producers; repeated delivery failure is logged and the command is
/// dropped.
///
/// [`queue_message`]: CommandDispatcher::queue_message
#[derive(Clone)]
pub struct CommandDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    config: DispatcherConfig,
    queue: CommandQueue,
    router: Arc<TransportRouter>,
    correlation: Arc<CorrelationTable>,
    sequences: Arc<SequenceGenerator>,
    running: RwLock<bool>,
    task_handle: RwLock<Option<JoinHandle<()>>>,
    acknowledged: AtomicU64,
    dropped: AtomicU64,
}

impl CommandDispatcher {
    /// Create a dispatcher over a router, the shared correlation table and
    /// an injected sequence generator.
    pub fn new(
        router: Arc<TransportRouter>,
        correlation: Arc<CorrelationTable>,
        sequences: Arc<SequenceGenerator>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                queue: CommandQueue::new(config.queue_capacity),
                config,
                router,
                correlation,
                sequences,
                running: RwLock::new(false),
                task_handle: RwLock::new(None),
                acknowledged: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Admit a command from any producer context.
    ///
    /// Never blocks and reports nothing back; on overflow the oldest
    /// queued command is evicted.
    pub async fn queue_message(&self, msg: CommandMessage) {
        self.inner.queue.enqueue(msg).await;
    }

    /// Start the consumer loop under the given access mode.
    pub async fn start(&self, mode: AccessMode) {
        let mut running = self.inner.running.write().await;
        if *running {
            return;
        }
        *running = true;
        drop(running);

        self.inner.router.set_mode(mode).await;

        let inner = self.inner.clone();
        let poll_interval = Duration::from_millis(self.inner.config.poll_interval_ms);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            loop {
                {
                    let running = inner.running.read().await;
                    if !*running {
                        break;
                    }
                }

                // Drain back-to-back while work is queued; idle-tick otherwise.
                if !inner.process_next().await {
                    interval.tick().await;
                }
            }
        });

        let mut task = self.inner.task_handle.write().await;
        *task = Some(handle);
    }

    /// Stop the loop and abandon everything in flight.
    ///
    /// Clears the queue and the correlation table; a cycle blocked on an
    /// ack timeout observes the stop when the timeout elapses and does not
    /// retry.
    pub async fn stop(&self) {
        {
            let mut running = self.inner.running.write().await;
            *running = false;
        }
        self.inner.queue.clear().await;
        self.inner.correlation.clear();

        let mut task = self.inner.task_handle.write().await;
        if let Some(handle) = task.take() {
            drop(task);
            handle.await.ok();
        }
    }

    /// Check if the consumer loop is running.
    pub async fn is_running(&self) -> bool {
        *self.inner.running.read().await
    }

    /// Run one processing cycle. Returns false when the queue was empty.
    ///
    /// Exposed so an external scheduler (or a test) can drive cycles
    /// deterministically instead of relying on the spawned loop.
    pub async fn process_next(&self) -> bool {
        self.inner.process_next().await
    }

    /// Get queue statistics.
    pub async fn queue_stats(&self) -> crate::queue::QueueStats {
        self.inner.queue.stats().await
    }

    /// Get dispatcher counters.
    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            acknowledged: self.inner.acknowledged.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
        }
    }
}

impl DispatcherInner {
    async fn process_next(&self) -> bool {
        let Some(mut msg) = self.queue.try_dequeue().await else {
            return false;
        };

        // Sequence is assigned exactly once; retries keep their number.
        let sequence = match msg.sequence {
            Some(sequence) => sequence,
            None => {
                let sequence = self.sequences.next();
                msg.sequence = Some(sequence);
                sequence
            }
        };

        match msg.kind.dispatch_class() {
            DispatchClass::BulkRefresh => {
                self.router.send(&msg).await;
            }
            DispatchClass::Streaming => {
                self.correlation.track(sequence, msg.kind.name());
                self.router.send(&msg).await;
            }
            DispatchClass::Tracked => {
                self.dispatch_tracked(msg, sequence).await;
            }
        }
        true
    }

    async fn dispatch_tracked(&self, msg: CommandMessage, sequence: u64) {
        let released = self.correlation.arm(sequence, msg.kind.name());

        if !self.router.send(&msg).await {
            // Nothing will ever answer a send that no transport accepted.
            self.correlation.remove(sequence);
            return;
        }

        let wait = Duration::from_millis(self.config.ack_timeout_ms);
        match tokio::time::timeout(wait, released).await {
            Ok(Ok(())) => {
                self.acknowledged.fetch_add(1, Ordering::Relaxed);
                debug!(sequence, kind = msg.kind.name(), "command acknowledged");
            }
            Ok(Err(_)) => {
                // Entry dropped from the table while we waited: the
                // dispatcher was stopped or the entry was superseded.
                debug!(sequence, "acknowledgment wait abandoned");
            }
            Err(_elapsed) => self.handle_ack_timeout(msg, sequence).await,
        }
    }

    async fn handle_ack_timeout(&self, msg: CommandMessage, sequence: u64) {
        {
            let running = self.running.read().await;
            if !*running {
                debug!(sequence, "dispatcher stopped during ack wait, abandoning");
                self.correlation.remove(sequence);
                return;
            }
        }

        // A late acknowledgment may have raced the timeout.
        if !self.correlation.contains(sequence) {
            self.acknowledged.fetch_add(1, Ordering::Relaxed);
            debug!(sequence, "acknowledged just after timeout");
            return;
        }

        let attempts = self.correlation.attempts(sequence);
        if attempts >= self.config.max_attempts {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            self.correlation.remove(sequence);
            warn!(
                device_id = %msg.device_id,
                kind = msg.kind.name(),
                sequence,
                attempts,
                "no acknowledgment after final attempt, dropping command"
            );
        } else {
            debug!(sequence, attempts, "acknowledgment timed out, re-queueing");
            self.queue.enqueue(msg).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandKind, SwitchState};
    use crate::transport::{
        CloudEnvelope, CloudTransport, LocalTransport, RefreshTransport, TransportError,
    };
    use async_trait::async_trait;
    use homelink_codec::LocalCommandEnvelope;
    use homelink_core::{DeviceDirectory, DeviceInfo};
    use std::sync::Mutex;

    /// Local transport that records device ids and optionally acknowledges
    /// the correlation table right away, standing in for a fast device.
    struct FakeLocal {
        sent: Mutex<Vec<String>>,
        ack_via: Option<Arc<CorrelationTable>>,
    }

    #[async_trait]
    impl LocalTransport for FakeLocal {
        async fn send_local(
            &self,
            _url: &str,
            envelope: &LocalCommandEnvelope,
        ) -> Result<(), TransportError> {
            self.sent
                .lock()
                .unwrap()
                .push(envelope.device_id.clone());
            if let Some(table) = &self.ack_via {
                let sequence: u64 = envelope.sequence.parse().unwrap();
                let _ = table.acknowledge(sequence);
            }
            Ok(())
        }
    }

    struct NoCloud;

    #[async_trait]
    impl CloudTransport for NoCloud {
        async fn send_cloud(&self, _envelope: &CloudEnvelope) -> Result<(), TransportError> {
            Err(TransportError::NotConnected)
        }
    }

    #[derive(Default)]
    struct RecordingRefresh {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RefreshTransport for RecordingRefresh {
        async fn send_bulk_refresh(&self, device_id: &str) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(device_id.to_string());
            Ok(())
        }
    }

    struct AllLocal;

    impl DeviceDirectory for AllLocal {
        fn device_info(&self, device_id: &str) -> Option<DeviceInfo> {
            Some(
                DeviceInfo::new(device_id, "key")
                    .with_local_ip("192.168.1.30")
                    .with_local_capable(true),
            )
        }
    }

    struct Fixture {
        dispatcher: CommandDispatcher,
        correlation: Arc<CorrelationTable>,
        local: Arc<FakeLocal>,
        refresh: Arc<RecordingRefresh>,
    }

    fn fixture(acking: bool) -> Fixture {
        let correlation = Arc::new(CorrelationTable::new());
        let local = Arc::new(FakeLocal {
            sent: Mutex::new(Vec::new()),
            ack_via: acking.then(|| correlation.clone()),
        });
        let refresh = Arc::new(RecordingRefresh::default());
        let router = Arc::new(TransportRouter::new(
            local.clone(),
            Arc::new(NoCloud),
            refresh.clone(),
            Arc::new(AllLocal),
        ));
        router.set_connected(true, false);

        let config = DispatcherConfig {
            ack_timeout_ms: 20,
            poll_interval_ms: 5,
            ..Default::default()
        };
        let dispatcher = CommandDispatcher::new(
            router,
            correlation.clone(),
            Arc::new(SequenceGenerator::new()),
            config,
        );
        Fixture {
            dispatcher,
            correlation,
            local,
            refresh,
        }
    }

    fn switch_on(device: &str) -> CommandMessage {
        CommandMessage::new(
            device,
            CommandKind::Switch {
                switch: SwitchState::On,
            },
        )
    }

    #[tokio::test]
    async fn test_acknowledged_command_is_sent_once() {
        let f = fixture(true);
        f.dispatcher.queue_message(switch_on("dev1")).await;

        assert!(f.dispatcher.process_next().await);
        assert!(!f.dispatcher.process_next().await);

        assert_eq!(f.local.sent.lock().unwrap().len(), 1);
        assert_eq!(f.correlation.pending_count(), 0);
        assert_eq!(f.dispatcher.stats().acknowledged, 1);
    }

    #[tokio::test]
    async fn test_unacknowledged_command_stops_after_three_attempts() {
        let f = fixture(false);
        // Drive cycles by hand while the dispatcher counts as running, so
        // the timeout path retries instead of abandoning.
        *f.dispatcher.inner.running.write().await = true;
        f.dispatcher.queue_message(switch_on("dev1")).await;

        // Each cycle times out and re-queues until the attempt cap.
        assert!(f.dispatcher.process_next().await);
        assert!(f.dispatcher.process_next().await);
        assert!(f.dispatcher.process_next().await);
        // Dropped after the third attempt; nothing left to process.
        assert!(!f.dispatcher.process_next().await);

        assert_eq!(f.local.sent.lock().unwrap().len(), 3);
        assert_eq!(f.correlation.pending_count(), 0);
        assert_eq!(f.dispatcher.stats().dropped, 1);
    }

    #[tokio::test]
    async fn test_retries_keep_the_same_sequence() {
        let f = fixture(false);
        *f.dispatcher.inner.running.write().await = true;
        let mut msg = switch_on("dev1");
        msg.sequence = Some(77);
        f.dispatcher.queue_message(msg).await;

        f.dispatcher.process_next().await;
        f.dispatcher.process_next().await;

        // Still pending under the original sequence, two attempts in.
        assert_eq!(f.correlation.attempts(77), 2);
    }

    #[tokio::test]
    async fn test_streaming_send_does_not_block() {
        let f = fixture(false);
        f.dispatcher
            .queue_message(CommandMessage::new(
                "dev1",
                CommandKind::StreamingActivate { seconds: 120 },
            ))
            .await;

        let started = std::time::Instant::now();
        assert!(f.dispatcher.process_next().await);
        assert!(started.elapsed() < Duration::from_millis(20));

        // Tracked for later correlation, but nobody waits on it.
        assert_eq!(f.correlation.pending_count(), 1);
        assert_eq!(f.local.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bulk_refresh_is_untracked() {
        let f = fixture(false);
        f.dispatcher
            .queue_message(CommandMessage::new("dev1", CommandKind::Refresh))
            .await;

        assert!(f.dispatcher.process_next().await);
        assert_eq!(f.refresh.sent.lock().unwrap().as_slice(), ["dev1"]);
        assert_eq!(f.correlation.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_expedited_switch_dispatches_ahead_of_queued_telemetry() {
        let f = fixture(true);
        f.dispatcher
            .queue_message(CommandMessage::new(
                "other1",
                CommandKind::StreamingActivate { seconds: 60 },
            ))
            .await;
        f.dispatcher
            .queue_message(CommandMessage::new(
                "other2",
                CommandKind::StreamingActivate { seconds: 60 },
            ))
            .await;
        f.dispatcher.queue_message(switch_on("device-d")).await;

        f.dispatcher.process_next().await;

        assert_eq!(f.local.sent.lock().unwrap()[0], "device-d");
    }

    #[tokio::test]
    async fn test_refused_send_is_not_retried() {
        let f = fixture(false);
        // Neither transport is up, so the router refuses the send.
        let router = Arc::new(TransportRouter::new(
            f.local.clone(),
            Arc::new(NoCloud),
            f.refresh.clone(),
            Arc::new(AllLocal),
        ));
        let dispatcher = CommandDispatcher::new(
            router,
            f.correlation.clone(),
            Arc::new(SequenceGenerator::new()),
            DispatcherConfig {
                ack_timeout_ms: 20,
                ..Default::default()
            },
        );

        dispatcher.queue_message(switch_on("dev1")).await;
        assert!(dispatcher.process_next().await);

        // Dropped immediately: no correlation entry, no re-queue.
        assert_eq!(f.correlation.pending_count(), 0);
        assert!(!dispatcher.process_next().await);
    }

    #[tokio::test]
    async fn test_stop_clears_queue_and_correlation() {
        let f = fixture(false);
        f.dispatcher.start(AccessMode::Mixed).await;
        assert!(f.dispatcher.is_running().await);

        f.dispatcher.queue_message(switch_on("dev1")).await;
        f.dispatcher.queue_message(switch_on("dev2")).await;

        f.dispatcher.stop().await;
        assert!(!f.dispatcher.is_running().await);
        assert_eq!(f.dispatcher.queue_stats().await.depth, 0);
        assert_eq!(f.correlation.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_started_loop_drains_the_queue() {
        let f = fixture(true);
        f.dispatcher.start(AccessMode::Mixed).await;

        f.dispatcher.queue_message(switch_on("dev1")).await;
        f.dispatcher.queue_message(switch_on("dev2")).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        f.dispatcher.stop().await;

        assert_eq!(f.local.sent.lock().unwrap().len(), 2);
        assert_eq!(f.dispatcher.stats().acknowledged, 2);
    }
}
