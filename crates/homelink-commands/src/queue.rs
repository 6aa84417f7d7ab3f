//! Bounded outbound queue with expedited head insertion.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::command::CommandMessage;

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Queue statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    /// Commands currently queued
    pub depth: usize,
    /// Total commands admitted
    pub enqueued: u64,
    /// Admissions that went to the head
    pub expedited: u64,
    /// Entries evicted on overflow
    pub evicted: u64,
}

/// Bounded double-ended command queue.
///
/// Normal commands append at the tail; expedited switch commands insert at
/// the head so direct user intent overtakes queued background work. On
/// overflow the head entry is evicted to admit the newest, and admission
/// itself never blocks the producer.
pub struct CommandQueue {
    inner: Mutex<QueueInner>,
}

struct QueueInner {
    queue: VecDeque<CommandMessage>,
    capacity: usize,
    enqueued: u64,
    expedited: u64,
    evicted: u64,
}

impl CommandQueue {
    /// Create a queue with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                queue: VecDeque::with_capacity(capacity),
                capacity,
                enqueued: 0,
                expedited: 0,
                evicted: 0,
            }),
        }
    }

    /// Admit a command. Evicts the oldest entry when full.
    pub async fn enqueue(&self, msg: CommandMessage) {
        let mut inner = self.inner.lock().await;

        if inner.queue.len() >= inner.capacity {
            if let Some(evicted) = inner.queue.pop_front() {
                inner.evicted += 1;
                warn!(
                    device_id = %evicted.device_id,
                    kind = evicted.kind.name(),
                    "command queue full, evicting oldest entry"
                );
            }
        }

        if msg.kind.is_expedited() {
            inner.expedited += 1;
            inner.queue.push_front(msg);
        } else {
            inner.queue.push_back(msg);
        }
        inner.enqueued += 1;
    }

    /// Take the next command, if any.
    pub async fn try_dequeue(&self) -> Option<CommandMessage> {
        let mut inner = self.inner.lock().await;
        inner.queue.pop_front()
    }

    /// Current queue depth.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    /// Check if the queue is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.queue.is_empty()
    }

    /// Drop every queued command.
    pub async fn clear(&self) {
        self.inner.lock().await.queue.clear();
    }

    /// Get queue statistics.
    pub async fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().await;
        QueueStats {
            depth: inner.queue.len(),
            enqueued: inner.enqueued,
            expedited: inner.expedited,
            evicted: inner.evicted,
        }
    }
}
