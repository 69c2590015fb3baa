//! Frame-boundary notifications from the capture context.
//!
//! The capture side publishes one [`NotificationEvent`] per captured
//! frame through an SPSC ring. Each event carries a sequence number; the
//! receiver counts any delta other than 1 between consecutive events as a
//! sequence gap. Gaps are observability only, never an error.

use crate::error::CoreError;
use crate::ring::{self, Consumer, Producer};
use frbridge_protocol::Source;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{fence, AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// "A frame ended here."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationEvent {
    pub source: Source,
    /// Monotonic, wrapping counter assigned by the capture side.
    pub sequence: u32,
    /// Capture ring offset immediately after the frame's last byte.
    pub end_offset: u32,
}

/// Snapshot of notification channel counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyStats {
    pub pushed: u64,
    pub dropped: u64,
    pub popped: u64,
    pub sequence_gaps: u64,
}

#[derive(Default)]
struct Shared {
    pushed: AtomicU64,
    dropped: AtomicU64,
    popped: AtomicU64,
    sequence_gaps: AtomicU64,
    waiting: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

/// Creates a notification channel with the given power-of-two capacity.
pub fn channel(capacity: usize) -> Result<(NotifySender, NotifyReceiver), CoreError> {
    let (producer, consumer) = ring::channel("notification", capacity)?;
    let shared = Arc::new(Shared::default());
    Ok((
        NotifySender {
            producer,
            shared: shared.clone(),
        },
        NotifyReceiver {
            consumer,
            shared,
            last_sequence: None,
            last_delta: None,
        },
    ))
}

/// Producer half, owned by the capture context.
pub struct NotifySender {
    producer: Producer<NotificationEvent>,
    shared: Arc<Shared>,
}

impl NotifySender {
    /// Publishes an event. Returns false and counts a drop if the ring is full.
    pub fn push(&mut self, event: NotificationEvent) -> bool {
        if self.producer.push(event).is_err() {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.shared.pushed.fetch_add(1, Ordering::Relaxed);

        // pairs with the fence in NotifyReceiver::wait
        fence(Ordering::SeqCst);
        if self.shared.waiting.load(Ordering::Relaxed) {
            let _guard = self.shared.lock.lock();
            self.shared.wake.notify_one();
        }
        true
    }

    pub fn monitor(&self) -> NotifyMonitor {
        NotifyMonitor {
            shared: self.shared.clone(),
        }
    }
}

/// Consumer half, owned by the processing context.
pub struct NotifyReceiver {
    consumer: Consumer<NotificationEvent>,
    shared: Arc<Shared>,
    last_sequence: Option<u32>,
    last_delta: Option<u32>,
}

impl NotifyReceiver {
    /// Pops the next event without blocking.
    pub fn pop(&mut self) -> Option<NotificationEvent> {
        let event = self.consumer.pop()?;
        self.shared.popped.fetch_add(1, Ordering::Relaxed);

        if let Some(last) = self.last_sequence {
            let delta = event.sequence.wrapping_sub(last);
            self.last_delta = Some(delta);
            if delta != 1 {
                self.shared.sequence_gaps.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    "Notification sequence gap: {} -> {} (delta {})",
                    last,
                    event.sequence,
                    delta
                );
            }
        }
        self.last_sequence = Some(event.sequence);
        Some(event)
    }

    /// Pops the next event, waiting up to `timeout` for the producer's wake
    /// signal if the ring is empty.
    pub fn wait(&mut self, timeout: Duration) -> Option<NotificationEvent> {
        if let Some(event) = self.pop() {
            return Some(event);
        }

        {
            let mut guard = self.shared.lock.lock();
            self.shared.waiting.store(true, Ordering::Relaxed);
            fence(Ordering::SeqCst);
            if self.consumer.is_empty() {
                self.shared.wake.wait_for(&mut guard, timeout);
            }
            self.shared.waiting.store(false, Ordering::Relaxed);
        }

        self.pop()
    }

    /// Sequence delta observed on the most recent pop, `None` before the second event.
    pub fn last_delta(&self) -> Option<u32> {
        self.last_delta
    }

    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }

    pub fn monitor(&self) -> NotifyMonitor {
        NotifyMonitor {
            shared: self.shared.clone(),
        }
    }
}

/// Read-only view of the channel counters, usable from any thread.
#[derive(Clone)]
pub struct NotifyMonitor {
    shared: Arc<Shared>,
}

impl NotifyMonitor {
    pub fn stats(&self) -> NotifyStats {
        NotifyStats {
            pushed: self.shared.pushed.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            popped: self.shared.popped.load(Ordering::Relaxed),
            sequence_gaps: self.shared.sequence_gaps.load(Ordering::Relaxed),
        }
    }
}
