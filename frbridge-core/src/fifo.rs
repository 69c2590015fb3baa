//! Output frame queue feeding the host export path.
//!
//! Valid frames are pushed by the processing context and drained by the
//! export context. A push on a full queue drops the incoming frame
//! (tail-drop); queued frames are never overwritten.
//!
//! Index updates and the statistics counters change together under one
//! short critical section, so a stats snapshot always agrees with the
//! queue contents.

use crate::error::CoreError;
use crate::ring::{self, Consumer, Producer};
use frbridge_protocol::Frame;
use parking_lot::Mutex;
use std::sync::Arc;

/// Default output queue capacity.
pub const DEFAULT_FIFO_CAPACITY: usize = 256;

/// Output queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FifoStats {
    /// Frames accepted into the queue.
    pub received: u64,
    /// Frames discarded because the queue was full.
    pub dropped: u64,
    /// Frames popped for export.
    pub transmitted: u64,
}

struct Shared {
    stats: Mutex<FifoStats>,
    capacity: usize,
}

/// Creates an output queue and returns its writer and reader halves.
pub fn output_queue(capacity: usize) -> Result<(FifoWriter, FifoReader), CoreError> {
    let (producer, consumer) = ring::channel("output queue", capacity)?;
    let shared = Arc::new(Shared {
        stats: Mutex::new(FifoStats::default()),
        capacity,
    });
    Ok((
        FifoWriter {
            producer,
            shared: shared.clone(),
        },
        FifoReader { consumer, shared },
    ))
}

/// Producer half, owned by the processing context.
pub struct FifoWriter {
    producer: Producer<Frame>,
    shared: Arc<Shared>,
}

impl FifoWriter {
    /// Queues a frame; returns false and counts a drop if the queue is full.
    pub fn push(&mut self, frame: Frame) -> bool {
        let mut stats = self.shared.stats.lock();
        match self.producer.push(frame) {
            Ok(()) => {
                stats.received += 1;
                true
            }
            Err(_) => {
                stats.dropped += 1;
                false
            }
        }
    }

    pub fn stats(&self) -> FifoStats {
        *self.shared.stats.lock()
    }

    pub fn monitor(&self) -> FifoMonitor {
        FifoMonitor {
            shared: self.shared.clone(),
        }
    }
}

/// Consumer half, owned by the export context.
pub struct FifoReader {
    consumer: Consumer<Frame>,
    shared: Arc<Shared>,
}

impl FifoReader {
    pub fn pop(&mut self) -> Option<Frame> {
        let mut stats = self.shared.stats.lock();
        let frame = self.consumer.pop()?;
        stats.transmitted += 1;
        Some(frame)
    }

    /// Returns a copy of the oldest frame without removing it.
    pub fn peek(&self) -> Option<Frame> {
        let _stats = self.shared.stats.lock();
        self.consumer.peek()
    }

    pub fn len(&self) -> usize {
        self.consumer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }

    pub fn stats(&self) -> FifoStats {
        *self.shared.stats.lock()
    }

    pub fn monitor(&self) -> FifoMonitor {
        FifoMonitor {
            shared: self.shared.clone(),
        }
    }
}

/// Read-only view of the queue counters.
#[derive(Clone)]
pub struct FifoMonitor {
    shared: Arc<Shared>,
}

impl FifoMonitor {
    pub fn stats(&self) -> FifoStats {
        *self.shared.stats.lock()
    }

    /// Frames currently queued.
    pub fn depth(&self) -> u64 {
        let stats = self.stats();
        stats.received - stats.transmitted
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}
