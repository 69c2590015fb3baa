//! Capture rings and the capture-side context.
//!
//! Each direction has a byte-addressable circular buffer with a
//! power-of-two size. Positions are free-running `u32` byte counts, masked
//! on access. The capture side writes frame bytes at its cursor and then
//! publishes the new cursor as a [`NotificationEvent`]; the notification
//! ring's release/acquire pair makes the bytes visible to the processing
//! side before it reads them.
//!
//! Before overwriting anything the capture side also publishes how far it
//! is about to write. A reader that copied a span checks that head
//! afterwards; if it has moved more than one ring length past the span
//! start, the copy may hold newer bytes and the span is an overrun.

use crate::error::CoreError;
use crate::notify::{NotificationEvent, NotifySender};
use frbridge_protocol::{Source, MAX_FRAME_BYTES};
use std::sync::atomic::{fence, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

/// Smallest accepted capture ring.
pub const MIN_CAPTURE_RING_BYTES: usize = 2 * MAX_FRAME_BYTES;

/// Largest accepted capture ring; spans are measured in `u32`.
pub const MAX_CAPTURE_RING_BYTES: usize = 1 << 30;

/// Circular capture buffer for one direction.
pub struct CaptureRing {
    bytes: Box<[AtomicU8]>,
    mask: usize,
    head: AtomicU32,
}

impl CaptureRing {
    pub fn new(size: usize) -> Result<Self, CoreError> {
        if !(MIN_CAPTURE_RING_BYTES..=MAX_CAPTURE_RING_BYTES).contains(&size)
            || !size.is_power_of_two()
        {
            return Err(CoreError::InvalidCapacity {
                what: "capture ring",
                capacity: size,
            });
        }
        Ok(Self {
            bytes: (0..size).map(|_| AtomicU8::new(0)).collect(),
            mask: size - 1,
            head: AtomicU32::new(0),
        })
    }

    pub fn size(&self) -> usize {
        self.mask + 1
    }

    /// Reduces a position to a ring index.
    pub fn wrap(&self, position: u32) -> usize {
        position as usize & self.mask
    }

    /// Number of bytes between two positions.
    pub fn span_len(start: u32, end: u32) -> usize {
        end.wrapping_sub(start) as usize
    }

    /// Announces that bytes up to `end` are about to be written.
    fn claim(&self, end: u32) {
        self.head.store(end, Ordering::Relaxed);
        fence(Ordering::Release);
    }

    /// Writes `data` starting at `position`, wrapping at the end of the ring.
    pub fn write_at(&self, position: u32, data: &[u8]) {
        let start = self.wrap(position);
        for (i, &byte) in data.iter().enumerate() {
            self.bytes[(start + i) & self.mask].store(byte, Ordering::Relaxed);
        }
    }

    /// Copies the span `[start, start + out.len())` into `out`, wrapping.
    pub fn read_into(&self, start: u32, out: &mut [u8]) {
        let start = self.wrap(start);
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.bytes[(start + i) & self.mask].load(Ordering::Relaxed);
        }
    }

    /// True if bytes at `start` may have been overwritten by a later lap.
    /// Call after [`read_into`](Self::read_into) to validate the copy.
    pub fn overwritten(&self, start: u32) -> bool {
        fence(Ordering::Acquire);
        let head = self.head.load(Ordering::Relaxed);
        Self::span_len(start, head) > self.size()
    }
}

/// State owned by the capture execution context.
pub struct CaptureContext {
    rings: [Arc<CaptureRing>; 2],
    cursors: [u32; 2],
    sequence: u32,
    notifications: NotifySender,
}

impl CaptureContext {
    pub fn new(ring_bytes: usize, notifications: NotifySender) -> Result<Self, CoreError> {
        Ok(Self {
            rings: [
                Arc::new(CaptureRing::new(ring_bytes)?),
                Arc::new(CaptureRing::new(ring_bytes)?),
            ],
            cursors: [0; 2],
            sequence: 0,
            notifications,
        })
    }

    /// Shared handles to the ECU and vehicle rings, in that order.
    pub fn rings(&self) -> [Arc<CaptureRing>; 2] {
        self.rings.clone()
    }

    /// Deposits one frame's bytes into the ring for `source` and publishes
    /// its end position.
    ///
    /// Returns whether the notification was accepted. The sequence number
    /// advances either way so the consumer sees dropped notifications as
    /// a gap.
    pub fn capture_frame(&mut self, source: Source, bytes: &[u8]) -> Result<bool, CoreError> {
        let idx = source.index().ok_or(CoreError::UnknownSource)?;
        let ring = &self.rings[idx];

        let end = self.cursors[idx].wrapping_add(bytes.len() as u32);
        ring.claim(end);
        ring.write_at(self.cursors[idx], bytes);
        self.cursors[idx] = end;

        let event = NotificationEvent {
            source,
            sequence: self.sequence,
            end_offset: end,
        };
        self.sequence = self.sequence.wrapping_add(1);

        let accepted = self.notifications.push(event);
        if !accepted {
            tracing::trace!("Notification dropped: seq={}", event.sequence);
        }
        Ok(accepted)
    }

    /// Advances the cursor for `source` without publishing, as when the
    /// capture engine discards a partial frame.
    pub fn skip(&mut self, source: Source, len: usize) -> Result<(), CoreError> {
        let idx = source.index().ok_or(CoreError::UnknownSource)?;
        let end = self.cursors[idx].wrapping_add(len as u32);
        self.rings[idx].claim(end);
        self.cursors[idx] = end;
        Ok(())
    }

    pub fn next_sequence(&self) -> u32 {
        self.sequence
    }

    pub fn notifications(&self) -> &NotifySender {
        &self.notifications
    }
}
