//! Host override ring.
//!
//! A small fixed set of slots holding host-supplied replacement bytes.
//! Submitters and the trigger engine coordinate through a per-slot state
//! byte:
//!
//! ```text
//! FREE --submit--> WRITING --publish--> READY --take--> READING --> FREE
//!                     ^                   |                |
//!                     +------evict--------+                +--no match--> READY
//! ```
//!
//! A slot's contents are only read or written by whoever moved it out of
//! `FREE`/`READY` with a compare-exchange, and `READY` is published with
//! release ordering, so a half-written override is never observed.
//! When every slot is occupied the oldest ready entry is evicted.

use crate::error::CoreError;
use frbridge_protocol::MAX_PAYLOAD_BYTES;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Default number of override slots.
pub const DEFAULT_OVERRIDE_CAPACITY: usize = 4;
/// Largest supported number of override slots.
pub const MAX_OVERRIDE_CAPACITY: usize = 16;

const FREE: u8 = 0;
const WRITING: u8 = 1;
const READY: u8 = 2;
const READING: u8 = 3;

/// Replacement bytes for one target frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostOverride {
    pub id: u16,
    pub cycle_mask: u8,
    pub cycle_base: u8,
    len: u8,
    bytes: [u8; MAX_PAYLOAD_BYTES],
}

impl HostOverride {
    /// Returns `None` if `data` is longer than a payload.
    pub fn new(id: u16, cycle_mask: u8, cycle_base: u8, data: &[u8]) -> Option<Self> {
        if data.len() > MAX_PAYLOAD_BYTES {
            return None;
        }
        let mut bytes = [0u8; MAX_PAYLOAD_BYTES];
        bytes[..data.len()].copy_from_slice(data);
        Some(Self {
            id,
            cycle_mask,
            cycle_base,
            len: data.len() as u8,
            bytes,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn matches(&self, id: u16, cycle_count: u8, len: usize) -> bool {
        self.id == id && cycle_count & self.cycle_mask == self.cycle_base && self.len() == len
    }
}

/// Override ring counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverrideStats {
    pub accepted: u64,
    pub rejected: u64,
    pub evicted: u64,
    pub consumed: u64,
}

struct Slot {
    state: AtomicU8,
    seq: AtomicU64,
    value: UnsafeCell<HostOverride>,
}

/// Fixed-capacity override store shared between submitters and the engine.
pub struct OverrideRing {
    slots: Box<[Slot]>,
    next_seq: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    evicted: AtomicU64,
    consumed: AtomicU64,
}

// Slot values are accessed only by the thread that won the state CAS.
unsafe impl Send for OverrideRing {}
unsafe impl Sync for OverrideRing {}

impl OverrideRing {
    pub fn new(capacity: usize) -> Result<Self, CoreError> {
        if capacity == 0 || capacity > MAX_OVERRIDE_CAPACITY {
            return Err(CoreError::InvalidCapacity {
                what: "override ring",
                capacity,
            });
        }
        let empty = HostOverride {
            id: 0,
            cycle_mask: 0,
            cycle_base: 0,
            len: 0,
            bytes: [0; MAX_PAYLOAD_BYTES],
        };
        Ok(Self {
            slots: (0..capacity)
                .map(|_| Slot {
                    state: AtomicU8::new(FREE),
                    seq: AtomicU64::new(0),
                    value: UnsafeCell::new(empty),
                })
                .collect(),
            next_seq: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            consumed: AtomicU64::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Stores an override, evicting the oldest ready entry if every slot
    /// is taken. Fails only if all slots are mid-write or mid-read.
    pub fn push(&self, entry: HostOverride) -> Result<(), CoreError> {
        let Some(idx) = self.claim_slot() else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(CoreError::OverrideRingBusy);
        };

        let slot = &self.slots[idx];
        unsafe { *slot.value.get() = entry };
        slot.seq.store(
            self.next_seq.fetch_add(1, Ordering::Relaxed),
            Ordering::Relaxed,
        );
        slot.state.store(READY, Ordering::Release);
        self.accepted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn claim_slot(&self) -> Option<usize> {
        for _ in 0..2 * self.slots.len() {
            for (idx, slot) in self.slots.iter().enumerate() {
                if slot
                    .state
                    .compare_exchange(FREE, WRITING, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    return Some(idx);
                }
            }

            if let Some(idx) = self.oldest_ready() {
                if self.slots[idx]
                    .state
                    .compare_exchange(READY, WRITING, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    self.evicted.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("Override ring full, evicted slot {}", idx);
                    return Some(idx);
                }
            }
        }
        None
    }

    fn oldest_ready(&self) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.state.load(Ordering::Acquire) == READY)
            .min_by_key(|(_, s)| s.seq.load(Ordering::Relaxed))
            .map(|(idx, _)| idx)
    }

    /// Removes and returns the oldest override for frame `id` whose cycle
    /// predicate accepts `cycle_count` and whose length is `len`.
    pub fn try_take(&self, id: u16, cycle_count: u8, len: usize) -> Option<HostOverride> {
        let mut order = [(u64::MAX, 0usize); MAX_OVERRIDE_CAPACITY];
        let mut count = 0;
        for (idx, slot) in self.slots.iter().enumerate() {
            if slot.state.load(Ordering::Acquire) == READY {
                order[count] = (slot.seq.load(Ordering::Relaxed), idx);
                count += 1;
            }
        }
        order[..count].sort_unstable();

        for &(_, idx) in &order[..count] {
            let slot = &self.slots[idx];
            if slot
                .state
                .compare_exchange(READY, READING, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                continue;
            }

            let entry = unsafe { *slot.value.get() };
            if entry.matches(id, cycle_count, len) {
                slot.state.store(FREE, Ordering::Release);
                self.consumed.fetch_add(1, Ordering::Relaxed);
                return Some(entry);
            }
            slot.state.store(READY, Ordering::Release);
        }
        None
    }

    /// Number of overrides waiting to be consumed.
    pub fn pending(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state.load(Ordering::Acquire) == READY)
            .count()
    }

    pub(crate) fn record_rejection(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> OverrideStats {
        OverrideStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            consumed: self.consumed.load(Ordering::Relaxed),
        }
    }
}
