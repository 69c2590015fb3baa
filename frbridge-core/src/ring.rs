//! Bounded single-producer/single-consumer ring.
//!
//! The one lock-free queue used for every hand-off between execution
//! contexts. Storage is allocated once at construction; `push` and `pop`
//! never allocate or block.
//!
//! ## Memory ordering
//!
//! - Producer: writes the slot, then `Release` store of `head`.
//! - Consumer: `Acquire` load of `head` before reading the slot, then
//!   `Release` store of `tail` so the producer may reuse it.
//!
//! Indices are free-running and masked on access, so all `capacity`
//! slots are usable. The ring is full when `head - tail == capacity`.

use crate::error::CoreError;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[repr(align(64))]
struct CachePadded(AtomicUsize);

struct Ring<T> {
    buffer: Box<[UnsafeCell<MaybeUninit<T>>]>,
    head: CachePadded,
    tail: CachePadded,
    mask: usize,
}

// Slots are only touched by the single producer (between tail and head)
// or the single consumer (between head and tail); the handles enforce it.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> Ring<T> {
    fn len(&self) -> usize {
        let head = self.head.0.load(Ordering::Acquire);
        let tail = self.tail.0.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }

    fn capacity(&self) -> usize {
        self.mask + 1
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        let head = *self.head.0.get_mut();
        let mut tail = *self.tail.0.get_mut();
        while tail != head {
            unsafe { self.buffer[tail & self.mask].get_mut().assume_init_drop() };
            tail = tail.wrapping_add(1);
        }
    }
}

/// Creates a ring with the given capacity and returns its two halves.
///
/// `what` names the ring in the error returned for a capacity that is
/// zero or not a power of two.
pub fn channel<T>(
    what: &'static str,
    capacity: usize,
) -> Result<(Producer<T>, Consumer<T>), CoreError> {
    if capacity == 0 || !capacity.is_power_of_two() {
        return Err(CoreError::InvalidCapacity { what, capacity });
    }

    let buffer: Vec<UnsafeCell<MaybeUninit<T>>> = (0..capacity)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect();
    let ring = Arc::new(Ring {
        buffer: buffer.into_boxed_slice(),
        head: CachePadded(AtomicUsize::new(0)),
        tail: CachePadded(AtomicUsize::new(0)),
        mask: capacity - 1,
    });

    Ok((
        Producer { ring: ring.clone() },
        Consumer { ring },
    ))
}

/// Writing half of a ring. Not cloneable: there is exactly one producer.
pub struct Producer<T> {
    ring: Arc<Ring<T>>,
}

impl<T> Producer<T> {
    /// Pushes a value, handing it back if the ring is full.
    pub fn push(&mut self, value: T) -> Result<(), T> {
        let ring = &*self.ring;
        let head = ring.head.0.load(Ordering::Relaxed);
        let tail = ring.tail.0.load(Ordering::Acquire);

        if head.wrapping_sub(tail) >= ring.capacity() {
            return Err(value);
        }

        unsafe { (*ring.buffer[head & ring.mask].get()).write(value) };
        ring.head.0.store(head.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    pub fn is_full(&self) -> bool {
        self.ring.len() >= self.ring.capacity()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

/// Reading half of a ring. Not cloneable: there is exactly one consumer.
pub struct Consumer<T> {
    ring: Arc<Ring<T>>,
}

impl<T> Consumer<T> {
    /// Pops the oldest value, `None` if the ring is empty.
    pub fn pop(&mut self) -> Option<T> {
        let ring = &*self.ring;
        let tail = ring.tail.0.load(Ordering::Relaxed);
        let head = ring.head.0.load(Ordering::Acquire);

        if tail == head {
            return None;
        }

        let value = unsafe { (*ring.buffer[tail & ring.mask].get()).assume_init_read() };
        ring.tail.0.store(tail.wrapping_add(1), Ordering::Release);
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

impl<T: Copy> Consumer<T> {
    /// Returns a copy of the oldest value without removing it.
    pub fn peek(&self) -> Option<T> {
        let ring = &*self.ring;
        let tail = ring.tail.0.load(Ordering::Relaxed);
        let head = ring.head.0.load(Ordering::Acquire);

        if tail == head {
            return None;
        }

        Some(unsafe { (*ring.buffer[tail & ring.mask].get()).assume_init_read() })
    }
}
