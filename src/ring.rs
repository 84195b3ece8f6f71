//! Receive ring
//!
//! A single-producer, single-consumer ring of received bytes, with a second
//! ring of arrival timestamps that shares the same indices. It is opinionated
//! for the following case:
//!
//! * The producer is the UART receive interrupt, the consumer is the polling
//!   loop
//! * The target may not have CAS atomics, so only `load` and `store` are used
//!   for synchronization
//!
//! The Rules:
//!
//! * ONLY the producer writes `head`, and ONLY the consumer writes `tail`.
//! * A slot in `head..tail` (mod `N`) belongs to the consumer. The producer
//!   MUST NOT touch it until `tail` has moved past it.
//! * The producer writes the byte AND the timestamp of a slot before
//!   publishing it with a `Release` store of `head`, so the two rings always
//!   hold the same number of elements.
//!
//! When the ring is full, the newest byte is dropped and counted.

use core::{
    ptr::{read_volatile, write_volatile},
    sync::atomic::{AtomicU32, AtomicUsize, Ordering},
};

use grounded::uninit::GroundedArrayCell;

use crate::clock::Tick;

/// A received byte and the tick it arrived at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
pub struct TimestampedByte {
    /// The received byte
    pub byte: u8,
    /// The millisecond tick sampled in the receive interrupt
    pub arrival: Tick,
}

/// Storage for up to `N` received bytes. `N` must be a power of two.
pub(crate) struct RxRing<const N: usize> {
    bytes: GroundedArrayCell<u8, N>,
    stamps: GroundedArrayCell<Tick, N>,
    // Free running counters, reduced mod N on access
    head: AtomicUsize,
    tail: AtomicUsize,
    overflows: AtomicU32,
}

// SAFETY: slot access follows the single-producer/single-consumer rules above,
// which the owning ports enforce through `&mut self`.
unsafe impl<const N: usize> Sync for RxRing<N> {}

impl<const N: usize> RxRing<N> {
    const POW2: () = assert!(N.is_power_of_two(), "ring size must be a power of two");
    const MASK: usize = N - 1;

    pub(crate) const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::POW2;
        Self {
            bytes: GroundedArrayCell::uninit(),
            stamps: GroundedArrayCell::uninit(),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            overflows: AtomicU32::new(0),
        }
    }

    /// Number of bytes waiting
    pub(crate) fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) const fn capacity(&self) -> usize {
        N
    }

    /// Bytes dropped because the ring was full
    pub(crate) fn overflows(&self) -> u32 {
        self.overflows.load(Ordering::Relaxed)
    }

    pub(crate) fn clear_overflows(&self) {
        self.overflows.store(0, Ordering::Relaxed);
    }

    /// Push one byte. Returns `false` if the ring was full and the byte was
    /// dropped.
    ///
    /// ## Safety
    ///
    /// Must only be called from the single producer context.
    pub(crate) unsafe fn push(&self, byte: u8, arrival: Tick) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head.wrapping_sub(tail) >= N {
            let ct = self.overflows.load(Ordering::Relaxed);
            self.overflows.store(ct.wrapping_add(1), Ordering::Relaxed);
            return false;
        }
        let idx = head & Self::MASK;
        write_volatile(self.bytes.as_mut_ptr().add(idx), byte);
        write_volatile(self.stamps.as_mut_ptr().add(idx), arrival);
        self.head.store(head.wrapping_add(1), Ordering::Release);
        true
    }

    /// Pop the oldest byte
    ///
    /// ## Safety
    ///
    /// Must only be called from the single consumer context.
    pub(crate) unsafe fn pop(&self) -> Option<TimestampedByte> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let idx = tail & Self::MASK;
        let byte = read_volatile(self.bytes.as_mut_ptr().add(idx));
        let arrival = read_volatile(self.stamps.as_mut_ptr().add(idx));
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        Some(TimestampedByte { byte, arrival })
    }

    /// Drop everything currently queued
    ///
    /// ## Safety
    ///
    /// Must only be called from the single consumer context.
    pub(crate) unsafe fn drain(&self) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        self.tail.store(head, Ordering::Release);
        head.wrapping_sub(tail)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fifo_order_with_stamps() {
        let ring = RxRing::<4>::new();
        unsafe {
            assert!(ring.push(0x55, Tick(1)));
            assert!(ring.push(0xFF, Tick(2)));
            assert_eq!(ring.len(), 2);
            assert_eq!(
                ring.pop(),
                Some(TimestampedByte {
                    byte: 0x55,
                    arrival: Tick(1)
                })
            );
            assert_eq!(
                ring.pop(),
                Some(TimestampedByte {
                    byte: 0xFF,
                    arrival: Tick(2)
                })
            );
            assert_eq!(ring.pop(), None);
        }
    }

    #[test]
    fn zero_byte_is_not_empty() {
        let ring = RxRing::<4>::new();
        unsafe {
            assert!(ring.push(0x00, Tick(9)));
            assert_eq!(ring.pop().map(|b| b.byte), Some(0x00));
            assert_eq!(ring.pop(), None);
        }
    }

    #[test]
    fn overflow_drops_newest() {
        let ring = RxRing::<4>::new();
        unsafe {
            for i in 0..4u8 {
                assert!(ring.push(i, Tick(i as u32)));
            }
            assert!(!ring.push(0xAA, Tick(100)));
            assert!(!ring.push(0xBB, Tick(101)));
            assert_eq!(ring.overflows(), 2);
            assert_eq!(ring.len(), ring.capacity());

            for i in 0..4u8 {
                let got = ring.pop().unwrap();
                assert_eq!(got.byte, i);
                assert_eq!(got.arrival, Tick(i as u32));
            }
            assert!(ring.is_empty());
        }
    }

    #[test]
    fn wraps_many_times() {
        let ring = RxRing::<8>::new();
        unsafe {
            for i in 0..1000u32 {
                assert!(ring.push(i as u8, Tick(i)));
                assert!(ring.push((i + 1) as u8, Tick(i + 1)));
                assert_eq!(ring.pop().unwrap().arrival, Tick(i));
                assert_eq!(ring.pop().unwrap().arrival, Tick(i + 1));
            }
            assert_eq!(ring.overflows(), 0);
        }
    }

    #[test]
    fn drain_discards() {
        let ring = RxRing::<8>::new();
        unsafe {
            ring.push(1, Tick(0));
            ring.push(2, Tick(0));
            assert_eq!(ring.drain(), 2);
            assert!(ring.is_empty());
        }
    }
}
