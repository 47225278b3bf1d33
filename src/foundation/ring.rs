// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The fixed-depth slot ring shared by every stage of the pipeline.
//!
//! There are no locks on the data path. The producer cursor is a
//! monotonically increasing count of slots ever vended; a slot's position
//! is the count modulo the ring depth, and a slot's `id` is its all-time
//! sequence number (slot index + depth x generation), so late or
//! duplicated observers can detect skew without synchronization. A slot
//! becomes visible to a consumer stage only once its status word carries
//! every bit that stage requires.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

/// One slot of a ring: an identity, a status word, and the payload.
pub struct Slot<T> {
    id: AtomicU64,
    status: AtomicU32,
    cell: UnsafeCell<T>,
}

// Access to `cell` follows the status protocol below, which grants at
// most one stage mutable access at any time.
unsafe impl<T: Send> Sync for Slot<T> {}

impl<T> Slot<T> {
    fn new(index: usize, value: T) -> Slot<T> {
        Slot {
            id: AtomicU64::new(index as u64),
            status: AtomicU32::new(0),
            cell: UnsafeCell::new(value),
        }
    }

    /// The all-time monotonic sequence number of the payload currently in
    /// this slot.
    pub fn id(&self) -> u64 {
        self.id.load(Ordering::Acquire)
    }

    /// Raw status bits.
    pub fn status_bits(&self) -> u32 {
        self.status.load(Ordering::Acquire)
    }

    /// True once every bit of `bits` is present.
    pub fn has_status(&self, bits: u32) -> bool {
        self.status.load(Ordering::Acquire) & bits == bits
    }

    /// Add bits to the status word, publishing all prior payload writes.
    pub fn or_status(&self, bits: u32) {
        self.status.fetch_or(bits, Ordering::AcqRel);
    }

    /// Replace the status word outright. Only `get_vacant` should ever
    /// clear bits.
    pub fn set_status(&self, bits: u32) {
        self.status.store(bits, Ordering::Release);
    }

    /// Read the payload.
    ///
    /// # Safety
    ///
    /// The caller must have observed a status word that grants its stage
    /// read access, and the producer must not have lapped this slot. The
    /// ring depth plus the engines' lag warnings keep the latter from
    /// happening in a correctly sized system.
    pub unsafe fn get(&self) -> &T {
        &*self.cell.get()
    }

    /// Mutate the payload.
    ///
    /// # Safety
    ///
    /// The status protocol must grant the calling stage exclusive write
    /// access: a stage may only mutate a slot between observing the
    /// status its predecessor publishes and publishing its own.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut(&self) -> &mut T {
        &mut *self.cell.get()
    }
}

/// A fixed-depth ring of [Slot]s with a single producer cursor.
pub struct Ring<T> {
    slots: Box<[Slot<T>]>,
    head: CachePadded<AtomicU64>,
}

impl<T> Ring<T> {
    /// Allocate a ring of `depth` slots, each initialized by `init` with
    /// its slot index. All memory is owned here for the lifetime of the
    /// ring; slots are recycled, never freed individually.
    pub fn new(depth: usize, mut init: impl FnMut(usize) -> T) -> Ring<T> {
        assert!(depth > 0, "ring depth must be non-zero");
        let slots = (0..depth).map(|k| Slot::new(k, init(k))).collect();
        Ring {
            slots,
            head: CachePadded::new(AtomicU64::new(0)),
        }
    }

    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    /// Count of slots ever vended to the producer. A consumer holding a
    /// cursor `k` has work available whenever `k < head()`.
    pub fn head(&self) -> u64 {
        self.head.load(Ordering::Acquire)
    }

    /// The slot a monotonic cursor refers to.
    pub fn slot_at(&self, count: u64) -> &Slot<T> {
        &self.slots[(count % self.slots.len() as u64) as usize]
    }

    /// Vend the next slot to the producer: clears the status word, bumps
    /// the slot id by the ring depth and advances the cursor.
    pub fn get_vacant(&self) -> (u64, &Slot<T>) {
        let count = self.head.fetch_add(1, Ordering::AcqRel);
        let slot = self.slot_at(count);
        slot.status.store(0, Ordering::Release);
        slot.id.fetch_add(self.slots.len() as u64, Ordering::AcqRel);
        (count, slot)
    }

    /// Fraction of the ring between a consumer cursor and the producer,
    /// used by engines as their backpressure gauge.
    pub fn lag(&self, cursor: u64) -> f32 {
        let head = self.head();
        debug_assert!(cursor <= head);
        (head.saturating_sub(cursor)) as f32 / self.slots.len() as f32
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn vacancy_advances_identity_by_depth() {
        let ring: Ring<u32> = Ring::new(4, |_| 0);
        for expected in 0..10u64 {
            let (count, slot) = ring.get_vacant();
            assert_eq!(count, expected);
            // index + depth x generation
            assert_eq!(slot.id(), expected % 4 + 4 * (expected / 4 + 1));
            assert_eq!(slot.status_bits(), 0);
            slot.or_status(1);
        }
        assert_eq!(ring.head(), 10);
    }

    #[test]
    fn consumer_never_overtakes_producer() {
        // Deep enough that the producer cannot lap the consumer here.
        let ring: Ring<u64> = Ring::new(1024, |_| 0);
        let ring = Arc::new(ring);
        let active = Arc::new(AtomicBool::new(true));

        let producer = {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || {
                for value in 0..1000u64 {
                    let (_, slot) = ring.get_vacant();
                    unsafe { *slot.get_mut() = value };
                    slot.or_status(1);
                    if value % 64 == 0 {
                        std::thread::yield_now();
                    }
                }
            })
        };

        let consumer = {
            let ring = Arc::clone(&ring);
            let active = Arc::clone(&active);
            std::thread::spawn(move || {
                let mut k = 0u64;
                let mut seen = Vec::new();
                while k < 1000 {
                    while k == ring.head() && active.load(Ordering::Relaxed) {
                        std::thread::yield_now();
                    }
                    let slot = ring.slot_at(k);
                    while !slot.has_status(1) {
                        std::thread::yield_now();
                    }
                    assert!(k < ring.head());
                    seen.push(unsafe { *slot.get() });
                    k += 1;
                }
                seen
            })
        };

        producer.join().unwrap();
        let seen = consumer.join().unwrap();
        active.store(false, Ordering::Relaxed);
        // The consumer kept up in this test, so every value is intact and
        // in production order.
        assert_eq!(seen.len(), 1000);
        assert!(seen.windows(2).all(|w| w[1] == w[0] + 1));
    }

    #[test]
    fn lag_is_a_fraction_of_depth() {
        let ring: Ring<u8> = Ring::new(10, |_| 0);
        for _ in 0..9 {
            ring.get_vacant();
        }
        assert!((ring.lag(0) - 0.9).abs() < f32::EPSILON);
        assert!((ring.lag(9) - 0.0).abs() < f32::EPSILON);
    }
}
