//! Online resizing.
//!
//! Bucket counts come from a ladder of primes, each roughly double the
//! last. [`select_size`] picks a rung for the current item count with some
//! hysteresis so a table hovering near a boundary does not flip between
//! two sizes. [`HashTable::resize_to`] rebuilds the bucket array under every
//! shard lock.

use crate::chain;
use crate::config::MAX_SIZE;
use crate::hashtable::HashTable;
use crate::lock::{Shard, chains_for_lock};
use crate::metrics::{RESIZES, RESIZES_SKIPPED};
use crate::status::ResizeOutcome;
use crate::sync::Ordering;
use tracing::debug;

/// Bucket counts a table resizes between.
pub const PRIME_SIZE_TABLE: [usize; 30] = [
    3, 7, 13, 23, 47, 97, 193, 383, 769, 1531, 3079, 6143, 12289, 24571, 49157, 98299, 196613,
    393209, 786433, 1572869, 3145721, 6291449, 12582917, 25165813, 50331653, 100663291,
    201326611, 402653189, 805306357, 1610612741,
];

fn distance(a: usize, b: usize) -> usize {
    a.max(b) - a.min(b)
}

fn nearest(n: usize, a: usize, b: usize) -> usize {
    if distance(n, a) < distance(b, n) { a } else { b }
}

/// Pick a bucket count for `num_items` items in a table currently of
/// `current` buckets that must never shrink below `initial`.
pub fn select_size(current: usize, num_items: usize, initial: usize) -> usize {
    let i = PRIME_SIZE_TABLE
        .iter()
        .position(|&p| p >= num_items)
        .unwrap_or(PRIME_SIZE_TABLE.len());

    if i == PRIME_SIZE_TABLE.len() {
        PRIME_SIZE_TABLE[i - 1]
    } else if PRIME_SIZE_TABLE[i] < initial {
        initial
    } else if i == 0 {
        PRIME_SIZE_TABLE[0]
    } else if current == PRIME_SIZE_TABLE[i - 1] || current == PRIME_SIZE_TABLE[i] {
        current
    } else {
        nearest(num_items, PRIME_SIZE_TABLE[i - 1], PRIME_SIZE_TABLE[i])
    }
}

impl HashTable {
    /// Resize to the ladder size suited to the number of in-memory items.
    /// Records whose values were evicted do not count.
    pub fn resize(&self) -> ResizeOutcome {
        let target = select_size(
            self.size(),
            self.stats.num_in_memory_items(),
            self.initial_size,
        );
        self.resize_to(target)
    }

    /// Rebuild the bucket array with `new_size` buckets.
    ///
    /// Skipped, without waiting, if any visitor is registered. Records are
    /// relinked at the head of their new bucket, so chain order is not
    /// preserved.
    ///
    /// # Panics
    ///
    /// Panics if the table has been deactivated or `new_size` is zero.
    pub fn resize_to(&self, new_size: usize) -> ResizeOutcome {
        assert!(
            self.is_active(),
            "HashTable::resize: cannot call on a non-active object"
        );
        assert!(new_size > 0, "HashTable::resize: size must be non-zero");

        if new_size > MAX_SIZE {
            RESIZES_SKIPPED.increment();
            debug!(new_size, "resize skipped: size too large");
            return ResizeOutcome::TooLarge;
        }

        let mut all = self.shards.lock_all();
        let old_size = self.size();
        if new_size == old_size {
            return ResizeOutcome::Unchanged;
        }
        if self.visitors.active() > 0 {
            RESIZES_SKIPPED.increment();
            debug!(
                old_size,
                new_size,
                visitors = self.visitors.active(),
                "resize skipped: visitors active"
            );
            return ResizeOutcome::VisitorsActive;
        }

        self.engine.reduce_mem_overhead(self.memory_size());
        self.stats.incr_resizes();

        let num_locks = self.num_locks();
        let mut fresh: Vec<Shard> = (0..num_locks)
            .map(|l| Shard::empty(chains_for_lock(new_size, l, num_locks)))
            .collect();

        for shard in all.shards_mut() {
            for mut head in shard.chains.drain(..) {
                while let Some(mut v) = head {
                    head = v.next.take();
                    let bucket = (v.key().hash() % new_size as u64) as usize;
                    chain::push_front(&mut fresh[bucket % num_locks].chains[bucket / num_locks], v);
                }
            }
        }
        for (shard, rebuilt) in all.shards_mut().zip(fresh) {
            *shard = rebuilt;
        }

        self.size.store(new_size, Ordering::Release);
        self.engine.increase_mem_overhead(self.memory_size());
        RESIZES.increment();
        debug!(
            old_size,
            new_size,
            items = self.stats.num_items(),
            "resized hashtable"
        );
        ResizeOutcome::Resized {
            from: old_size,
            to: new_size,
        }
    }
}
