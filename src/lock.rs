//! Shard locks and bucket lock guards.
//!
//! Bucket `b` of a table with `N` locks belongs to shard `b % N` and is
//! stored in that shard at index `b / N`. The shard's mutex therefore owns
//! its buckets' chains outright: holding the guard is the only way to reach
//! a record.
//!
//! ```text
//! size = 7, N = 3
//!
//! shard 0: [b0, b3, b6]
//! shard 1: [b1, b4]
//! shard 2: [b2, b5]
//! ```

use crate::chain::Link;
use crate::hashtable::HashTable;
use crate::sync::{Mutex, MutexGuard};

/// Number of buckets shard `lock` owns in a table of `size` buckets.
#[inline]
pub(crate) fn chains_for_lock(size: usize, lock: usize, num_locks: usize) -> usize {
    if lock < size {
        (size - lock).div_ceil(num_locks)
    } else {
        0
    }
}

/// The bucket chains owned by one lock.
pub(crate) struct Shard {
    pub(crate) chains: Vec<Link>,
}

impl Shard {
    pub(crate) fn empty(count: usize) -> Self {
        Self {
            chains: std::iter::repeat_with(|| None).take(count).collect(),
        }
    }
}

/// The fixed set of shard locks.
pub(crate) struct ShardLocks {
    shards: Box<[Mutex<Shard>]>,
}

impl ShardLocks {
    pub(crate) fn new(size: usize, num_locks: usize) -> Self {
        let shards = (0..num_locks)
            .map(|l| Mutex::new(Shard::empty(chains_for_lock(size, l, num_locks))))
            .collect();
        Self { shards }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.shards.len()
    }

    #[inline]
    pub(crate) fn lock(&self, lock: usize) -> MutexGuard<'_, Shard> {
        self.shards[lock].lock()
    }

    /// Acquire every shard lock in ascending order.
    pub(crate) fn lock_all(&self) -> AllShardsGuard<'_> {
        AllShardsGuard {
            guards: self.shards.iter().map(|m| m.lock()).collect(),
        }
    }

    /// Bytes used by the lock array itself.
    pub(crate) fn memory_size(&self) -> usize {
        self.shards.len() * std::mem::size_of::<Mutex<Shard>>()
    }
}

/// Every shard lock, held at once. Released on drop.
pub(crate) struct AllShardsGuard<'a> {
    guards: Vec<MutexGuard<'a, Shard>>,
}

impl AllShardsGuard<'_> {
    pub(crate) fn shards_mut(&mut self) -> impl Iterator<Item = &mut Shard> {
        self.guards.iter_mut().map(|g| &mut **g)
    }
}

/// Exclusive access to one bucket.
///
/// Obtained from [`HashTable::get_locked_bucket`]. While the guard lives the
/// bucket's chain can be searched and modified, and the table cannot be
/// resized. Every `unlocked_*` operation requires one.
pub struct HashBucketLock<'a> {
    pub(crate) table: &'a HashTable,
    bucket_num: usize,
    guard: MutexGuard<'a, Shard>,
}

impl<'a> HashBucketLock<'a> {
    pub(crate) fn new(table: &'a HashTable, bucket_num: usize, guard: MutexGuard<'a, Shard>) -> Self {
        Self {
            table,
            bucket_num,
            guard,
        }
    }

    /// The bucket this guard covers.
    #[inline]
    pub fn bucket_num(&self) -> usize {
        self.bucket_num
    }

    #[inline]
    fn slot(&self) -> usize {
        self.bucket_num / self.table.num_locks()
    }

    #[inline]
    pub(crate) fn chain(&self) -> &Link {
        &self.guard.chains[self.slot()]
    }

    #[inline]
    pub(crate) fn chain_mut(&mut self) -> &mut Link {
        let slot = self.slot();
        &mut self.guard.chains[slot]
    }
}
