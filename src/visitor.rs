//! Full-table traversal.
//!
//! Two kinds of visitor walk a table:
//!
//! - [`HashTableVisitor`] sees every record through a [`VisitEntry`] and
//!   may pause the walk by returning `false`.
//! - [`HashTableDepthVisitor`] sees every bucket as (bucket, chain depth,
//!   bytes).
//!
//! While any visitor is registered the table will not resize. Registration
//! happens under shard lock 0, so a resize (which holds every shard lock)
//! either sees the visitor or finishes before it starts.
//!
//! [`HashTable::pause_resume_visit`] locks one bucket at a time and returns
//! a [`Position`] to continue from. Chain position is never saved: a resumed
//! walk starts at the bucket after the one it paused in.

use crate::chain::Link;
use crate::eviction::EvictionPolicy;
use crate::hashtable::HashTable;
use crate::metrics::VISITOR_PASSES;
use crate::stored_value::StoredValue;
use crate::sync::{AtomicUsize, Condvar, Mutex, Ordering};
use std::fmt;
use tracing::trace;

/// Per-record callback for a table walk.
pub trait HashTableVisitor {
    /// Visit one record. Return `false` to pause the walk.
    fn visit(&mut self, entry: &mut VisitEntry<'_>) -> bool;
}

impl<F> HashTableVisitor for F
where
    F: FnMut(&mut VisitEntry<'_>) -> bool,
{
    fn visit(&mut self, entry: &mut VisitEntry<'_>) -> bool {
        self(entry)
    }
}

/// Per-bucket callback for a depth walk.
pub trait HashTableDepthVisitor {
    /// Visit bucket `bucket`, whose chain holds `depth` records using `mem`
    /// bytes.
    fn visit(&mut self, bucket: usize, depth: usize, mem: usize);
}

/// A record under visit, with its bucket locked.
///
/// Besides reading and updating the record, the visitor may evict or
/// soft-delete it with the table's accounting applied.
pub struct VisitEntry<'a> {
    table: &'a HashTable,
    bucket: usize,
    link: &'a mut Link,
    removed: bool,
}

impl<'a> VisitEntry<'a> {
    pub(crate) fn new(table: &'a HashTable, bucket: usize, link: &'a mut Link) -> Self {
        Self {
            table,
            bucket,
            link,
            removed: false,
        }
    }

    /// The bucket being visited.
    #[inline]
    pub fn bucket_num(&self) -> usize {
        self.bucket
    }

    /// The table being walked.
    #[inline]
    pub fn table(&self) -> &HashTable {
        self.table
    }

    /// Whether the record has been unlinked during this visit.
    #[inline]
    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// # Panics
    ///
    /// Panics if the record was removed during this visit.
    pub fn value(&self) -> &StoredValue {
        match (self.removed, self.link.as_deref()) {
            (false, Some(v)) => v,
            _ => panic!("VisitEntry::value: record was removed"),
        }
    }

    /// # Panics
    ///
    /// Panics if the record was removed during this visit.
    pub fn value_mut(&mut self) -> &mut StoredValue {
        match (self.removed, self.link.as_deref_mut()) {
            (false, Some(v)) => v,
            _ => panic!("VisitEntry::value_mut: record was removed"),
        }
    }

    /// Evict the record under `policy`. Returns `false` if it was not
    /// eligible. A successful full eviction removes the record.
    pub fn eject(&mut self, policy: EvictionPolicy) -> bool {
        assert!(!self.removed, "VisitEntry::eject: record was removed");
        let ejected = self.table.eject_at(self.link, policy);
        if ejected && policy == EvictionPolicy::Full {
            self.removed = true;
        }
        ejected
    }

    /// Turn the record into a tombstone.
    pub fn soft_delete(&mut self, only_mark_deleted: bool) -> bool {
        let table = self.table;
        table.unlocked_soft_delete(self.value_mut(), only_mark_deleted)
    }
}

/// Where a paused walk continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    ht_size: usize,
    lock: usize,
    hash_bucket: usize,
}

impl Position {
    /// The start of a table.
    pub fn start() -> Self {
        Self::default()
    }

    pub(crate) fn new(ht_size: usize, lock: usize, hash_bucket: usize) -> Self {
        Self {
            ht_size,
            lock,
            hash_bucket,
        }
    }

    /// Table size when the position was taken.
    pub fn ht_size(&self) -> usize {
        self.ht_size
    }

    pub fn lock(&self) -> usize {
        self.lock
    }

    pub fn hash_bucket(&self) -> usize {
        self.hash_bucket
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{lock:{} bucket:{}/{}}}",
            self.lock, self.hash_bucket, self.ht_size
        )
    }
}

/// Forwards every record and never pauses.
struct IgnorePause<'v>(&'v mut dyn HashTableVisitor);

impl HashTableVisitor for IgnorePause<'_> {
    fn visit(&mut self, entry: &mut VisitEntry<'_>) -> bool {
        self.0.visit(entry);
        true
    }
}

/// Count of in-progress visitors.
pub(crate) struct VisitorRegistry {
    active: AtomicUsize,
    idle: Mutex<()>,
    drained: Condvar,
}

impl VisitorRegistry {
    pub(crate) fn new() -> Self {
        Self {
            active: AtomicUsize::new(0),
            idle: Mutex::new(()),
            drained: Condvar::new(),
        }
    }

    pub(crate) fn register(&self) -> VisitorTracker<'_> {
        self.active.fetch_add(1, Ordering::AcqRel);
        VisitorTracker { registry: self }
    }

    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Block until no visitor is registered.
    pub(crate) fn wait_idle(&self) {
        let mut guard = self.idle.lock();
        while self.active() > 0 {
            self.drained.wait(&mut guard);
        }
    }
}

/// Keeps a visitor registered until dropped.
pub(crate) struct VisitorTracker<'a> {
    registry: &'a VisitorRegistry,
}

impl Drop for VisitorTracker<'_> {
    fn drop(&mut self) {
        if self.registry.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _guard = self.registry.idle.lock();
            self.registry.drained.notify_all();
        }
    }
}

impl HashTable {
    /// Register a visitor while holding shard lock 0 so a concurrent resize
    /// cannot miss it.
    fn register_visitor(&self) -> VisitorTracker<'_> {
        let _lock = self.shards.lock(0);
        self.visitors.register()
    }

    /// The position returned once a walk has covered the whole table.
    pub fn end_position(&self) -> Position {
        let size = self.size();
        Position::new(size, self.num_locks(), size)
    }

    fn check_first_in_bucket(&self, head: &Link, bucket: usize, op: &str) {
        if let Some(v) = head.as_deref() {
            let expected = self.get_bucket_for_hash(v.key().hash());
            assert!(
                expected == bucket,
                "HashTable::{op}: inconsistency between record's calculated bucket \
                 (which is {expected}) and the bucket it is located in (which is {bucket})"
            );
        }
    }

    /// Offer every record of one chain to `visitor`. Returns `true` if the
    /// visitor paused.
    fn visit_chain(
        &self,
        head: &mut Link,
        bucket: usize,
        visitor: &mut dyn HashTableVisitor,
    ) -> bool {
        let mut link = head;
        while link.is_some() {
            let mut entry = VisitEntry::new(self, bucket, link);
            let keep_going = visitor.visit(&mut entry);
            let VisitEntry {
                link: returned,
                removed,
                ..
            } = entry;
            link = returned;
            if !keep_going {
                return true;
            }
            if !removed {
                link = match link {
                    Some(v) => &mut v.next,
                    None => break,
                };
            }
        }
        false
    }

    /// Visit every record. Pause requests are ignored.
    ///
    /// # Panics
    ///
    /// Panics if the table has been deactivated or a bucket's first record
    /// hashes to another bucket.
    pub fn visit(&self, visitor: &mut dyn HashTableVisitor) {
        self.check_active("visit");
        if self.stats.num_items() + self.stats.num_temp_items() == 0 {
            return;
        }
        let _tracker = self.register_visitor();

        let num_locks = self.num_locks();
        let mut ignore_pause = IgnorePause(visitor);
        for lock in 0..num_locks {
            if !self.is_active() {
                break;
            }
            let mut bucket = lock;
            while bucket < self.size() {
                let Some(mut hbl) = self.lock_bucket(bucket) else {
                    break;
                };
                self.check_first_in_bucket(hbl.chain(), bucket, "visit");
                self.visit_chain(hbl.chain_mut(), bucket, &mut ignore_pause);
                bucket += num_locks;
            }
        }
    }

    /// Visit every bucket with its chain depth and memory, holding each
    /// shard lock across its buckets.
    ///
    /// # Panics
    ///
    /// Panics if the table has been deactivated or a bucket's first record
    /// hashes to another bucket.
    pub fn visit_depth(&self, visitor: &mut dyn HashTableDepthVisitor) {
        self.check_active("visit_depth");
        if self.stats.num_items() == 0 {
            return;
        }
        let _tracker = self.visitors.register();

        let num_locks = self.num_locks();
        for lock in 0..num_locks {
            let shard = self.shards.lock(lock);
            for (slot, head) in shard.chains.iter().enumerate() {
                let bucket = lock + slot * num_locks;
                self.check_first_in_bucket(head, bucket, "visit_depth");
                let (depth, mem) = crate::chain::iter(head)
                    .fold((0, 0), |(depth, mem), v| (depth + 1, mem + v.size()));
                visitor.visit(bucket, depth, mem);
            }
        }
    }

    /// Visit records from `start` until the visitor pauses or the table is
    /// exhausted, taking one bucket lock at a time.
    ///
    /// Returns the position to resume from, or [`HashTable::end_position`]
    /// once every bucket has been visited. A position taken at a different
    /// table size restarts from the first bucket of its lock.
    ///
    /// # Panics
    ///
    /// Panics if the table has been deactivated.
    pub fn pause_resume_visit(
        &self,
        visitor: &mut dyn HashTableVisitor,
        start: &Position,
    ) -> Position {
        self.check_active("pause_resume_visit");
        if self.stats.num_items() + self.stats.num_temp_items() == 0 {
            return self.end_position();
        }
        let _tracker = self.register_visitor();

        let num_locks = self.num_locks();
        // No resize can run while the tracker is held.
        let size = self.size();
        let mut paused = false;
        let mut lock = if start.lock < num_locks { start.lock } else { 0 };
        let mut hash_bucket = 0;

        while self.is_active() && !paused && lock < num_locks {
            hash_bucket = lock;
            if start.lock == lock
                && start.ht_size == size
                && start.hash_bucket < size
                && start.hash_bucket % num_locks == lock
            {
                hash_bucket = start.hash_bucket;
            }

            while !paused && hash_bucket < size {
                let Some(mut hbl) = self.lock_bucket(hash_bucket) else {
                    break;
                };
                paused = self.visit_chain(hbl.chain_mut(), hash_bucket, visitor);
                hash_bucket += num_locks;
            }

            if paused && hash_bucket < size {
                break;
            }
            hash_bucket = size;
            lock += 1;
        }

        let next = Position::new(size, lock, hash_bucket);
        VISITOR_PASSES.increment();
        trace!(%next, paused, "visitor pass finished");
        next
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::item::{Item, datatype};
    use crate::key::DocKey;
    use crate::status::{TrackReference, WantsDeleted};

    fn table_with(keys: usize) -> HashTable {
        let ht = HashTable::builder()
            .initial_size(13)
            .num_locks(3)
            .build()
            .unwrap();
        for i in 0..keys {
            ht.set(&Item::new(format!("key-{i}").as_str(), 0, 0, &b"v"[..], datatype::RAW));
        }
        ht
    }

    fn visitor<F>(f: F) -> F
    where
        F: FnMut(&mut VisitEntry<'_>) -> bool,
    {
        f
    }

    #[derive(Default)]
    struct Depth {
        per_bucket: Vec<(usize, usize)>,
        mem: usize,
    }

    impl HashTableDepthVisitor for Depth {
        fn visit(&mut self, bucket: usize, depth: usize, mem: usize) {
            self.per_bucket.push((bucket, depth));
            self.mem += mem;
        }
    }

    #[test]
    fn test_position_display() {
        assert_eq!(Position::new(47, 2, 5).to_string(), "{lock:2 bucket:5/47}");
    }

    #[test]
    fn test_empty_table_returns_end() {
        let ht = table_with(0);
        let mut count = 0;
        let mut v = visitor(|_| {
            count += 1;
            true
        });
        let pos = ht.pause_resume_visit(&mut v, &Position::start());
        assert_eq!(pos, ht.end_position());
        assert_eq!(count, 0);
    }

    #[test]
    fn test_full_pass_reaches_end() {
        let ht = table_with(20);
        let mut count = 0;
        let mut v = visitor(|_| {
            count += 1;
            true
        });
        let pos = ht.pause_resume_visit(&mut v, &Position::start());
        assert_eq!(count, 20);
        assert_eq!(pos, Position::new(13, 3, 13));
        assert_eq!(pos, ht.end_position());
        assert_eq!(ht.num_active_visitors(), 0);
    }

    #[test]
    fn test_pause_points_at_next_bucket() {
        let ht = table_with(20);
        let mut first_bucket = None;
        let mut v = visitor(|entry| {
            first_bucket = Some(entry.bucket_num());
            false
        });
        let pos = ht.pause_resume_visit(&mut v, &Position::start());
        let bucket = first_bucket.unwrap();
        let expected = if bucket + 3 < 13 {
            Position::new(13, bucket % 3, bucket + 3)
        } else {
            // paused in the lock's last bucket
            Position::new(13, bucket % 3 + 1, 13)
        };
        assert_eq!(pos, expected);
    }

    #[test]
    fn test_stale_position_restarts_lock() {
        let ht = table_with(20);
        let mut depth = Depth::default();
        ht.visit_depth(&mut depth);
        let expected: usize = depth
            .per_bucket
            .iter()
            .filter(|(bucket, _)| bucket % 3 != 0)
            .map(|(_, depth)| depth)
            .sum();

        let mut buckets = Vec::new();
        let mut v = visitor(|entry| {
            buckets.push(entry.bucket_num());
            true
        });
        // taken at size 7: resumes from the first bucket of lock 1
        let pos = ht.pause_resume_visit(&mut v, &Position::new(7, 1, 4));
        assert_eq!(pos, ht.end_position());
        assert!(buckets.iter().all(|b| b % 3 != 0));
        assert_eq!(buckets.len(), expected);
    }

    #[test]
    fn test_visit_ignores_pause() {
        let ht = table_with(20);
        let mut count = 0;
        ht.visit(&mut visitor(|_| {
            count += 1;
            false
        }));
        assert_eq!(count, 20);
    }

    #[test]
    fn test_visit_entry_full_eject_removes() {
        let ht = table_with(20);
        let mut ejected = 0;
        ht.visit(&mut visitor(|entry| {
            if entry.eject(EvictionPolicy::Full) {
                ejected += 1;
                assert!(entry.is_removed());
            }
            true
        }));
        assert_eq!(ejected, 20);
        assert_eq!(ht.stats().num_items(), 0);
        assert_eq!(ht.stats().mem_size(), 0);
    }

    #[test]
    fn test_visit_entry_soft_delete() {
        let ht = table_with(4);
        ht.visit(&mut visitor(|entry| {
            entry.soft_delete(false);
            true
        }));
        assert_eq!(ht.stats().num_deleted_items(), 4);
        let key = DocKey::from("key-0");
        assert!(ht.find(&key, TrackReference::No, WantsDeleted::No).is_none());
    }

    #[test]
    fn test_visit_depth() {
        let ht = table_with(20);
        let mut depth = Depth::default();
        ht.visit_depth(&mut depth);
        assert_eq!(depth.per_bucket.len(), 13);
        assert_eq!(depth.per_bucket.iter().map(|(_, d)| d).sum::<usize>(), 20);
        assert_eq!(depth.mem, ht.stats().mem_size());
    }

    #[test]
    fn test_registry_wait_idle() {
        let registry = VisitorRegistry::new();
        let tracker = registry.register();
        assert_eq!(registry.active(), 1);
        std::thread::scope(|s| {
            s.spawn(|| registry.wait_idle());
            drop(tracker);
        });
        assert_eq!(registry.active(), 0);
    }

    #[test]
    #[should_panic(expected = "non-active")]
    fn test_visit_after_deactivate_is_fatal() {
        let ht = table_with(5);
        ht.clear(true);
        ht.visit(&mut visitor(|_| true));
    }

    #[test]
    #[should_panic(expected = "non-active")]
    fn test_visit_depth_after_deactivate_is_fatal() {
        let ht = table_with(5);
        ht.clear(true);
        ht.visit_depth(&mut Depth::default());
    }

    #[test]
    #[should_panic(expected = "non-active")]
    fn test_pause_resume_visit_after_deactivate_is_fatal() {
        let ht = table_with(5);
        ht.clear(true);
        ht.pause_resume_visit(&mut visitor(|_| true), &Position::start());
    }
}
