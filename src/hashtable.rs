//! The concurrent hash index.
//!
//! A [`HashTable`] maps [`DocKey`]s to [`StoredValue`] records. Buckets are
//! singly linked chains; each bucket belongs to one of a fixed set of shard
//! locks (see [`crate::lock`]). Per-key operations take exactly one shard
//! lock. Resizing takes all of them.
//!
//! # Locked and unlocked operations
//!
//! [`HashTable::find`] and [`HashTable::set`] lock the key's bucket
//! themselves. Callers that need several steps under one lock take a
//! [`HashBucketLock`] with [`HashTable::get_locked_bucket`] and use the
//! `unlocked_*` operations, which borrow the guard (or a record reached
//! through it) as proof the lock is held.
//!
//! # Lifecycle
//!
//! A table starts active. [`HashTable::clear`] with `deactivate = true`
//! empties it and makes every further mutation, lookup or resize a fatal
//! error.

use crate::chain::{self, Link};
use crate::config::HashTableConfig;
use crate::error::ConfigResult;
use crate::eviction::EvictionPolicy;
use crate::factory::{DefaultStoredValueFactory, StoredValueFactory};
use crate::item::Item;
use crate::key::DocKey;
use crate::lock::{HashBucketLock, ShardLocks};
use crate::metrics::{FAILED_EJECTS, SOFT_DELETES, VALUE_EJECTS};
use crate::stats::{EngineStats, Footprint, HashTableStats};
use crate::status::{MutationStatus, TrackReference, WantsDeleted};
use crate::stored_value::StoredValue;
use crate::sync::{AtomicBool, AtomicUsize, Ordering};
use crate::visitor::VisitorRegistry;
use std::fmt;
use std::sync::Arc;
use tracing::{info, trace};

/// A concurrent, resizable hash index of value records.
pub struct HashTable {
    pub(crate) shards: ShardLocks,
    /// Current bucket count. Only changes while every shard lock is held.
    pub(crate) size: AtomicUsize,
    pub(crate) initial_size: usize,
    active: AtomicBool,
    factory: Box<dyn StoredValueFactory>,
    pub(crate) stats: HashTableStats,
    pub(crate) engine: Arc<EngineStats>,
    pub(crate) visitors: VisitorRegistry,
}

impl HashTable {
    /// Create a builder with default sizing, unlimited engine stats and the
    /// default record factory.
    pub fn builder() -> HashTableBuilder {
        HashTableBuilder::new()
    }

    /// Create a table.
    ///
    /// The table's structural overhead is reported to `engine` immediately
    /// and withdrawn when the table is dropped.
    pub fn new(
        config: HashTableConfig,
        engine: Arc<EngineStats>,
        factory: Box<dyn StoredValueFactory>,
    ) -> ConfigResult<Self> {
        config.validate()?;

        let table = Self {
            shards: ShardLocks::new(config.initial_size, config.num_locks),
            size: AtomicUsize::new(config.initial_size),
            initial_size: config.initial_size,
            active: AtomicBool::new(true),
            factory,
            stats: HashTableStats::new(),
            engine,
            visitors: VisitorRegistry::new(),
        };
        table.engine.increase_mem_overhead(table.memory_size());
        Ok(table)
    }

    /// Current bucket count.
    #[inline]
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Bucket count the table was created with; resizing never goes lower.
    #[inline]
    pub fn initial_size(&self) -> usize {
        self.initial_size
    }

    #[inline]
    pub fn num_locks(&self) -> usize {
        self.shards.len()
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Per-table statistics.
    #[inline]
    pub fn stats(&self) -> &HashTableStats {
        &self.stats
    }

    /// The engine-wide statistics this table reports into.
    #[inline]
    pub fn engine_stats(&self) -> &Arc<EngineStats> {
        &self.engine
    }

    /// Number of visitors currently registered.
    pub fn num_active_visitors(&self) -> usize {
        self.visitors.active()
    }

    /// Bytes used by the bucket array and the locks.
    pub fn memory_size(&self) -> usize {
        self.size() * std::mem::size_of::<Link>() + self.shards.memory_size()
    }

    /// Bucket a hash maps to at the current size.
    #[inline]
    pub fn get_bucket_for_hash(&self, hash: u64) -> usize {
        (hash % self.size() as u64) as usize
    }

    /// Lock the bucket owning `key`.
    ///
    /// # Panics
    ///
    /// Panics if the table has been deactivated.
    pub fn get_locked_bucket(&self, key: &DocKey) -> HashBucketLock<'_> {
        self.get_locked_bucket_for_hash(key.hash())
    }

    /// Lock the bucket owning `hash`.
    ///
    /// The size may change between computing the bucket and acquiring its
    /// lock, so the size is checked again under the lock and the whole
    /// sequence retried if a resize got in first.
    pub fn get_locked_bucket_for_hash(&self, hash: u64) -> HashBucketLock<'_> {
        assert!(
            self.is_active(),
            "HashTable::get_locked_bucket: cannot call on a non-active object"
        );
        loop {
            let size = self.size();
            let bucket = (hash % size as u64) as usize;
            let guard = self.shards.lock(bucket % self.num_locks());
            if size == self.size() {
                return HashBucketLock::new(self, bucket, guard);
            }
        }
    }

    /// Lock bucket `bucket` by number. Returns `None` if it is beyond the
    /// current size.
    pub(crate) fn lock_bucket(&self, bucket: usize) -> Option<HashBucketLock<'_>> {
        loop {
            let size = self.size();
            if bucket >= size {
                return None;
            }
            let guard = self.shards.lock(bucket % self.num_locks());
            if size == self.size() {
                return Some(HashBucketLock::new(self, bucket, guard));
            }
        }
    }

    #[inline]
    fn check_lock(&self, hbl: &HashBucketLock<'_>, op: &str) {
        assert!(
            std::ptr::eq(hbl.table, self),
            "HashTable::{op}: bucket lock belongs to another table"
        );
    }

    #[inline]
    pub(crate) fn check_active(&self, op: &str) {
        assert!(
            self.is_active(),
            "HashTable::{op}: cannot call on a non-active object"
        );
    }

    /// Look up `key` and return a snapshot of its record.
    ///
    /// With [`TrackReference::Yes`] a live record is marked as recently
    /// accessed. Tombstones are only returned with [`WantsDeleted::Yes`].
    ///
    /// # Panics
    ///
    /// Panics if the table has been deactivated.
    pub fn find(
        &self,
        key: &DocKey,
        track_reference: TrackReference,
        wants_deleted: WantsDeleted,
    ) -> Option<Item> {
        self.check_active("find");
        let mut hbl = self.get_locked_bucket(key);
        self.unlocked_find(key, &mut hbl, wants_deleted, track_reference)
            .map(|v| v.to_item())
    }

    /// Store `item`, updating the key's record in place or linking a new
    /// one at the head of its bucket.
    ///
    /// Returns [`MutationStatus::NoMem`] without touching the table if the
    /// engine quota cannot hold the item.
    pub fn set(&self, item: &Item) -> MutationStatus {
        if !self.engine.has_available_space(item) {
            return MutationStatus::NoMem;
        }

        let mut hbl = self.get_locked_bucket(item.key());
        if let Some(v) = self.unlocked_find(item.key(), &mut hbl, WantsDeleted::Yes, TrackReference::No)
        {
            return self.unlocked_update_stored_value(v, item);
        }
        self.unlocked_add_new_stored_value(&mut hbl, item);
        MutationStatus::InsertedClean
    }

    /// Find `key` in the locked bucket.
    pub fn unlocked_find<'h>(
        &self,
        key: &DocKey,
        hbl: &'h mut HashBucketLock<'_>,
        wants_deleted: WantsDeleted,
        track_reference: TrackReference,
    ) -> Option<&'h mut StoredValue> {
        self.check_lock(hbl, "unlocked_find");
        let v = chain::find_link(hbl.chain_mut(), |v| v.has_key(key))?.as_deref_mut()?;
        if track_reference == TrackReference::Yes && !v.is_deleted() {
            v.referenced();
        }
        if v.is_deleted() && wants_deleted == WantsDeleted::No {
            return None;
        }
        Some(v)
    }

    /// Build a record for `item` and link it at the head of the locked
    /// bucket. The caller must know the key is absent.
    pub fn unlocked_add_new_stored_value<'h>(
        &self,
        hbl: &'h mut HashBucketLock<'_>,
        item: &Item,
    ) -> &'h mut StoredValue {
        self.check_lock(hbl, "unlocked_add_new_stored_value");
        self.check_active("unlocked_add_new_stored_value");

        let head = hbl.chain_mut();
        let record = self.factory.create(item, head.take());
        let v = head.insert(record);
        if v.cas() == 0 {
            v.set_cas(Item::next_cas());
        }

        let fp = Footprint::of(v);
        self.stats.record_added(&fp, &self.engine);
        if !fp.is_temp() {
            self.stats.incr_total_items();
        }
        v
    }

    /// Replace `v`'s value and metadata with `item`.
    ///
    /// Reports whether `v` had unpersisted changes before the update. A
    /// temp placeholder updated with a real item becomes a regular record.
    pub fn unlocked_update_stored_value(&self, v: &mut StoredValue, item: &Item) -> MutationStatus {
        self.check_active("unlocked_update_stored_value");

        let status = if v.is_dirty() {
            MutationStatus::WasDirty
        } else {
            MutationStatus::WasClean
        };

        let before = Footprint::of(v);
        v.set_value(item);
        if v.cas() == 0 {
            v.set_cas(Item::next_cas());
        }
        let after = Footprint::of(v);
        self.stats.record_changed(&before, &after, &self.engine);

        match (before.is_temp(), after.is_temp()) {
            (true, false) => self.stats.incr_total_items(),
            (false, true) => self.stats.decr_total_items(),
            _ => {}
        }
        status
    }

    /// Swap the record for `key` with a copy built by the factory.
    ///
    /// The copy is linked at the head of the bucket. The displaced original
    /// is returned to the caller.
    ///
    /// # Panics
    ///
    /// Panics if `key` is not in the locked bucket.
    pub fn unlocked_replace_by_copy<'h>(
        &self,
        hbl: &'h mut HashBucketLock<'_>,
        key: &DocKey,
    ) -> (&'h mut StoredValue, Box<StoredValue>) {
        self.check_lock(hbl, "unlocked_replace_by_copy");
        self.check_active("unlocked_replace_by_copy");

        let released = self.unlocked_release(hbl, key);

        let head = hbl.chain_mut();
        let copy = self.factory.copy(&released, head.take());
        let v = head.insert(copy);

        let fp = Footprint::of(v);
        self.stats.record_added(&fp, &self.engine);
        if !fp.is_temp() {
            self.stats.incr_total_items();
        }
        (v, released)
    }

    /// Turn `v` into a tombstone.
    ///
    /// With `only_mark_deleted` the payload is kept; otherwise it is
    /// released and a temp placeholder becomes a regular tombstone.
    ///
    /// Returns `false` if `v` was already in that state.
    pub fn unlocked_soft_delete(&self, v: &mut StoredValue, only_mark_deleted: bool) -> bool {
        let before = Footprint::of(v);
        let changed = if only_mark_deleted {
            let was_deleted = v.is_deleted();
            v.mark_deleted();
            !was_deleted
        } else {
            v.del()
        };
        let after = Footprint::of(v);
        self.stats.record_changed(&before, &after, &self.engine);
        if before.is_temp() && !after.is_temp() {
            self.stats.incr_total_items();
        }
        if changed {
            SOFT_DELETES.increment();
        }
        changed
    }

    /// Unlink the record for `key` and hand it to the caller.
    ///
    /// # Panics
    ///
    /// Panics if `key` is not in the locked bucket. Callers only release
    /// records they found under the same lock.
    pub fn unlocked_release(&self, hbl: &mut HashBucketLock<'_>, key: &DocKey) -> Box<StoredValue> {
        self.check_lock(hbl, "unlocked_release");
        let bucket = hbl.bucket_num();
        let Some(released) = chain::remove_first(hbl.chain_mut(), |v| v.has_key(key)) else {
            panic!("HashTable::unlocked_release: key {key} not found in bucket {bucket}");
        };

        let fp = Footprint::of(&released);
        self.stats.record_removed(&fp, &self.engine);
        if !fp.is_temp() {
            self.stats.decr_total_items();
        }
        released
    }

    /// Unlink and destroy the record for `key`.
    ///
    /// # Panics
    ///
    /// Panics if `key` is not in the locked bucket.
    pub fn unlocked_del(&self, hbl: &mut HashBucketLock<'_>, key: &DocKey) {
        drop(self.unlocked_release(hbl, key));
    }

    /// Evict the record for `key` under `policy`.
    ///
    /// Returns `false` if the record is not eligible; that is a routine
    /// outcome counted as a failed ejection.
    ///
    /// # Panics
    ///
    /// Panics if `key` is not in the locked bucket.
    pub fn unlocked_eject_item(
        &self,
        hbl: &mut HashBucketLock<'_>,
        key: &DocKey,
        policy: EvictionPolicy,
    ) -> bool {
        self.check_lock(hbl, "unlocked_eject_item");
        let bucket = hbl.bucket_num();
        let Some(slot) = chain::find_link(hbl.chain_mut(), |v| v.has_key(key)) else {
            panic!("HashTable::unlocked_eject_item: key {key} not found in bucket {bucket}");
        };
        self.eject_at(slot, policy)
    }

    /// Evict the record held by `slot`. Under full eviction a successful
    /// ejection leaves the record's successor in `slot`.
    pub(crate) fn eject_at(&self, slot: &mut Link, policy: EvictionPolicy) -> bool {
        let Some(v) = slot.as_deref_mut() else {
            panic!("HashTable::eject: no record to eject");
        };
        if !v.eligible_for_eviction(policy) {
            self.engine.incr_failed_ejects();
            FAILED_EJECTS.increment();
            trace!(key = %v.key(), ?policy, "record not eligible for eviction");
            return false;
        }

        match policy {
            EvictionPolicy::ValueOnly => {
                let before = Footprint::of(v);
                v.eject_value();
                self.stats
                    .record_changed(&before, &Footprint::of(v), &self.engine);
                self.engine.incr_value_ejects();
                VALUE_EJECTS.increment();
            }
            EvictionPolicy::Full => {
                if let Some(removed) = chain::unlink_head(slot) {
                    self.stats
                        .record_removed(&Footprint::of(&removed), &self.engine);
                    if removed.is_resident() {
                        self.engine.incr_value_ejects();
                        VALUE_EJECTS.increment();
                    }
                    self.stats.update_max_deleted_rev_seqno(removed.rev_seqno());
                }
            }
        }
        self.stats.incr_ejects();
        true
    }

    /// Complete a background fetch by putting `item`'s value into `v`.
    ///
    /// Returns `false` if the table is inactive or `v` already holds a
    /// value.
    pub fn unlocked_restore_value(&self, v: &mut StoredValue, item: &Item) -> bool {
        if !self.is_active() || v.is_resident() {
            return false;
        }
        let before = Footprint::of(v);
        v.restore_value(item);
        self.stats
            .record_changed(&before, &Footprint::of(v), &self.engine);
        true
    }

    /// Complete a metadata-only background fetch into the placeholder `v`.
    ///
    /// # Panics
    ///
    /// Panics if the table has been deactivated.
    pub fn unlocked_restore_meta(&self, v: &mut StoredValue, item: &Item) {
        self.check_active("unlocked_restore_meta");
        let before = Footprint::of(v);
        v.restore_meta(item);
        self.stats
            .record_changed(&before, &Footprint::of(v), &self.engine);
    }

    /// Find a resident, live, non-temp record, scanning buckets circularly
    /// from `rnd % size`. Returns `None` once every bucket has been tried.
    ///
    /// # Panics
    ///
    /// Panics if the table has been deactivated.
    pub fn get_random_key(&self, rnd: u64) -> Option<Item> {
        self.check_active("get_random_key");
        let size = self.size();
        let start = (rnd % size as u64) as usize;
        let mut curr = start;
        loop {
            if let Some(item) = self.get_random_key_from_slot(curr) {
                return Some(item);
            }
            curr += 1;
            if curr >= size {
                curr = 0;
            }
            if curr == start {
                return None;
            }
        }
    }

    /// First resident, live, non-temp record in bucket `slot`.
    pub fn get_random_key_from_slot(&self, slot: usize) -> Option<Item> {
        let hbl = self.lock_bucket(slot)?;
        chain::iter(hbl.chain())
            .find(|v| !v.is_temp_item() && !v.is_deleted() && v.is_resident())
            .map(StoredValue::to_item)
    }

    /// [`HashTable::get_random_key`] from a randomly chosen bucket.
    pub fn random_key(&self) -> Option<Item> {
        self.get_random_key(rand::random::<u64>())
    }

    /// Remove every record.
    ///
    /// With `deactivate` the table also becomes inactive, permanently.
    ///
    /// # Panics
    ///
    /// Panics if `deactivate` is `false` and the table is already inactive.
    pub fn clear(&self, deactivate: bool) {
        if !deactivate {
            self.check_active("clear");
        }

        let mut all = self.shards.lock_all();
        if deactivate && self.active.swap(false, Ordering::AcqRel) {
            info!(size = self.size(), "deactivated hashtable");
        }

        let mut cleared = 0;
        for shard in all.shards_mut() {
            for head in shard.chains.iter_mut() {
                while let Some(v) = chain::unlink_head(head) {
                    cleared += v.size();
                }
            }
        }
        self.engine.reduce_current_size(cleared);
        self.stats.reset();
    }
}

impl Drop for HashTable {
    fn drop(&mut self) {
        self.visitors.wait_idle();
        self.clear(true);
        self.engine.reduce_mem_overhead(self.memory_size());
    }
}

impl fmt::Display for HashTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "HashTable[{:p}] with numInMemory:{} numDeleted:{} values:",
            self,
            self.stats.num_in_memory_items(),
            self.stats.num_deleted_items(),
        )?;
        for lock in 0..self.num_locks() {
            let shard = self.shards.lock(lock);
            for head in shard.chains.iter() {
                for v in chain::iter(head) {
                    writeln!(f, "    {v:?}")?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for HashTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashTable")
            .field("size", &self.size())
            .field("num_locks", &self.num_locks())
            .field("active", &self.is_active())
            .field("num_items", &self.stats.num_items())
            .finish()
    }
}

/// Builder for [`HashTable`].
pub struct HashTableBuilder {
    config: HashTableConfig,
    engine: Option<Arc<EngineStats>>,
    factory: Option<Box<dyn StoredValueFactory>>,
}

impl HashTableBuilder {
    pub fn new() -> Self {
        Self {
            config: HashTableConfig::default(),
            engine: None,
            factory: None,
        }
    }

    /// Use sizing from `config`.
    pub fn config(mut self, config: HashTableConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the initial (and minimum) bucket count.
    pub fn initial_size(mut self, initial_size: usize) -> Self {
        self.config.initial_size = initial_size;
        self
    }

    /// Set the number of shard locks.
    pub fn num_locks(mut self, num_locks: usize) -> Self {
        self.config.num_locks = num_locks;
        self
    }

    /// Report memory into a shared engine stats handle.
    pub fn engine_stats(mut self, engine: Arc<EngineStats>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Build records with `factory`.
    pub fn factory(mut self, factory: impl StoredValueFactory + 'static) -> Self {
        self.factory = Some(Box::new(factory));
        self
    }

    pub fn build(self) -> ConfigResult<HashTable> {
        HashTable::new(
            self.config,
            self.engine
                .unwrap_or_else(|| Arc::new(EngineStats::unlimited())),
            self.factory
                .unwrap_or_else(|| Box::new(DefaultStoredValueFactory)),
        )
    }
}

impl Default for HashTableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::item::{TempState, datatype};

    fn table() -> HashTable {
        HashTable::builder()
            .initial_size(5)
            .num_locks(2)
            .build()
            .unwrap()
    }

    fn item(key: &str, value: &str) -> Item {
        Item::new(key, 0, 0, value.as_bytes().to_vec(), datatype::RAW)
    }

    fn find(ht: &HashTable, key: &str, wants: WantsDeleted) -> Option<Item> {
        ht.find(&DocKey::from(key), TrackReference::No, wants)
    }

    #[test]
    fn test_builder_validates() {
        assert!(matches!(
            HashTable::builder().initial_size(0).build(),
            Err(ConfigError::ZeroSize)
        ));
        assert!(matches!(
            HashTable::builder().num_locks(0).build(),
            Err(ConfigError::ZeroLocks)
        ));
    }

    #[test]
    fn test_set_find_update() {
        let ht = table();
        assert_eq!(ht.set(&item("a", "v1")), MutationStatus::InsertedClean);
        let first = find(&ht, "a", WantsDeleted::No).unwrap();
        assert_eq!(first.value().unwrap().as_ref(), b"v1");
        assert_ne!(first.cas(), 0);

        assert_eq!(ht.set(&item("a", "v2")), MutationStatus::WasClean);
        let second = find(&ht, "a", WantsDeleted::No).unwrap();
        assert_eq!(second.value().unwrap().as_ref(), b"v2");
        assert!(second.cas() > first.cas());

        assert_eq!(ht.set(&item("a", "v3")), MutationStatus::WasDirty);
        assert_eq!(ht.stats().num_items(), 1);
        assert_eq!(ht.stats().num_total_items(), 1);
    }

    #[test]
    fn test_set_keeps_explicit_cas() {
        let ht = table();
        ht.set(&item("a", "v").with_cas(77));
        assert_eq!(find(&ht, "a", WantsDeleted::No).unwrap().cas(), 77);
    }

    #[test]
    fn test_set_no_mem_leaves_table_untouched() {
        let ht = HashTable::builder()
            .engine_stats(Arc::new(EngineStats::new(1)))
            .build()
            .unwrap();
        assert_eq!(ht.set(&item("a", "v")), MutationStatus::NoMem);
        assert_eq!(ht.stats().num_items(), 0);
        assert!(find(&ht, "a", WantsDeleted::Yes).is_none());
    }

    #[test]
    fn test_track_reference() {
        let ht = table();
        ht.set(&item("a", "v"));
        let key = DocKey::from("a");
        ht.find(&key, TrackReference::Yes, WantsDeleted::No);
        let got = ht.find(&key, TrackReference::No, WantsDeleted::No).unwrap();
        assert_eq!(got.nru(), crate::item::nru::INITIAL - 1);
    }

    #[test]
    fn test_soft_delete_accounting() {
        let ht = table();
        ht.set(&item("a", "hello"));
        let cache_before = ht.stats().cache_size();
        let key = DocKey::from("a");
        {
            let mut hbl = ht.get_locked_bucket(&key);
            let v = ht
                .unlocked_find(&key, &mut hbl, WantsDeleted::No, TrackReference::No)
                .unwrap();
            ht.unlocked_soft_delete(v, false);
        }
        assert_eq!(ht.stats().cache_size(), cache_before - 5);
        assert_eq!(ht.stats().num_deleted_items(), 1);
        assert!(find(&ht, "a", WantsDeleted::No).is_none());
        assert!(find(&ht, "a", WantsDeleted::Yes).unwrap().is_deleted());
    }

    #[test]
    fn test_soft_delete_twice_changes_nothing() {
        let ht = table();
        ht.set(&item("a", "hello"));
        ht.set(&item("b", "world"));
        for (key, only_mark) in [("a", false), ("b", true)] {
            let key = DocKey::from(key);
            let mut hbl = ht.get_locked_bucket(&key);
            let v = ht
                .unlocked_find(&key, &mut hbl, WantsDeleted::No, TrackReference::No)
                .unwrap();
            assert!(ht.unlocked_soft_delete(v, only_mark));
            let stats = ht.stats().snapshot();
            assert!(!ht.unlocked_soft_delete(v, only_mark));
            assert_eq!(ht.stats().snapshot(), stats);
        }
        assert_eq!(ht.stats().num_deleted_items(), 2);
    }

    #[test]
    fn test_soft_delete_promotes_temp() {
        let ht = table();
        ht.set(&Item::new_temp("a", TempState::Initial));
        assert_eq!(ht.stats().num_temp_items(), 1);
        let key = DocKey::from("a");
        let mut hbl = ht.get_locked_bucket(&key);
        let v = ht
            .unlocked_find(&key, &mut hbl, WantsDeleted::Yes, TrackReference::No)
            .unwrap();
        ht.unlocked_soft_delete(v, false);
        drop(hbl);
        assert_eq!(ht.stats().num_temp_items(), 0);
        assert_eq!(ht.stats().num_items(), 1);
        assert_eq!(ht.stats().num_total_items(), 1);
        assert_eq!(ht.stats().num_deleted_items(), 1);
    }

    #[test]
    fn test_release_and_del() {
        let ht = table();
        ht.set(&item("a", "1"));
        ht.set(&item("b", "2"));
        let key = DocKey::from("a");
        let mut hbl = ht.get_locked_bucket(&key);
        let released = ht.unlocked_release(&mut hbl, &key);
        assert!(released.has_key(&key));
        drop(hbl);

        let key = DocKey::from("b");
        let mut hbl = ht.get_locked_bucket(&key);
        ht.unlocked_del(&mut hbl, &key);
        drop(hbl);

        assert_eq!(ht.stats().num_items(), 0);
        assert_eq!(ht.stats().num_total_items(), 0);
        assert_eq!(ht.stats().mem_size(), 0);
        assert_eq!(ht.engine_stats().current_size(), 0);
    }

    #[test]
    #[should_panic(expected = "not found")]
    fn test_release_missing_is_fatal() {
        let ht = table();
        let key = DocKey::from("missing");
        let mut hbl = ht.get_locked_bucket(&key);
        ht.unlocked_release(&mut hbl, &key);
    }

    #[test]
    #[should_panic(expected = "another table")]
    fn test_foreign_lock_is_fatal() {
        let a = table();
        let b = table();
        let key = DocKey::from("k");
        let mut hbl = a.get_locked_bucket(&key);
        b.unlocked_find(&key, &mut hbl, WantsDeleted::No, TrackReference::No);
    }

    #[test]
    fn test_eject_value_only() {
        let ht = table();
        ht.set(&item("a", "hello"));
        let key = DocKey::from("a");
        let mut hbl = ht.get_locked_bucket(&key);
        assert!(ht.unlocked_eject_item(&mut hbl, &key, EvictionPolicy::ValueOnly));
        // already non-resident
        assert!(!ht.unlocked_eject_item(&mut hbl, &key, EvictionPolicy::ValueOnly));
        drop(hbl);

        assert_eq!(ht.stats().num_non_resident_items(), 1);
        assert_eq!(ht.stats().cache_size(), 0);
        assert_eq!(ht.stats().num_ejects(), 1);
        assert_eq!(ht.engine_stats().num_value_ejects(), 1);
        assert_eq!(ht.engine_stats().num_failed_ejects(), 1);
        let got = find(&ht, "a", WantsDeleted::No).unwrap();
        assert!(got.value().is_none());
    }

    #[test]
    fn test_eject_full() {
        let ht = table();
        ht.set(&item("a", "hello").with_rev_seqno(9));
        let key = DocKey::from("a");
        let mut hbl = ht.get_locked_bucket(&key);
        assert!(ht.unlocked_eject_item(&mut hbl, &key, EvictionPolicy::Full));
        drop(hbl);

        assert!(find(&ht, "a", WantsDeleted::Yes).is_none());
        assert_eq!(ht.stats().num_items(), 0);
        assert_eq!(ht.stats().num_total_items(), 1);
        assert_eq!(ht.stats().max_deleted_rev_seqno(), 9);
        assert_eq!(ht.stats().mem_size(), 0);
    }

    #[test]
    fn test_eject_dirty_fails() {
        let ht = table();
        ht.set(&item("a", "1"));
        ht.set(&item("a", "2"));
        let key = DocKey::from("a");
        let mut hbl = ht.get_locked_bucket(&key);
        assert!(!ht.unlocked_eject_item(&mut hbl, &key, EvictionPolicy::Full));
        assert!(!ht.unlocked_eject_item(&mut hbl, &key, EvictionPolicy::ValueOnly));
        drop(hbl);
        assert_eq!(ht.engine_stats().num_failed_ejects(), 2);
    }

    #[test]
    fn test_restore_value_and_meta() {
        let ht = table();
        ht.set(&Item::new_temp("a", TempState::Initial));
        ht.set(&Item::new_temp("b", TempState::Initial));

        let key = DocKey::from("a");
        let mut hbl = ht.get_locked_bucket(&key);
        let v = ht
            .unlocked_find(&key, &mut hbl, WantsDeleted::Yes, TrackReference::No)
            .unwrap();
        assert!(ht.unlocked_restore_value(v, &item("a", "abc").with_cas(3)));
        assert!(!ht.unlocked_restore_value(v, &item("a", "abc")));
        drop(hbl);

        let key = DocKey::from("b");
        let mut hbl = ht.get_locked_bucket(&key);
        let v = ht
            .unlocked_find(&key, &mut hbl, WantsDeleted::Yes, TrackReference::No)
            .unwrap();
        ht.unlocked_restore_meta(v, &Item::new("b", 0, 0, &b""[..], datatype::JSON));
        drop(hbl);

        let stats = ht.stats().snapshot();
        assert_eq!(stats.num_temp_items, 0);
        assert_eq!(stats.num_items, 2);
        assert_eq!(stats.num_non_resident_items, 1);
        assert_eq!(stats.cache_size, 3);
        assert_eq!(stats.datatype_total(), 2);
    }

    #[test]
    fn test_replace_by_copy() {
        let ht = table();
        ht.set(&item("a", "hello"));
        ht.set(&item("b", "world"));
        let mem = ht.stats().mem_size();
        let key = DocKey::from("a");
        let mut hbl = ht.get_locked_bucket(&key);
        let (copy, original) = ht.unlocked_replace_by_copy(&mut hbl, &key);
        assert!(copy.has_key(&key));
        assert_eq!(copy.cas(), original.cas());
        drop(hbl);
        assert_eq!(ht.stats().num_items(), 2);
        assert_eq!(ht.stats().mem_size(), mem);
    }

    #[test]
    fn test_random_key() {
        let ht = table();
        assert!(ht.get_random_key(0).is_none());

        ht.set(&item("only", "v"));
        ht.set(&Item::new_deleted("gone"));
        for rnd in 0..ht.size() as u64 {
            let got = ht.get_random_key(rnd).unwrap();
            assert_eq!(got.key(), &DocKey::from("only"));
        }
        assert!(ht.random_key().is_some());
    }

    #[test]
    fn test_clear_and_deactivate() {
        let engine = Arc::new(EngineStats::unlimited());
        let ht = HashTable::builder()
            .engine_stats(engine.clone())
            .build()
            .unwrap();
        ht.set(&item("a", "1"));
        ht.set(&item("b", "2"));
        ht.clear(false);
        assert_eq!(ht.stats().num_items(), 0);
        assert_eq!(engine.current_size(), 0);
        assert!(ht.is_active());

        ht.clear(true);
        assert!(!ht.is_active());
    }

    #[test]
    #[should_panic(expected = "non-active")]
    fn test_find_after_deactivate_is_fatal() {
        let ht = table();
        ht.clear(true);
        find(&ht, "a", WantsDeleted::No);
    }

    #[test]
    #[should_panic(expected = "non-active")]
    fn test_random_key_after_deactivate_is_fatal() {
        let ht = table();
        ht.set(&item("a", "1"));
        ht.clear(true);
        ht.get_random_key(1);
    }

    #[test]
    fn test_drop_returns_memory() {
        let engine = Arc::new(EngineStats::unlimited());
        {
            let ht = HashTable::builder()
                .engine_stats(engine.clone())
                .build()
                .unwrap();
            ht.set(&item("a", "1"));
            assert!(engine.mem_overhead() > 0);
            assert!(engine.current_size() > 0);
        }
        assert_eq!(engine.mem_overhead(), 0);
        assert_eq!(engine.current_size(), 0);
    }

    #[test]
    fn test_display_lists_records() {
        let ht = table();
        ht.set(&item("alpha", "1"));
        let dump = ht.to_string();
        assert!(dump.contains("numInMemory:1"));
        assert!(dump.contains("alpha"));
    }
}
