//! Hashtable statistics.
//!
//! This module provides:
//! - [`EngineStats`] - Process-wide memory accounting shared by every table
//! - [`HashTableStats`] - Per-table item counts, byte sizes and the datatype
//!   histogram
//! - [`StatsSnapshot`] - A point-in-time copy of [`HashTableStats`]
//!
//! All counters are independent atomics. Cross-field consistency (for
//! example item count against the datatype histogram) holds only when no
//! mutation is in flight.

use crate::item::Item;
use crate::stored_value::StoredValue;
use crate::sync::{AtomicU64, AtomicUsize, Ordering};

/// Default fraction of the quota a mutation may fill.
pub const DEFAULT_MUTATION_MEM_THRESHOLD: f64 = 0.93;

/// Number of datatype histogram slots (one per 8-bit tag).
pub const DATATYPE_SLOTS: usize = 256;

#[inline]
fn decr(counter: &AtomicUsize, by: usize, what: &'static str) {
    let prev = counter.fetch_sub(by, Ordering::Relaxed);
    if prev < by {
        panic!("{what} underflow: {prev} - {by}");
    }
}

/// Memory accounting owned by the engine and shared by all of its tables.
///
/// Tables report byte deltas here; the engine decides the quota.
#[derive(Debug)]
pub struct EngineStats {
    /// Bytes held by records (metadata and payload) across all tables.
    current_size: AtomicUsize,
    /// Bytes held by bucket arrays and locks.
    mem_overhead: AtomicUsize,
    num_value_ejects: AtomicU64,
    num_failed_ejects: AtomicU64,
    max_data_size: usize,
    mutation_mem_threshold: f64,
}

impl EngineStats {
    /// Create stats with a memory quota in bytes.
    pub fn new(max_data_size: usize) -> Self {
        Self {
            current_size: AtomicUsize::new(0),
            mem_overhead: AtomicUsize::new(0),
            num_value_ejects: AtomicU64::new(0),
            num_failed_ejects: AtomicU64::new(0),
            max_data_size,
            mutation_mem_threshold: DEFAULT_MUTATION_MEM_THRESHOLD,
        }
    }

    /// Create stats with no effective quota.
    pub fn unlimited() -> Self {
        Self::new(usize::MAX)
    }

    /// Set the fraction of the quota mutations may fill.
    pub fn with_mutation_mem_threshold(mut self, threshold: f64) -> Self {
        self.mutation_mem_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn current_size(&self) -> usize {
        self.current_size.load(Ordering::Relaxed)
    }

    pub fn mem_overhead(&self) -> usize {
        self.mem_overhead.load(Ordering::Relaxed)
    }

    /// Record bytes plus structural overhead.
    pub fn total_memory_used(&self) -> usize {
        self.current_size() + self.mem_overhead()
    }

    pub fn max_data_size(&self) -> usize {
        self.max_data_size
    }

    pub fn num_value_ejects(&self) -> u64 {
        self.num_value_ejects.load(Ordering::Relaxed)
    }

    pub fn num_failed_ejects(&self) -> u64 {
        self.num_failed_ejects.load(Ordering::Relaxed)
    }

    /// Whether storing `item` keeps memory use within the mutation
    /// threshold of the quota.
    pub fn has_available_space(&self, item: &Item) -> bool {
        let new_size = (self.total_memory_used() + StoredValue::required_size(item)) as f64;
        let max_size = self.max_data_size as f64 * self.mutation_mem_threshold;
        new_size <= max_size
    }

    pub(crate) fn increase_current_size(&self, by: usize) {
        self.current_size.fetch_add(by, Ordering::Relaxed);
    }

    pub(crate) fn reduce_current_size(&self, by: usize) {
        decr(&self.current_size, by, "current_size");
    }

    pub(crate) fn increase_mem_overhead(&self, by: usize) {
        self.mem_overhead.fetch_add(by, Ordering::Relaxed);
    }

    pub(crate) fn reduce_mem_overhead(&self, by: usize) {
        decr(&self.mem_overhead, by, "mem_overhead");
    }

    pub(crate) fn incr_value_ejects(&self) {
        self.num_value_ejects.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_failed_ejects(&self) {
        self.num_failed_ejects.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for EngineStats {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// What a single record contributes to the table's counters.
///
/// Every mutation captures the footprint before and after, so the running
/// totals always match what a full scan would count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Footprint {
    temp: bool,
    deleted: bool,
    non_resident: bool,
    datatype: u8,
    value_len: usize,
    metadata: usize,
}

impl Footprint {
    pub(crate) fn of(v: &StoredValue) -> Self {
        let temp = v.is_temp_item();
        Self {
            temp,
            deleted: !temp && v.is_deleted(),
            non_resident: !temp && !v.is_deleted() && !v.is_resident(),
            datatype: v.datatype(),
            value_len: v.valuelen(),
            metadata: v.metadata_size(),
        }
    }

    #[inline]
    pub(crate) fn is_temp(&self) -> bool {
        self.temp
    }

    fn same_counts(&self, other: &Footprint) -> bool {
        self.temp == other.temp
            && self.deleted == other.deleted
            && self.non_resident == other.non_resident
            && (self.temp || self.datatype == other.datatype)
    }
}

/// Running statistics for one hashtable.
#[derive(Debug)]
pub struct HashTableStats {
    num_items: AtomicUsize,
    num_total_items: AtomicUsize,
    num_temp_items: AtomicUsize,
    num_deleted_items: AtomicUsize,
    num_non_resident_items: AtomicUsize,
    num_ejects: AtomicU64,
    num_resizes: AtomicU64,
    cache_size: AtomicUsize,
    metadata_memory: AtomicUsize,
    max_deleted_rev_seqno: AtomicU64,
    datatype_counts: Box<[AtomicUsize]>,
}

impl HashTableStats {
    pub(crate) fn new() -> Self {
        Self {
            num_items: AtomicUsize::new(0),
            num_total_items: AtomicUsize::new(0),
            num_temp_items: AtomicUsize::new(0),
            num_deleted_items: AtomicUsize::new(0),
            num_non_resident_items: AtomicUsize::new(0),
            num_ejects: AtomicU64::new(0),
            num_resizes: AtomicU64::new(0),
            cache_size: AtomicUsize::new(0),
            metadata_memory: AtomicUsize::new(0),
            max_deleted_rev_seqno: AtomicU64::new(0),
            datatype_counts: (0..DATATYPE_SLOTS).map(|_| AtomicUsize::new(0)).collect(),
        }
    }

    /// Records that are not temp placeholders, tombstones included.
    pub fn num_items(&self) -> usize {
        self.num_items.load(Ordering::Relaxed)
    }

    /// Items the table knows about, including fully evicted ones.
    pub fn num_total_items(&self) -> usize {
        self.num_total_items.load(Ordering::Relaxed)
    }

    pub fn num_temp_items(&self) -> usize {
        self.num_temp_items.load(Ordering::Relaxed)
    }

    pub fn num_deleted_items(&self) -> usize {
        self.num_deleted_items.load(Ordering::Relaxed)
    }

    /// Live records whose payload has been evicted.
    pub fn num_non_resident_items(&self) -> usize {
        self.num_non_resident_items.load(Ordering::Relaxed)
    }

    /// Items whose payload is in memory: tombstones and resident records.
    pub fn num_in_memory_items(&self) -> usize {
        self.num_items().saturating_sub(self.num_non_resident_items())
    }

    pub fn num_ejects(&self) -> u64 {
        self.num_ejects.load(Ordering::Relaxed)
    }

    pub fn num_resizes(&self) -> u64 {
        self.num_resizes.load(Ordering::Relaxed)
    }

    /// Payload bytes held by records.
    pub fn cache_size(&self) -> usize {
        self.cache_size.load(Ordering::Relaxed)
    }

    /// Per-record overhead bytes.
    pub fn metadata_memory(&self) -> usize {
        self.metadata_memory.load(Ordering::Relaxed)
    }

    /// Payload and overhead bytes.
    pub fn mem_size(&self) -> usize {
        self.cache_size() + self.metadata_memory()
    }

    /// Highest revision of any fully evicted record.
    pub fn max_deleted_rev_seqno(&self) -> u64 {
        self.max_deleted_rev_seqno.load(Ordering::Relaxed)
    }

    /// Non-temp records carrying `datatype`.
    pub fn datatype_count(&self, datatype: u8) -> usize {
        self.datatype_counts[datatype as usize].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            num_items: self.num_items(),
            num_total_items: self.num_total_items(),
            num_temp_items: self.num_temp_items(),
            num_deleted_items: self.num_deleted_items(),
            num_non_resident_items: self.num_non_resident_items(),
            num_ejects: self.num_ejects(),
            num_resizes: self.num_resizes(),
            cache_size: self.cache_size(),
            metadata_memory: self.metadata_memory(),
            max_deleted_rev_seqno: self.max_deleted_rev_seqno(),
            datatype_counts: self
                .datatype_counts
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .collect(),
        }
    }

    /// Account for a record newly linked into the table.
    pub(crate) fn record_added(&self, fp: &Footprint, engine: &EngineStats) {
        self.count_in(fp);
        self.increase_metadata(fp.metadata, engine);
        self.increase_cache_size(fp.value_len, engine);
    }

    /// Account for a record unlinked from the table.
    pub(crate) fn record_removed(&self, fp: &Footprint, engine: &EngineStats) {
        self.count_out(fp);
        self.reduce_metadata(fp.metadata, engine);
        self.reduce_cache_size(fp.value_len, engine);
    }

    /// Account for an in-place change to a linked record.
    pub(crate) fn record_changed(&self, before: &Footprint, after: &Footprint, engine: &EngineStats) {
        if !before.same_counts(after) {
            self.count_out(before);
            self.count_in(after);
        }
        if after.metadata >= before.metadata {
            self.increase_metadata(after.metadata - before.metadata, engine);
        } else {
            self.reduce_metadata(before.metadata - after.metadata, engine);
        }
        if after.value_len >= before.value_len {
            self.increase_cache_size(after.value_len - before.value_len, engine);
        } else {
            self.reduce_cache_size(before.value_len - after.value_len, engine);
        }
    }

    fn count_in(&self, fp: &Footprint) {
        if fp.temp {
            self.num_temp_items.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.num_items.fetch_add(1, Ordering::Relaxed);
        self.datatype_counts[fp.datatype as usize].fetch_add(1, Ordering::Relaxed);
        if fp.deleted {
            self.num_deleted_items.fetch_add(1, Ordering::Relaxed);
        }
        if fp.non_resident {
            self.num_non_resident_items.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn count_out(&self, fp: &Footprint) {
        if fp.temp {
            decr(&self.num_temp_items, 1, "num_temp_items");
            return;
        }
        decr(&self.num_items, 1, "num_items");
        decr(
            &self.datatype_counts[fp.datatype as usize],
            1,
            "datatype_counts",
        );
        if fp.deleted {
            decr(&self.num_deleted_items, 1, "num_deleted_items");
        }
        if fp.non_resident {
            decr(&self.num_non_resident_items, 1, "num_non_resident_items");
        }
    }

    fn increase_cache_size(&self, by: usize, engine: &EngineStats) {
        if by == 0 {
            return;
        }
        self.cache_size.fetch_add(by, Ordering::Relaxed);
        engine.increase_current_size(by);
    }

    fn reduce_cache_size(&self, by: usize, engine: &EngineStats) {
        if by == 0 {
            return;
        }
        decr(&self.cache_size, by, "cache_size");
        engine.reduce_current_size(by);
    }

    fn increase_metadata(&self, by: usize, engine: &EngineStats) {
        if by == 0 {
            return;
        }
        self.metadata_memory.fetch_add(by, Ordering::Relaxed);
        engine.increase_current_size(by);
    }

    fn reduce_metadata(&self, by: usize, engine: &EngineStats) {
        if by == 0 {
            return;
        }
        decr(&self.metadata_memory, by, "metadata_memory");
        engine.reduce_current_size(by);
    }

    pub(crate) fn incr_total_items(&self) {
        self.num_total_items.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn decr_total_items(&self) {
        decr(&self.num_total_items, 1, "num_total_items");
    }

    pub(crate) fn incr_ejects(&self) {
        self.num_ejects.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_resizes(&self) {
        self.num_resizes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn update_max_deleted_rev_seqno(&self, rev_seqno: u64) {
        self.max_deleted_rev_seqno
            .fetch_max(rev_seqno, Ordering::Relaxed);
    }

    /// Zero the counters after the table has been emptied. The caller has
    /// already returned the bytes to the engine.
    pub(crate) fn reset(&self) {
        for counter in [
            &self.num_items,
            &self.num_total_items,
            &self.num_temp_items,
            &self.num_deleted_items,
            &self.num_non_resident_items,
            &self.cache_size,
            &self.metadata_memory,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        for slot in self.datatype_counts.iter() {
            slot.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time copy of [`HashTableStats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub num_items: usize,
    pub num_total_items: usize,
    pub num_temp_items: usize,
    pub num_deleted_items: usize,
    pub num_non_resident_items: usize,
    pub num_ejects: u64,
    pub num_resizes: u64,
    pub cache_size: usize,
    pub metadata_memory: usize,
    pub max_deleted_rev_seqno: u64,
    pub datatype_counts: Vec<usize>,
}

impl StatsSnapshot {
    /// Sum of the datatype histogram.
    pub fn datatype_total(&self) -> usize {
        self.datatype_counts.iter().sum()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::item::{Item, TempState, datatype};

    fn record(item: &Item) -> StoredValue {
        StoredValue::new(item, None)
    }

    #[test]
    fn test_add_then_remove_is_symmetric() {
        let engine = EngineStats::unlimited();
        let stats = HashTableStats::new();
        let sv = record(&Item::new("k", 0, 0, &b"hello"[..], datatype::JSON));
        let fp = Footprint::of(&sv);

        stats.record_added(&fp, &engine);
        assert_eq!(stats.num_items(), 1);
        assert_eq!(stats.datatype_count(datatype::JSON), 1);
        assert_eq!(stats.cache_size(), 5);
        assert_eq!(stats.metadata_memory(), sv.metadata_size());
        assert_eq!(engine.current_size(), sv.size());

        stats.record_removed(&fp, &engine);
        assert_eq!(stats.snapshot().datatype_total(), 0);
        assert_eq!(stats.num_items(), 0);
        assert_eq!(stats.mem_size(), 0);
        assert_eq!(engine.current_size(), 0);
    }

    #[test]
    fn test_temp_records_only_count_as_temp() {
        let engine = EngineStats::unlimited();
        let stats = HashTableStats::new();
        let sv = record(&Item::new_temp("k", TempState::Initial));
        stats.record_added(&Footprint::of(&sv), &engine);
        assert_eq!(stats.num_temp_items(), 1);
        assert_eq!(stats.num_items(), 0);
        assert_eq!(stats.snapshot().datatype_total(), 0);
    }

    #[test]
    fn test_change_moves_datatype_and_bytes() {
        let engine = EngineStats::unlimited();
        let stats = HashTableStats::new();
        let mut sv = record(&Item::new("k", 0, 0, &b"hello"[..], datatype::JSON));
        stats.record_added(&Footprint::of(&sv), &engine);

        let before = Footprint::of(&sv);
        sv.del();
        stats.record_changed(&before, &Footprint::of(&sv), &engine);

        assert_eq!(stats.num_items(), 1);
        assert_eq!(stats.num_deleted_items(), 1);
        assert_eq!(stats.datatype_count(datatype::JSON), 0);
        assert_eq!(stats.datatype_count(datatype::RAW), 1);
        assert_eq!(stats.cache_size(), 0);
    }

    #[test]
    fn test_eject_counts_non_resident() {
        let engine = EngineStats::unlimited();
        let stats = HashTableStats::new();
        let mut sv = record(&Item::new("k", 0, 0, &b"hello"[..], datatype::RAW));
        stats.record_added(&Footprint::of(&sv), &engine);
        let before = Footprint::of(&sv);
        sv.eject_value();
        stats.record_changed(&before, &Footprint::of(&sv), &engine);
        assert_eq!(stats.num_non_resident_items(), 1);
        assert_eq!(stats.cache_size(), 0);
    }

    #[test]
    #[should_panic(expected = "num_items underflow")]
    fn test_underflow_is_fatal() {
        let engine = EngineStats::unlimited();
        let stats = HashTableStats::new();
        let sv = record(&Item::new("k", 0, 0, &b""[..], datatype::RAW));
        stats.record_removed(&Footprint::of(&sv), &engine);
    }

    #[test]
    fn test_has_available_space() {
        let item = Item::new("k", 0, 0, vec![0u8; 100], datatype::RAW);
        assert!(EngineStats::unlimited().has_available_space(&item));
        assert!(!EngineStats::new(10).has_available_space(&item));

        let needed = StoredValue::required_size(&item);
        let exact = EngineStats::new(needed).with_mutation_mem_threshold(1.0);
        assert!(exact.has_available_space(&item));
    }

    #[test]
    fn test_max_deleted_rev_seqno_is_high_water_mark() {
        let stats = HashTableStats::new();
        stats.update_max_deleted_rev_seqno(5);
        stats.update_max_deleted_rev_seqno(3);
        assert_eq!(stats.max_deleted_rev_seqno(), 5);
    }
}
