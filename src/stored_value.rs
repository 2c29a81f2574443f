//! Resident value records.
//!
//! A [`StoredValue`] is the hashtable's record for one key: current metadata,
//! an optional payload (absent once evicted or deleted), lifecycle flags and
//! the owning link to the next record in its bucket chain.
//!
//! # Chain ownership
//!
//! ```text
//! bucket[i] -> Box<StoredValue> -> Box<StoredValue> -> None
//!                  (owns next)       (owns next)
//! ```
//!
//! Each record exclusively owns its successor. Removing a record moves its
//! successor into the slot that owned it; see [`crate::chain`].

use crate::eviction::EvictionPolicy;
use crate::item::{Item, ItemMetaData, TempState, datatype, nru};
use crate::key::DocKey;
use bytes::Bytes;
use std::fmt;

/// Get current time as seconds since Unix epoch.
#[inline]
pub(crate) fn current_time_secs() -> u32 {
    clocksource::coarse::UnixInstant::now()
        .duration_since(clocksource::coarse::UnixInstant::EPOCH)
        .as_secs() as u32
}

/// The hashtable's record for a single key.
pub struct StoredValue {
    key: DocKey,
    meta: ItemMetaData,
    value: Option<Bytes>,
    by_seqno: i64,
    /// Seconds since the epoch until which the record is pinned.
    lock_expiry: u32,
    datatype: u8,
    nru: u8,
    deleted: bool,
    dirty: bool,
    /// Set while a full-eviction background fetch owns this placeholder.
    new_cache_item: bool,
    temp: Option<TempState>,
    pub(crate) next: Option<Box<StoredValue>>,
}

impl StoredValue {
    /// Build a record from an inbound item, taking ownership of `next` as
    /// the rest of the chain.
    ///
    /// New records are clean; in-place updates mark them dirty until the
    /// persistence layer calls [`StoredValue::mark_clean`].
    pub fn new(item: &Item, next: Option<Box<StoredValue>>) -> Self {
        Self {
            key: item.key().clone(),
            meta: *item.meta(),
            value: item.value().cloned(),
            by_seqno: item.by_seqno(),
            lock_expiry: 0,
            datatype: item.datatype(),
            nru: item.nru(),
            deleted: item.is_deleted(),
            dirty: false,
            new_cache_item: item.temp_state() == Some(TempState::Initial),
            temp: item.temp_state(),
            next,
        }
    }

    /// Copy every field except the chain link, which is replaced by `next`.
    pub fn duplicate(&self, next: Option<Box<StoredValue>>) -> Self {
        Self {
            key: self.key.clone(),
            meta: self.meta,
            value: self.value.clone(),
            by_seqno: self.by_seqno,
            lock_expiry: self.lock_expiry,
            datatype: self.datatype,
            nru: self.nru,
            deleted: self.deleted,
            dirty: self.dirty,
            new_cache_item: self.new_cache_item,
            temp: self.temp,
            next,
        }
    }

    /// Per-record overhead excluding the payload.
    #[inline]
    pub fn metadata_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.key.size()
    }

    /// Memory needed to hold `item` as a record.
    #[inline]
    pub fn required_size(item: &Item) -> usize {
        std::mem::size_of::<Self>() + item.key().size() + item.n_bytes()
    }

    /// Full footprint: overhead plus payload.
    #[inline]
    pub fn size(&self) -> usize {
        self.metadata_size() + self.valuelen()
    }

    /// Length of the resident payload; zero when evicted or deleted.
    #[inline]
    pub fn valuelen(&self) -> usize {
        self.value.as_ref().map_or(0, |v| v.len())
    }

    #[inline]
    pub fn has_key(&self, key: &DocKey) -> bool {
        self.key == *key
    }

    #[inline]
    pub fn key(&self) -> &DocKey {
        &self.key
    }

    #[inline]
    pub fn value(&self) -> Option<&Bytes> {
        self.value.as_ref()
    }

    #[inline]
    pub fn cas(&self) -> u64 {
        self.meta.cas
    }

    #[inline]
    pub fn set_cas(&mut self, cas: u64) {
        self.meta.cas = cas;
    }

    #[inline]
    pub fn rev_seqno(&self) -> u64 {
        self.meta.rev_seqno
    }

    #[inline]
    pub fn by_seqno(&self) -> i64 {
        self.by_seqno
    }

    #[inline]
    pub fn set_by_seqno(&mut self, by_seqno: i64) {
        self.by_seqno = by_seqno;
    }

    #[inline]
    pub fn flags(&self) -> u32 {
        self.meta.flags
    }

    #[inline]
    pub fn exptime(&self) -> u32 {
        self.meta.exptime
    }

    #[inline]
    pub fn datatype(&self) -> u8 {
        self.datatype
    }

    /// A record is resident while it holds its payload.
    #[inline]
    pub fn is_resident(&self) -> bool {
        self.value.is_some()
    }

    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    #[inline]
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    #[inline]
    pub fn temp_state(&self) -> Option<TempState> {
        self.temp
    }

    #[inline]
    pub fn is_temp_item(&self) -> bool {
        self.temp.is_some()
    }

    #[inline]
    pub fn is_temp_initial_item(&self) -> bool {
        self.temp == Some(TempState::Initial)
    }

    #[inline]
    pub fn is_temp_deleted_item(&self) -> bool {
        self.temp == Some(TempState::Deleted)
    }

    #[inline]
    pub fn is_temp_non_existent_item(&self) -> bool {
        self.temp == Some(TempState::NonExistent)
    }

    /// Record that the background fetch found nothing for this key.
    pub fn set_non_existent(&mut self) {
        self.temp = Some(TempState::NonExistent);
    }

    #[inline]
    pub fn is_new_cache_item(&self) -> bool {
        self.new_cache_item
    }

    #[inline]
    pub fn set_new_cache_item(&mut self, new_cache_item: bool) {
        self.new_cache_item = new_cache_item;
    }

    #[inline]
    pub fn nru(&self) -> u8 {
        self.nru
    }

    /// Set the NRU marker, clamped to [`nru::MAX`].
    #[inline]
    pub fn set_nru(&mut self, value: u8) {
        self.nru = value.min(nru::MAX);
    }

    /// Note an access: move the NRU marker one step towards "recent".
    #[inline]
    pub fn referenced(&mut self) {
        if self.nru > nru::MIN {
            self.nru -= 1;
        }
    }

    /// Age the record one step towards "not recently used". Returns the new
    /// marker.
    #[inline]
    pub fn age(&mut self) -> u8 {
        if self.nru < nru::MAX {
            self.nru += 1;
        }
        self.nru
    }

    /// Pin the record until `expiry` (seconds since the epoch).
    pub fn lock(&mut self, expiry: u32) {
        self.lock_expiry = expiry;
    }

    pub fn unlock(&mut self) {
        self.lock_expiry = 0;
    }

    /// Returns `true` if the record is pinned at time `now`.
    #[inline]
    pub fn is_locked(&self, now: u32) -> bool {
        self.lock_expiry != 0 && now < self.lock_expiry
    }

    /// Returns `true` if the record has an expiry at or before `now`.
    #[inline]
    pub fn is_expired(&self, now: u32) -> bool {
        self.meta.exptime != 0 && self.meta.exptime <= now
    }

    /// Whether the record may be evicted under `policy`.
    ///
    /// Dirty and pinned records are never eligible. Value-only eviction also
    /// needs a resident, live, non-placeholder record.
    pub fn eligible_for_eviction(&self, policy: EvictionPolicy) -> bool {
        if self.dirty || self.is_locked(current_time_secs()) {
            return false;
        }
        match policy {
            EvictionPolicy::ValueOnly => {
                self.is_resident() && !self.deleted && !self.is_temp_item()
            }
            EvictionPolicy::Full => true,
        }
    }

    /// Drop the payload, keeping key and metadata.
    pub fn eject_value(&mut self) {
        self.value = None;
    }

    /// Replace value and metadata from `item` in place.
    ///
    /// Clears any pin and temp state; the record takes the item's deletion
    /// state and becomes dirty.
    pub fn set_value(&mut self, item: &Item) {
        self.value = item.value().cloned();
        self.meta = *item.meta();
        self.by_seqno = item.by_seqno();
        self.datatype = item.datatype();
        self.deleted = item.is_deleted();
        self.nru = item.nru();
        self.lock_expiry = 0;
        self.temp = item.temp_state();
        self.new_cache_item = false;
        self.dirty = true;
    }

    /// Flag the record deleted, keeping the payload.
    pub fn mark_deleted(&mut self) {
        self.deleted = true;
        self.dirty = true;
    }

    /// Delete the record: release the payload and flag it deleted.
    ///
    /// Placeholders become real tombstones. Returns `false` if the record was
    /// already a deleted tombstone without payload.
    pub fn del(&mut self) -> bool {
        if self.deleted && self.value.is_none() && self.temp.is_none() {
            return false;
        }
        self.value = None;
        self.datatype = datatype::RAW;
        self.deleted = true;
        self.temp = None;
        self.dirty = true;
        true
    }

    /// Bring a value back into memory after a background fetch.
    ///
    /// A temp-initial placeholder also takes the fetched metadata and becomes
    /// a regular record.
    pub fn restore_value(&mut self, item: &Item) {
        if self.is_temp_initial_item() {
            self.meta = *item.meta();
            self.by_seqno = item.by_seqno();
            self.nru = nru::INITIAL;
            self.temp = None;
            self.new_cache_item = false;
        }
        self.datatype = item.datatype();
        self.deleted = item.is_deleted();
        self.value = item.value().cloned();
    }

    /// Fill a placeholder's metadata after a metadata-only background fetch.
    ///
    /// A deleted result leaves the record a temp-deleted placeholder; a live
    /// result turns it into a regular, non-resident record.
    pub fn restore_meta(&mut self, item: &Item) {
        self.meta = *item.meta();
        self.datatype = item.datatype();
        if item.is_deleted() {
            self.deleted = true;
            self.temp = Some(TempState::Deleted);
        } else {
            self.by_seqno = item.by_seqno();
            self.temp = None;
            self.new_cache_item = false;
        }
        if self.nru == nru::MAX {
            self.nru = nru::INITIAL;
        }
    }

    /// Snapshot the record as an item.
    pub fn to_item(&self) -> Item {
        Item::from_parts(
            self.key.clone(),
            self.meta,
            self.value.clone(),
            self.by_seqno,
            self.datatype,
            self.deleted,
            self.nru,
            self.temp,
        )
    }

    #[inline]
    pub fn next(&self) -> Option<&StoredValue> {
        self.next.as_deref()
    }
}

impl Drop for StoredValue {
    // Unlink iteratively so dropping a long chain cannot overflow the stack.
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some(mut node) = next {
            next = node.next.take();
        }
    }
}

impl fmt::Debug for StoredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SV @{:p} {}{}{}{} cas:{} rev:{} seq:{} key:{:?} datatype:{} valuelen:{} nru:{}",
            self,
            if self.dirty { 'W' } else { '.' },
            if self.deleted { 'D' } else { '.' },
            if self.is_resident() { 'R' } else { '.' },
            match self.temp {
                None => '.',
                Some(TempState::Initial) => 'I',
                Some(TempState::Deleted) => 'd',
                Some(TempState::NonExistent) => 'N',
            },
            self.meta.cas,
            self.meta.rev_seqno,
            self.by_seqno,
            self.key,
            self.datatype,
            self.valuelen(),
            self.nru,
        )
    }
}
