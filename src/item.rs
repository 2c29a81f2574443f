//! Items: values moving into and out of the hashtable.
//!
//! An [`Item`] is the engine's view of a document version. The hashtable
//! builds its resident records from items and hands out item snapshots on
//! lookup, so callers never hold references into a bucket chain.

use crate::codec::ValueCodec;
use crate::key::DocKey;
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Datatype tag bits.
pub mod datatype {
    /// Opaque bytes.
    pub const RAW: u8 = 0;
    /// The payload is JSON.
    pub const JSON: u8 = 1;
    /// The payload is compressed.
    pub const SNAPPY: u8 = 2;
    /// The payload carries extended attributes.
    pub const XATTR: u8 = 4;

    /// Returns `true` if the SNAPPY bit is set.
    #[inline]
    pub fn is_snappy(datatype: u8) -> bool {
        datatype & SNAPPY != 0
    }
}

/// Not-recently-used marker values. Lower means more recently accessed.
pub mod nru {
    /// Most recently used.
    pub const MIN: u8 = 0;
    /// Value given to new records.
    pub const INITIAL: u8 = 2;
    /// Least recently used; the record is an eviction candidate.
    pub const MAX: u8 = 3;
}

// AtomicU64 here is a process-wide version source, not something loom
// needs to model, so std is used directly.
static CAS_COUNTER: AtomicU64 = AtomicU64::new(1);

/// State of a placeholder record created while a background fetch is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempState {
    /// The fetch has been scheduled and has not completed.
    Initial,
    /// The fetch completed and found a deleted document.
    Deleted,
    /// The fetch completed and found no document.
    NonExistent,
}

/// Per-version metadata carried with every item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ItemMetaData {
    /// Version token.
    pub cas: u64,
    /// Revision sequence number.
    pub rev_seqno: u64,
    /// Client flags.
    pub flags: u32,
    /// Expiry time in seconds since the epoch, 0 for none.
    pub exptime: u32,
}

/// A document version.
#[derive(Clone, PartialEq, Eq)]
pub struct Item {
    key: DocKey,
    meta: ItemMetaData,
    value: Option<Bytes>,
    by_seqno: i64,
    vbucket: u16,
    datatype: u8,
    deleted: bool,
    nru: u8,
    temp: Option<TempState>,
}

impl Item {
    /// Size of the fixed metadata: flags, exptime, cas, rev seqno and
    /// key length.
    pub const META_DATA_SIZE: usize = 2 * 4 + 2 * 8 + 2;

    /// Next value from the process-wide CAS source. Values are unique and
    /// strictly increasing.
    #[inline]
    pub fn next_cas() -> u64 {
        CAS_COUNTER.fetch_add(1, Ordering::Relaxed)
    }

    /// Create an item with a value.
    ///
    /// The CAS is left at zero; the hashtable stamps a fresh one when the
    /// item is stored.
    pub fn new(
        key: impl Into<DocKey>,
        flags: u32,
        exptime: u32,
        value: impl Into<Bytes>,
        datatype: u8,
    ) -> Self {
        Self {
            key: key.into(),
            meta: ItemMetaData {
                cas: 0,
                rev_seqno: 1,
                flags,
                exptime,
            },
            value: Some(value.into()),
            by_seqno: 1,
            vbucket: 0,
            datatype,
            deleted: false,
            nru: nru::INITIAL,
            temp: None,
        }
    }

    /// Create a deletion (tombstone) item without a value.
    pub fn new_deleted(key: impl Into<DocKey>) -> Self {
        Self {
            key: key.into(),
            meta: ItemMetaData {
                rev_seqno: 1,
                ..Default::default()
            },
            value: None,
            by_seqno: 1,
            vbucket: 0,
            datatype: datatype::RAW,
            deleted: true,
            nru: nru::INITIAL,
            temp: None,
        }
    }

    /// Create a placeholder item for a key whose value is being fetched.
    pub fn new_temp(key: impl Into<DocKey>, state: TempState) -> Self {
        Self {
            key: key.into(),
            meta: ItemMetaData::default(),
            value: None,
            by_seqno: 0,
            vbucket: 0,
            datatype: datatype::RAW,
            deleted: state == TempState::Deleted,
            nru: nru::MAX,
            temp: Some(state),
        }
    }

    /// Set the CAS.
    pub fn with_cas(mut self, cas: u64) -> Self {
        self.meta.cas = cas;
        self
    }

    /// Set the revision sequence number.
    pub fn with_rev_seqno(mut self, rev_seqno: u64) -> Self {
        self.meta.rev_seqno = rev_seqno;
        self
    }

    /// Set the by-sequence number.
    pub fn with_by_seqno(mut self, by_seqno: i64) -> Self {
        self.by_seqno = by_seqno;
        self
    }

    /// Set the vbucket id.
    pub fn with_vbucket(mut self, vbucket: u16) -> Self {
        self.vbucket = vbucket;
        self
    }

    /// Set the NRU marker.
    pub fn with_nru(mut self, nru: u8) -> Self {
        self.nru = nru.min(nru::MAX);
        self
    }

    /// Mark the item deleted, keeping any value.
    pub fn with_deleted(mut self, deleted: bool) -> Self {
        self.deleted = deleted;
        self
    }

    pub(crate) fn from_parts(
        key: DocKey,
        meta: ItemMetaData,
        value: Option<Bytes>,
        by_seqno: i64,
        datatype: u8,
        deleted: bool,
        nru: u8,
        temp: Option<TempState>,
    ) -> Self {
        Self {
            key,
            meta,
            value,
            by_seqno,
            vbucket: 0,
            datatype,
            deleted,
            nru,
            temp,
        }
    }

    /// The document key.
    #[inline]
    pub fn key(&self) -> &DocKey {
        &self.key
    }

    /// The metadata.
    #[inline]
    pub fn meta(&self) -> &ItemMetaData {
        &self.meta
    }

    /// The version token.
    #[inline]
    pub fn cas(&self) -> u64 {
        self.meta.cas
    }

    /// The revision sequence number.
    #[inline]
    pub fn rev_seqno(&self) -> u64 {
        self.meta.rev_seqno
    }

    /// Client flags.
    #[inline]
    pub fn flags(&self) -> u32 {
        self.meta.flags
    }

    /// Expiry time, 0 for none.
    #[inline]
    pub fn exptime(&self) -> u32 {
        self.meta.exptime
    }

    /// The value payload, if any.
    #[inline]
    pub fn value(&self) -> Option<&Bytes> {
        self.value.as_ref()
    }

    /// Length of the value payload.
    #[inline]
    pub fn n_bytes(&self) -> usize {
        self.value.as_ref().map_or(0, |v| v.len())
    }

    /// The by-sequence number.
    #[inline]
    pub fn by_seqno(&self) -> i64 {
        self.by_seqno
    }

    /// The vbucket id.
    #[inline]
    pub fn vbucket(&self) -> u16 {
        self.vbucket
    }

    /// The datatype tag.
    #[inline]
    pub fn datatype(&self) -> u8 {
        self.datatype
    }

    /// Returns `true` if this item represents a deletion.
    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// The NRU marker.
    #[inline]
    pub fn nru(&self) -> u8 {
        self.nru
    }

    /// The temp state, if this item is a placeholder.
    #[inline]
    pub fn temp_state(&self) -> Option<TempState> {
        self.temp
    }

    /// Total size: metadata, key and value.
    #[inline]
    pub fn size(&self) -> usize {
        Self::META_DATA_SIZE + self.key.size() + self.n_bytes()
    }

    /// Compress the value with `codec`.
    ///
    /// Values already flagged SNAPPY are left alone. The compressed form is
    /// kept only if it is no larger than `min_ratio` times the original.
    /// Returns `false` if the codec failed.
    pub fn compress_value(&mut self, codec: &dyn ValueCodec, min_ratio: f32) -> bool {
        if datatype::is_snappy(self.datatype) {
            return true;
        }
        let Some(value) = self.value.as_ref() else {
            return true;
        };
        let Some(deflated) = codec.compress(value) else {
            return false;
        };
        if deflated.len() as f32 > min_ratio * value.len() as f32 {
            return true;
        }
        self.value = Some(Bytes::from(deflated));
        self.datatype |= datatype::SNAPPY;
        true
    }

    /// Decompress the value with `codec` if it is flagged SNAPPY.
    ///
    /// Returns `false` if the codec rejected the payload.
    pub fn decompress_value(&mut self, codec: &dyn ValueCodec) -> bool {
        if !datatype::is_snappy(self.datatype) {
            return true;
        }
        let Some(value) = self.value.as_ref() else {
            return true;
        };
        let Some(inflated) = codec.decompress(value) else {
            return false;
        };
        self.value = Some(Bytes::from(inflated));
        self.datatype &= !datatype::SNAPPY;
        true
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Item")
            .field("key", &self.key)
            .field("cas", &self.meta.cas)
            .field("rev_seqno", &self.meta.rev_seqno)
            .field("flags", &self.meta.flags)
            .field("exptime", &self.meta.exptime)
            .field("n_bytes", &self.n_bytes())
            .field("by_seqno", &self.by_seqno)
            .field("vbucket", &self.vbucket)
            .field("datatype", &self.datatype)
            .field("deleted", &self.deleted)
            .field("nru", &self.nru)
            .field("temp", &self.temp)
            .finish()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    /// Run-length codec good enough to exercise the datatype bookkeeping.
    struct RunLength;

    impl ValueCodec for RunLength {
        fn compress(&self, input: &[u8]) -> Option<Vec<u8>> {
            let mut out = Vec::new();
            let mut iter = input.iter().peekable();
            while let Some(&b) = iter.next() {
                let mut run = 1u8;
                while run < u8::MAX && iter.peek() == Some(&&b) {
                    iter.next();
                    run += 1;
                }
                out.push(run);
                out.push(b);
            }
            Some(out)
        }

        fn decompress(&self, input: &[u8]) -> Option<Vec<u8>> {
            if input.len() % 2 != 0 {
                return None;
            }
            let mut out = Vec::new();
            for pair in input.chunks(2) {
                out.extend(std::iter::repeat(pair[1]).take(pair[0] as usize));
            }
            Some(out)
        }
    }

    #[test]
    fn test_next_cas_increases() {
        let a = Item::next_cas();
        let b = Item::next_cas();
        assert!(b > a);
    }

    #[test]
    fn test_new_item_defaults() {
        let item = Item::new("k", 7, 0, &b"value"[..], datatype::JSON);
        assert_eq!(item.cas(), 0);
        assert_eq!(item.flags(), 7);
        assert_eq!(item.n_bytes(), 5);
        assert_eq!(item.datatype(), datatype::JSON);
        assert!(!item.is_deleted());
        assert_eq!(item.nru(), nru::INITIAL);
        assert_eq!(item.size(), Item::META_DATA_SIZE + 2 + 5);
    }

    #[test]
    fn test_deleted_and_temp_items() {
        let del = Item::new_deleted("k");
        assert!(del.is_deleted());
        assert!(del.value().is_none());

        let temp = Item::new_temp("k", TempState::Initial);
        assert_eq!(temp.temp_state(), Some(TempState::Initial));
        assert!(!temp.is_deleted());

        let temp_del = Item::new_temp("k", TempState::Deleted);
        assert!(temp_del.is_deleted());
    }

    #[test]
    fn test_compress_sets_snappy_bit() {
        let mut item = Item::new("k", 0, 0, vec![b'a'; 200], datatype::JSON);
        assert!(item.compress_value(&RunLength, 0.9));
        assert!(datatype::is_snappy(item.datatype()));
        assert!(item.n_bytes() < 200);

        assert!(item.decompress_value(&RunLength));
        assert_eq!(item.datatype(), datatype::JSON);
        assert_eq!(item.value().unwrap().as_ref(), &vec![b'a'; 200][..]);
    }

    #[test]
    fn test_compress_skipped_when_ratio_not_met() {
        let mut item = Item::new("k", 0, 0, &b"abcdef"[..], datatype::RAW);
        assert!(item.compress_value(&RunLength, 0.5));
        assert!(!datatype::is_snappy(item.datatype()));
        assert_eq!(item.n_bytes(), 6);
    }

    #[test]
    fn test_decompress_rejects_bad_payload() {
        let mut item = Item::new("k", 0, 0, &b"abc"[..], datatype::SNAPPY);
        assert!(!item.decompress_value(&RunLength));
        assert!(datatype::is_snappy(item.datatype()));
    }
}
