//! Bucket chain helpers.
//!
//! A chain is an `Option<Box<StoredValue>>` slot: the bucket head, or the
//! `next` link of a record. Helpers here walk and splice chains without raw
//! pointers; every removal moves the removed record's successor into the
//! slot that owned it.

use crate::stored_value::StoredValue;

/// A slot owning the rest of a chain.
pub type Link = Option<Box<StoredValue>>;

/// Find the slot whose record matches `pred`.
///
/// Returns the owning slot rather than the record so the caller can unlink
/// it in place.
pub(crate) fn find_link<F>(mut link: &mut Link, mut pred: F) -> Option<&mut Link>
where
    F: FnMut(&StoredValue) -> bool,
{
    loop {
        let hit = match link.as_deref() {
            None => return None,
            Some(v) => pred(v),
        };
        if hit {
            return Some(link);
        }
        link = match link {
            Some(v) => &mut v.next,
            None => return None,
        };
    }
}

/// Unlink the record at the head of `link`, splicing its successor in.
pub(crate) fn unlink_head(link: &mut Link) -> Option<Box<StoredValue>> {
    let mut removed = link.take()?;
    *link = removed.next.take();
    Some(removed)
}

/// Remove the first record matching `pred`.
pub(crate) fn remove_first<F>(head: &mut Link, pred: F) -> Option<Box<StoredValue>>
where
    F: FnMut(&StoredValue) -> bool,
{
    find_link(head, pred).and_then(unlink_head)
}

/// Link `record` at the front of the chain.
pub(crate) fn push_front(head: &mut Link, mut record: Box<StoredValue>) -> &mut StoredValue {
    record.next = head.take();
    head.insert(record)
}

/// Iterate over the records of a chain.
pub fn iter(head: &Link) -> ChainIter<'_> {
    ChainIter {
        current: head.as_deref(),
    }
}

/// Iterator over a bucket chain.
pub struct ChainIter<'a> {
    current: Option<&'a StoredValue>,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = &'a StoredValue;

    fn next(&mut self) -> Option<Self::Item> {
        let v = self.current?;
        self.current = v.next();
        Some(v)
    }
}
