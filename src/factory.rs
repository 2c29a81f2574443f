//! Record construction.
//!
//! The hashtable never builds records directly. It asks the factory supplied
//! at construction time, so engines can choose how records are laid out
//! without the table knowing more than the [`StoredValue`] contract.

use crate::chain::Link;
use crate::item::Item;
use crate::stored_value::StoredValue;

/// Builds records for a hashtable.
///
/// Both operations receive the chain the new record must own as its tail.
pub trait StoredValueFactory: Send + Sync {
    /// Build a new record from an inbound item.
    fn create(&self, item: &Item, next: Link) -> Box<StoredValue>;

    /// Build a copy of an existing record.
    fn copy(&self, other: &StoredValue, next: Link) -> Box<StoredValue>;
}

/// Factory producing plain heap-allocated records.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultStoredValueFactory;

impl StoredValueFactory for DefaultStoredValueFactory {
    fn create(&self, item: &Item, next: Link) -> Box<StoredValue> {
        Box::new(StoredValue::new(item, next))
    }

    fn copy(&self, other: &StoredValue, next: Link) -> Box<StoredValue> {
        Box::new(other.duplicate(next))
    }
}
