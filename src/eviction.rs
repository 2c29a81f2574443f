//! Eviction policy definitions.

/// How much of a record an ejection frees.
///
/// The policy is chosen per call by the background eviction task; the
/// hashtable does not store it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Free the payload only. Key and metadata stay resident so lookups
    /// still find the record.
    #[default]
    ValueOnly,

    /// Unlink and free the whole record. The backing store remains the
    /// source of truth for the key.
    Full,
}
