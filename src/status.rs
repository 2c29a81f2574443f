//! Status values and per-call option flags.

/// Outcome of a mutation against the hashtable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
    /// The key was absent and a new record was linked into its bucket.
    InsertedClean,

    /// An existing record was updated; it had no unpersisted changes.
    WasClean,

    /// An existing record was updated; it already had unpersisted changes.
    WasDirty,

    /// There is no capacity for the value. The table was not locked or
    /// modified and the caller should apply backpressure.
    NoMem,
}

impl MutationStatus {
    /// Returns `true` if the mutation was applied.
    #[inline]
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::NoMem)
    }
}

/// Outcome of a resize attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeOutcome {
    /// The bucket array was rebuilt.
    Resized {
        /// Bucket count before the resize.
        from: usize,
        /// Bucket count after the resize.
        to: usize,
    },

    /// The target size equals the current size.
    Unchanged,

    /// A visitor was mid-traversal; a later attempt will pick it up.
    VisitorsActive,

    /// The target size exceeds the maximum representable bucket count.
    TooLarge,
}

/// Whether a lookup should mark the record as recently accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackReference {
    /// Mark the record as referenced (unless it is deleted).
    Yes,
    /// Leave the access marker untouched.
    No,
}

/// Whether a lookup should return soft-deleted records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WantsDeleted {
    /// Return tombstones as well as live records.
    Yes,
    /// Treat tombstones as not found.
    No,
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_status_success() {
        assert!(MutationStatus::InsertedClean.is_success());
        assert!(MutationStatus::WasClean.is_success());
        assert!(MutationStatus::WasDirty.is_success());
        assert!(!MutationStatus::NoMem.is_success());
    }
}
