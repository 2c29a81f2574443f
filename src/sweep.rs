//! Background sweeps built on the visitor protocol.
//!
//! - [`ExpirySweep`] tombstones records whose expiry time has passed.
//! - [`EvictionSweep`] ages records and evicts the ones that stay unused.
//!
//! Both are driven by [`HashTable::pause_resume_visit`] from a background
//! task; the eviction sweep pauses itself once it has freed enough.
//!
//! [`HashTable::pause_resume_visit`]: crate::HashTable::pause_resume_visit

use crate::eviction::EvictionPolicy;
use crate::item::nru;
use crate::stored_value::current_time_secs;
use crate::visitor::{HashTableVisitor, VisitEntry};

/// Soft-deletes live records that expired at or before `now`.
#[derive(Debug, Clone)]
pub struct ExpirySweep {
    now: u32,
    visited: usize,
    expired: usize,
}

impl ExpirySweep {
    /// Sweep against `now`, in seconds since the epoch.
    pub fn new(now: u32) -> Self {
        Self {
            now,
            visited: 0,
            expired: 0,
        }
    }

    /// Sweep against the current time.
    pub fn at_current_time() -> Self {
        Self::new(current_time_secs())
    }

    pub fn visited(&self) -> usize {
        self.visited
    }

    pub fn expired(&self) -> usize {
        self.expired
    }
}

impl HashTableVisitor for ExpirySweep {
    fn visit(&mut self, entry: &mut VisitEntry<'_>) -> bool {
        self.visited += 1;
        let v = entry.value();
        if !v.is_temp_item() && !v.is_deleted() && v.is_expired(self.now) {
            entry.soft_delete(false);
            self.expired += 1;
        }
        true
    }
}

/// Ages every live record one NRU step and evicts records already at
/// [`nru::MAX`].
///
/// Pauses once `target` records have been evicted.
#[derive(Debug, Clone)]
pub struct EvictionSweep {
    policy: EvictionPolicy,
    target: usize,
    visited: usize,
    ejected: usize,
}

impl EvictionSweep {
    pub fn new(policy: EvictionPolicy, target: usize) -> Self {
        Self {
            policy,
            target,
            visited: 0,
            ejected: 0,
        }
    }

    pub fn visited(&self) -> usize {
        self.visited
    }

    pub fn ejected(&self) -> usize {
        self.ejected
    }

    /// Whether the sweep has evicted as many records as it was asked to.
    pub fn is_done(&self) -> bool {
        self.ejected >= self.target
    }
}

impl HashTableVisitor for EvictionSweep {
    fn visit(&mut self, entry: &mut VisitEntry<'_>) -> bool {
        self.visited += 1;
        let policy = self.policy;
        let v = entry.value_mut();
        if v.is_temp_item() || v.is_deleted() {
            return true;
        }
        if policy == EvictionPolicy::ValueOnly && !v.is_resident() {
            return true;
        }
        if v.nru() < nru::MAX {
            v.age();
            return true;
        }

        if entry.eject(policy) {
            self.ejected += 1;
        }
        !self.is_done()
    }
}
