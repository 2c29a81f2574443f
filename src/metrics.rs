//! Process-wide hashtable metrics.
//!
//! These counters aggregate across every table in the process and are
//! exposed through `metriken`. Per-table figures live in
//! [`crate::HashTableStats`].

use metriken::{Counter, metric};

#[metric(
    name = "hashtable_resizes",
    description = "Number of completed hashtable resizes"
)]
pub static RESIZES: Counter = Counter::new();

#[metric(
    name = "hashtable_resizes_skipped",
    description = "Resize attempts skipped because a visitor was active or the size was too large"
)]
pub static RESIZES_SKIPPED: Counter = Counter::new();

#[metric(
    name = "hashtable_value_ejects",
    description = "Records evicted from a hashtable"
)]
pub static VALUE_EJECTS: Counter = Counter::new();

#[metric(
    name = "hashtable_failed_ejects",
    description = "Eviction attempts on records that were not eligible"
)]
pub static FAILED_EJECTS: Counter = Counter::new();

#[metric(
    name = "hashtable_visitor_passes",
    description = "Completed or paused pausable visitor passes"
)]
pub static VISITOR_PASSES: Counter = Counter::new();

#[metric(
    name = "hashtable_soft_deletes",
    description = "Records turned into tombstones"
)]
pub static SOFT_DELETES: Counter = Counter::new();
