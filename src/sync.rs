//! Synchronization primitives with optional loom support.
//!
//! Atomics come from loom when the `loom` feature is enabled so the visitor
//! registration protocol can be model checked. Shard locks always use
//! `parking_lot`, which loom cannot model; loom tests only exercise the
//! atomic protocols.

#[cfg(not(feature = "loom"))]
pub use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

#[cfg(feature = "loom")]
pub use loom::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

pub use parking_lot::{Condvar, Mutex, MutexGuard};
