//! kv-index: the concurrent, resizable hash index of an in-memory key/value
//! engine.
//!
//! The index maps document keys to versioned value records and keeps running
//! statistics that always agree with a full scan once mutations quiesce.
//!
//! - **Records**: `StoredValue` chains, one per bucket, built by a pluggable
//!   `StoredValueFactory`
//! - **Locking**: a fixed set of shard locks; bucket `b` belongs to lock
//!   `b % num_locks`
//! - **Resizing**: online rehash onto a prime size ladder, excluded while any
//!   visitor runs
//! - **Visitors**: pausable, resumable full-table walks (expiry, eviction,
//!   diagnostics)
//! - **Statistics**: per-table `HashTableStats` plus the engine-wide
//!   `EngineStats` quota
//!
//! # Architecture
//!
//! ```text
//!   find / set / unlocked_*          resize            pause_resume_visit
//!            |                          |                      |
//!            v                          v                      v
//!   +-----------------+      +---------------------+  +-----------------+
//!   | one shard lock  |      | every shard lock    |  | one bucket lock |
//!   +-----------------+      | (no visitors)       |  | at a time       |
//!            |               +---------------------+  +-----------------+
//!            v                          |                      |
//!   +---------------------------------------------------------------+
//!   | shard 0: [b0, bN, b2N, ...]   shard 1: [b1, bN+1, ...]   ...  |
//!   +---------------------------------------------------------------+
//!            |
//!            v
//!   HashTableStats ---> EngineStats (shared)
//! ```
//!
//! # Example
//!
//! ```
//! use kv_index::{DocKey, HashTable, Item, MutationStatus, TrackReference, WantsDeleted, datatype};
//!
//! let table = HashTable::builder()
//!     .initial_size(47)
//!     .num_locks(47)
//!     .build()
//!     .unwrap();
//!
//! let item = Item::new("a", 0, 0, &b"v1"[..], datatype::RAW);
//! assert_eq!(table.set(&item), MutationStatus::InsertedClean);
//!
//! let found = table
//!     .find(&DocKey::from("a"), TrackReference::Yes, WantsDeleted::No)
//!     .unwrap();
//! assert_eq!(found.value().unwrap().as_ref(), b"v1");
//! ```

#![warn(clippy::all)]

mod chain;
mod codec;
mod config;
mod error;
mod eviction;
mod factory;
mod hashtable;
mod item;
mod key;
mod lock;
mod resize;
mod stats;
mod status;
mod stored_value;
mod sweep;
mod sync;
mod visitor;

pub mod metrics;

pub use chain::Link;
pub use codec::ValueCodec;
pub use config::{DEFAULT_INITIAL_SIZE, DEFAULT_NUM_LOCKS, HashTableConfig, MAX_SIZE};
pub use error::{ConfigError, ConfigResult};
pub use eviction::EvictionPolicy;
pub use factory::{DefaultStoredValueFactory, StoredValueFactory};
pub use hashtable::{HashTable, HashTableBuilder};
pub use item::{Item, ItemMetaData, TempState, datatype, nru};
pub use key::{DocKey, DocNamespace};
pub use lock::HashBucketLock;
pub use resize::{PRIME_SIZE_TABLE, select_size};
pub use stats::{DEFAULT_MUTATION_MEM_THRESHOLD, EngineStats, HashTableStats, StatsSnapshot};
pub use status::{MutationStatus, ResizeOutcome, TrackReference, WantsDeleted};
pub use stored_value::StoredValue;
pub use sweep::{EvictionSweep, ExpirySweep};
pub use visitor::{HashTableDepthVisitor, HashTableVisitor, Position, VisitEntry};
