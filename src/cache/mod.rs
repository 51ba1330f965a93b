//! Partitioned response cache.
//!
//! This module provides the storage side of the agent:
//! - A partitioned key/blob store with a SQLite backend
//! - Expiry metadata (`<key>.meta`) for remote-data entries
//! - A periodic sweeper that evicts expired entries

mod expiry;
mod storage;
mod sweeper;
mod traits;

pub use expiry::{data_key, meta_key, EntryMeta, ExpiryTracker, META_SUFFIX};
pub use storage::SqliteStore;
pub use sweeper::{SweepReport, Sweeper};
pub use traits::{BlobStore, Partition};
