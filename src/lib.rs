//! Embedded paged key-value store.
//!
//! A store is a content file of fixed-size pages plus a `-map` file that maps logical page
//! numbers to file offsets. Keys are kept ordered in a B+ tree or a radix tree; values
//! live in a slotted blob allocator. [`Storage`] is the plain typed store and
//! [`VersionedStorage`] adds snapshot-isolated transactions on top of the same layout.

#![warn(missing_docs)]

pub mod admin;
pub mod db;
pub mod logging;
pub mod primitives;
pub mod storage;
pub mod types;

pub use db::{Storage, StorageConfig, StorageStats, VacuumReport, VersionedStorage};
pub use logging::init_logging;
pub use storage::index::{AccessMethod, ConsistencyReport};
pub use storage::mvcc::{Transaction, TransactionState};
pub use storage::{KeyCodec, ValCodec};
pub use types::{Result, StoreError};
