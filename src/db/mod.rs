//! Typed store wrappers.
//!
//! [`Storage`] and [`VersionedStorage`] share one lock-guarded core holding the page cache, the
//! blob allocator and the configured access method. Reads hold the shared lock, writes the
//! exclusive one. A background thread flushes the store once it has been idle for
//! `auto_flush_timeout_ms`, and every `auto_flush_interval` writes trigger a flush inline.

mod autoflush;
mod config;
mod core;
mod shared;
mod storage;
mod versioned;


pub use config::StorageConfig;
pub use self::core::{StorageStats, VacuumReport};
pub use storage::Storage;
pub use versioned::VersionedStorage;
