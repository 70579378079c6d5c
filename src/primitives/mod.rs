//! Low-level primitives for building the storage engine.
//!
//! Includes positioned file I/O and the paging layer (page map, file page manager and the
//! bounded page cache).

/// I/O abstractions and utilities.
///
/// Interfaces for reading/writing data and file operations.
pub mod io;

/// Paging subsystem.
///
/// Manages logical pages, their on-disk placement, and caching.
pub mod pager;
