//! Storage engine: blob allocator, access methods and versioning.
//!
//! Values live as blobs in the slotted [`alloc::Allocator`]; an access method implementing
//! [`IndexEngine`] maps encoded keys to blob references; [`heading`] records which access method
//! and which key/value types a store was created with.

/// Slotted blob allocator over the page manager.
pub mod alloc;

/// Ordered B+Tree access method.
pub mod btree;

/// Key and value codecs.
pub mod codec;

/// Heading page at index 0.
pub mod heading;

/// Access-method contract shared by the trees.
pub mod index;

/// Multi-version concurrency control.
pub mod mvcc;

/// Prefix-compressed radix tree access method.
pub mod radix;

pub use alloc::{Allocator, AllocatorMetricsSnapshot, DbItemReference, SizeRange};
pub use btree::BPlusTree;
pub use codec::{KeyCodec, ValCodec};
pub use heading::{Heading, HeadingSettings, HEADING_PAGE};
pub use index::{AccessMethod, ConsistencyReport, IndexEngine};
pub use radix::RadixTree;
