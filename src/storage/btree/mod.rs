#![forbid(unsafe_code)]

//! B+ tree access method.
//!
//! Each node occupies one page; decoded nodes ride along with cached pages as
//! [`crate::primitives::pager::PageBacking::BPlusTreeNode`].

mod check;
mod node;
mod node_storage;
mod tree;

pub use node::{node_capacity, BPlusTreeNode, NODE_HEADER_LEN};
pub use node_storage::NodeStorage;
pub use tree::BPlusTree;
