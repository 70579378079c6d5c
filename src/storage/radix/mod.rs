#![forbid(unsafe_code)]

//! Radix tree access method.
//!
//! Keys of any length; nodes live in the slotted allocator rather than on dedicated pages.

mod node;
mod tree;

pub use node::{Children, RadixTreeNode};
pub use tree::RadixTree;

#[cfg(test)]
mod tests;
