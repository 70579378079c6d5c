use std::convert::TryInto;

use smallvec::SmallVec;

use crate::storage::alloc::DbItemReference;
use crate::types::{Result, StoreError};

const HAS_VALUE: u8 = 0b01;
const HAS_PARENT: u8 = 0b10;
const REF_LEN: usize = DbItemReference::ENCODED_LEN;

/// Child list keyed by the first byte of each child's prefix, kept sorted.
pub type Children = SmallVec<[(u8, DbItemReference); 4]>;

/// Radix tree node stored as one allocator blob.
///
/// Layout: `[flags u8][prefix_len u32][prefix][value?][parent?][child_count u16]` followed by
/// `child_count` entries of `[byte u8][reference]`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RadixTreeNode {
    /// Bytes consumed by this node; empty only for the root.
    pub prefix: Vec<u8>,
    /// Value blob for the key ending here.
    pub value: Option<DbItemReference>,
    /// Parent node, `None` for the root.
    pub parent: Option<DbItemReference>,
    /// Sorted children.
    pub children: Children,
}

impl RadixTreeNode {
    /// Index of the child whose prefix starts with `byte`.
    pub fn child_position(&self, byte: u8) -> std::result::Result<usize, usize> {
        self.children.binary_search_by_key(&byte, |(b, _)| *b)
    }

    /// Child whose prefix starts with `byte`.
    pub fn child(&self, byte: u8) -> Option<DbItemReference> {
        self.child_position(byte).ok().map(|at| self.children[at].1)
    }

    /// Inserts or replaces the child entry for `byte`.
    pub fn set_child(&mut self, byte: u8, child: DbItemReference) {
        match self.child_position(byte) {
            Ok(at) => self.children[at].1 = child,
            Err(at) => self.children.insert(at, (byte, child)),
        }
    }

    /// Drops the child entry for `byte`.
    pub fn remove_child(&mut self, byte: u8) -> Option<DbItemReference> {
        self.child_position(byte)
            .ok()
            .map(|at| self.children.remove(at).1)
    }

    /// Serialized form.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            1 + 4 + self.prefix.len() + 2 * REF_LEN + 2 + self.children.len() * (1 + REF_LEN),
        );
        let mut flags = 0u8;
        if self.value.is_some() {
            flags |= HAS_VALUE;
        }
        if self.parent.is_some() {
            flags |= HAS_PARENT;
        }
        out.push(flags);
        out.extend_from_slice(&(self.prefix.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.prefix);
        if let Some(value) = self.value {
            out.extend_from_slice(&value.encode());
        }
        if let Some(parent) = self.parent {
            out.extend_from_slice(&parent.encode());
        }
        out.extend_from_slice(&(self.children.len() as u16).to_be_bytes());
        for (byte, child) in &self.children {
            out.push(*byte);
            out.extend_from_slice(&child.encode());
        }
        out
    }

    /// Parses [`RadixTreeNode::encode`] output.
    pub fn decode(src: &[u8]) -> Result<Self> {
        let mut cursor = Cursor { src, at: 0 };
        let flags = cursor.take(1)?[0];
        if flags & !(HAS_VALUE | HAS_PARENT) != 0 {
            return Err(StoreError::Corruption("unknown radix node flags"));
        }
        let prefix_len = u32::from_be_bytes(cursor.take(4)?.try_into().unwrap()) as usize;
        let prefix = cursor.take(prefix_len)?.to_vec();
        let value = if flags & HAS_VALUE != 0 {
            Some(DbItemReference::decode(cursor.take(REF_LEN)?)?)
        } else {
            None
        };
        let parent = if flags & HAS_PARENT != 0 {
            Some(DbItemReference::decode(cursor.take(REF_LEN)?)?)
        } else {
            None
        };
        let count = u16::from_be_bytes(cursor.take(2)?.try_into().unwrap());
        let mut children = Children::with_capacity(count as usize);
        for _ in 0..count {
            let byte = cursor.take(1)?[0];
            let child = DbItemReference::decode(cursor.take(REF_LEN)?)?;
            children.push((byte, child));
        }
        if cursor.at != src.len() {
            return Err(StoreError::Corruption("trailing bytes after radix node"));
        }
        Ok(Self {
            prefix,
            value,
            parent,
            children,
        })
    }
}

struct Cursor<'a> {
    src: &'a [u8],
    at: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .at
            .checked_add(len)
            .filter(|&end| end <= self.src.len())
            .ok_or(StoreError::Corruption("radix node truncated"))?;
        let out = &self.src[self.at..end];
        self.at = end;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PageId;

    #[test]
    fn children_stay_sorted() {
        let mut node = RadixTreeNode::default();
        node.set_child(b'm', DbItemReference::new(PageId(3), 1));
        node.set_child(b'a', DbItemReference::new(PageId(3), 2));
        node.set_child(b'z', DbItemReference::new(PageId(3), 3));
        node.set_child(b'm', DbItemReference::new(PageId(4), 0));
        let bytes: Vec<u8> = node.children.iter().map(|(b, _)| *b).collect();
        assert_eq!(bytes, b"amz");
        assert_eq!(node.child(b'm'), Some(DbItemReference::new(PageId(4), 0)));
        assert_eq!(node.remove_child(b'a'), Some(DbItemReference::new(PageId(3), 2)));
        assert_eq!(node.child(b'a'), None);
    }

    #[test]
    fn node_survives_encoding() {
        let mut node = RadixTreeNode {
            prefix: b"hello".to_vec(),
            value: Some(DbItemReference::new(PageId(9), 4)),
            parent: Some(DbItemReference::new(PageId(2), 0)),
            children: Children::new(),
        };
        node.set_child(b'x', DbItemReference::new(PageId(5), 5));
        assert_eq!(RadixTreeNode::decode(&node.encode()).unwrap(), node);
        let root = RadixTreeNode::default();
        assert_eq!(RadixTreeNode::decode(&root.encode()).unwrap(), root);
        assert!(RadixTreeNode::decode(&node.encode()[..7]).is_err());
    }
}
