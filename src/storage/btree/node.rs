use std::convert::TryInto;

use crate::storage::alloc::DbItemReference;
use crate::types::{page::PAGE_HDR_LEN, PageId, Result, StoreError};

/// Bytes used by the node header inside the page body.
pub const NODE_HEADER_LEN: usize = 40;

const KIND_OFFSET: usize = 0;
const COUNT_OFFSET: usize = 2;
const PARENT_OFFSET: usize = 8;
const PREV_OFFSET: usize = 16;
const NEXT_OFFSET: usize = 24;
const FIRST_CHILD_OFFSET: usize = 32;

const KIND_LEAF: u8 = 1;
const KIND_INTERNAL: u8 = 2;

/// Per-entry overhead: key length prefix plus the encoded reference.
const ENTRY_OVERHEAD: usize = 2 + DbItemReference::ENCODED_LEN;

/// Entries that fit one node page for keys of at most `max_key_size` bytes.
pub fn node_capacity(page_size: usize, max_key_size: usize) -> usize {
    let usable = page_size.saturating_sub(PAGE_HDR_LEN + NODE_HEADER_LEN);
    usable / (ENTRY_OVERHEAD + max_key_size)
}

/// Decoded B+ tree node.
///
/// Leaves map keys to value references. Internal nodes hold `first_child` plus entries whose
/// reference names the child holding keys `>=` the entry key; child references use slot 0.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BPlusTreeNode {
    /// Page holding the node.
    pub index: PageId,
    /// Leaf or internal.
    pub is_leaf: bool,
    /// Parent node, `None` for the root.
    pub parent: Option<PageId>,
    /// Left sibling leaf.
    pub prev: Option<PageId>,
    /// Right sibling leaf.
    pub next: Option<PageId>,
    /// Child holding keys below the first entry.
    pub first_child: Option<PageId>,
    /// Sorted, unique keys with their references.
    pub entries: Vec<(Vec<u8>, DbItemReference)>,
}

impl BPlusTreeNode {
    /// Empty leaf stored at `index`.
    pub fn new_leaf(index: PageId) -> Self {
        Self {
            index,
            is_leaf: true,
            parent: None,
            prev: None,
            next: None,
            first_child: None,
            entries: Vec::new(),
        }
    }

    /// Empty internal node stored at `index`.
    pub fn new_internal(index: PageId, first_child: PageId) -> Self {
        Self {
            index,
            is_leaf: false,
            parent: None,
            prev: None,
            next: None,
            first_child: Some(first_child),
            entries: Vec::new(),
        }
    }

    /// Position of `key`, or where it would be inserted.
    pub fn search(&self, key: &[u8]) -> std::result::Result<usize, usize> {
        self.entries.binary_search_by(|(k, _)| k.as_slice().cmp(key))
    }

    /// Child of an internal node that covers `key`.
    pub fn child_for(&self, key: &[u8]) -> Result<PageId> {
        let idx = self.entries.partition_point(|(k, _)| k.as_slice() <= key);
        if idx == 0 {
            self.first_child
                .ok_or(StoreError::Corruption("internal node without first child"))
        } else {
            Ok(self.entries[idx - 1].1.page)
        }
    }

    /// Every child in key order.
    pub fn children(&self) -> Vec<PageId> {
        let mut out = Vec::with_capacity(self.entries.len() + 1);
        out.extend(self.first_child);
        out.extend(self.entries.iter().map(|(_, child)| child.page));
        out
    }

    /// Serializes the node into a page body.
    pub fn encode(&self, body: &mut [u8]) -> Result<()> {
        if body.len() < NODE_HEADER_LEN {
            return Err(StoreError::Invalid("node body too small"));
        }
        body.fill(0);
        body[KIND_OFFSET] = if self.is_leaf { KIND_LEAF } else { KIND_INTERNAL };
        body[COUNT_OFFSET..COUNT_OFFSET + 2]
            .copy_from_slice(&(self.entries.len() as u16).to_be_bytes());
        body[PARENT_OFFSET..PARENT_OFFSET + 8]
            .copy_from_slice(&PageId::encode_opt(self.parent).to_be_bytes());
        body[PREV_OFFSET..PREV_OFFSET + 8]
            .copy_from_slice(&PageId::encode_opt(self.prev).to_be_bytes());
        body[NEXT_OFFSET..NEXT_OFFSET + 8]
            .copy_from_slice(&PageId::encode_opt(self.next).to_be_bytes());
        body[FIRST_CHILD_OFFSET..FIRST_CHILD_OFFSET + 8]
            .copy_from_slice(&PageId::encode_opt(self.first_child).to_be_bytes());
        let mut at = NODE_HEADER_LEN;
        for (key, item) in &self.entries {
            let end = at + ENTRY_OVERHEAD + key.len();
            if end > body.len() {
                return Err(StoreError::Invalid("node entries overflow the page"));
            }
            body[at..at + 2].copy_from_slice(&(key.len() as u16).to_be_bytes());
            body[at + 2..at + 2 + key.len()].copy_from_slice(key);
            body[at + 2 + key.len()..end].copy_from_slice(&item.encode());
            at = end;
        }
        Ok(())
    }

    /// Parses a node from the body of page `index`.
    pub fn decode(index: PageId, body: &[u8]) -> Result<Self> {
        if body.len() < NODE_HEADER_LEN {
            return Err(StoreError::Corruption("node body truncated"));
        }
        let is_leaf = match body[KIND_OFFSET] {
            KIND_LEAF => true,
            KIND_INTERNAL => false,
            _ => return Err(StoreError::Corruption("unknown node kind")),
        };
        let read_u64 = |offset: usize| u64::from_be_bytes(body[offset..offset + 8].try_into().unwrap());
        let count = u16::from_be_bytes(body[COUNT_OFFSET..COUNT_OFFSET + 2].try_into().unwrap());
        let mut entries = Vec::with_capacity(count as usize);
        let mut at = NODE_HEADER_LEN;
        for _ in 0..count {
            if at + 2 > body.len() {
                return Err(StoreError::Corruption("node entry header out of bounds"));
            }
            let len = u16::from_be_bytes(body[at..at + 2].try_into().unwrap()) as usize;
            let end = at + ENTRY_OVERHEAD + len;
            if end > body.len() {
                return Err(StoreError::Corruption("node entry out of bounds"));
            }
            let key = body[at + 2..at + 2 + len].to_vec();
            let item = DbItemReference::decode(&body[at + 2 + len..end])?;
            entries.push((key, item));
            at = end;
        }
        let first_child = PageId::decode_opt(read_u64(FIRST_CHILD_OFFSET));
        if !is_leaf && first_child.is_none() {
            return Err(StoreError::Corruption("internal node without first child"));
        }
        Ok(Self {
            index,
            is_leaf,
            parent: PageId::decode_opt(read_u64(PARENT_OFFSET)),
            prev: PageId::decode_opt(read_u64(PREV_OFFSET)),
            next: PageId::decode_opt(read_u64(NEXT_OFFSET)),
            first_child,
            entries,
        })
    }
}
