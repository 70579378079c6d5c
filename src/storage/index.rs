//! Access-method seam shared by the B+ tree and the radix tree.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::primitives::pager::PageManager;
use crate::storage::alloc::{Allocator, DbItemReference};
use crate::storage::btree::BPlusTree;
use crate::storage::heading::Heading;
use crate::storage::radix::RadixTree;
use crate::types::{Result, StoreError};

/// Index implementation a store is created with.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMethod {
    /// Ordered B+ tree with a bounded key size.
    #[default]
    BPlusTree,
    /// Prefix-compressed radix tree.
    Radix,
}

impl AccessMethod {
    /// Tag stored in the heading page.
    pub const fn as_u8(self) -> u8 {
        match self {
            AccessMethod::BPlusTree => 0,
            AccessMethod::Radix => 1,
        }
    }
}

impl TryFrom<u8> for AccessMethod {
    type Error = StoreError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(AccessMethod::BPlusTree),
            1 => Ok(AccessMethod::Radix),
            _ => Err(StoreError::Corruption("unknown access method")),
        }
    }
}

impl fmt::Display for AccessMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMethod::BPlusTree => f.write_str("bplus_tree"),
            AccessMethod::Radix => f.write_str("radix"),
        }
    }
}

/// Outcome of a structural check. Problems are reported, never repaired.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ConsistencyReport {
    /// `true` when no problem was found.
    pub ok: bool,
    /// First problem found, or a summary when the structure is sound.
    pub message: String,
    /// Nodes visited.
    pub nodes: u64,
    /// Keys visited.
    pub keys: u64,
}

impl ConsistencyReport {
    pub(crate) fn sound(nodes: u64, keys: u64) -> Self {
        Self {
            ok: true,
            message: format!("{nodes} nodes and {keys} keys checked"),
            nodes,
            keys,
        }
    }

    pub(crate) fn broken(message: impl Into<String>, nodes: u64, keys: u64) -> Self {
        Self {
            ok: false,
            message: message.into(),
            nodes,
            keys,
        }
    }
}

/// Key/entry pair returned by ordered lookups.
pub type Entry = (Vec<u8>, DbItemReference);

/// Ordered map from encoded keys to blob references.
///
/// Engines keep their nodes through the allocator's page manager; the caller owns the value
/// blobs the references point at.
pub trait IndexEngine: Send + Sync {
    /// Which access method this is.
    fn access_method(&self) -> AccessMethod;
    /// Root pointer to record in the heading page.
    fn root(&self) -> Option<DbItemReference>;
    /// Reference stored under `key`.
    fn get(&self, alloc: &Allocator, key: &[u8]) -> Result<Option<DbItemReference>>;
    /// Stores `value` under `key`, returning the reference it replaced.
    fn set(
        &mut self,
        alloc: &mut Allocator,
        key: &[u8],
        value: DbItemReference,
    ) -> Result<Option<DbItemReference>>;
    /// Removes `key`, returning its reference.
    fn remove(&mut self, alloc: &mut Allocator, key: &[u8]) -> Result<Option<DbItemReference>>;
    /// `true` when `key` is present.
    fn exists(&self, alloc: &Allocator, key: &[u8]) -> Result<bool> {
        Ok(self.get(alloc, key)?.is_some())
    }
    /// Smallest entry.
    fn min(&self, alloc: &Allocator) -> Result<Option<Entry>>;
    /// Largest entry.
    fn max(&self, alloc: &Allocator) -> Result<Option<Entry>>;
    /// Largest entry strictly below `key`.
    fn previous_to(&self, alloc: &Allocator, key: &[u8]) -> Result<Option<Entry>>;
    /// Smallest entry strictly above `key`.
    fn next_to(&self, alloc: &Allocator, key: &[u8]) -> Result<Option<Entry>>;
    /// Number of entries.
    fn count(&self, alloc: &Allocator) -> Result<u64>;
    /// Validates the structure.
    fn check_consistency(&self, alloc: &Allocator) -> Result<ConsistencyReport>;
    /// `true` when some stored key is strictly longer than `key` and starts with it.
    fn has_sub_keys(&self, _alloc: &Allocator, _key: &[u8]) -> Result<bool> {
        Err(StoreError::Invalid("has_sub_keys requires the radix access method"))
    }
}

/// Opens the index a heading page points at.
pub fn open_index(
    heading: &Heading,
    pager: Arc<dyn PageManager>,
    alloc: &Allocator,
) -> Result<Box<dyn IndexEngine>> {
    let root = heading
        .root
        .ok_or(StoreError::Corruption("heading page has no index root"))?;
    Ok(match heading.access_method {
        AccessMethod::BPlusTree => Box::new(BPlusTree::open(
            pager,
            heading.max_key_size as usize,
            root.page,
        )?),
        AccessMethod::Radix => Box::new(RadixTree::open(alloc, root)?),
    })
}
