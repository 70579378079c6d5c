use std::convert::TryFrom;
use std::fmt;
use std::sync::Arc;

use crate::storage::btree::BPlusTreeNode;
use crate::types::{
    page::{header, PageHeader, PageKind, PAGE_HDR_LEN},
    PageId, Result,
};

/// Decoded form of a page cached next to its bytes.
///
/// The variant always mirrors the page header kind it was decoded from; it is dropped
/// the moment the page bytes are modified.
#[derive(Clone, Debug)]
pub enum PageBacking {
    /// A B+ tree node decoded from a [`PageKind::BPlusTreeNode`] page.
    BPlusTreeNode(Arc<BPlusTreeNode>),
}

impl PageBacking {
    /// Page kind the backing was decoded from.
    pub fn kind(&self) -> PageKind {
        match self {
            PageBacking::BPlusTreeNode(_) => PageKind::BPlusTreeNode,
        }
    }
}

/// Fixed-size page image plus an optional decoded backing.
#[derive(Clone)]
pub struct Page {
    index: PageId,
    data: Arc<Vec<u8>>,
    backing: Option<PageBacking>,
}

impl Page {
    /// Builds a zeroed page whose header carries `kind`.
    ///
    /// Fails when `page_size` cannot hold the page header.
    pub fn new(index: PageId, page_size: usize, kind: PageKind) -> Result<Self> {
        let mut data = vec![0u8; page_size];
        PageHeader::new(index, kind).encode(&mut data)?;
        Ok(Self {
            index,
            data: Arc::new(data),
            backing: None,
        })
    }

    /// Wraps bytes read from disk.
    pub fn from_bytes(index: PageId, data: Vec<u8>) -> Self {
        Self {
            index,
            data: Arc::new(data),
            backing: None,
        }
    }

    /// Logical index of the page.
    pub fn index(&self) -> PageId {
        self.index
    }

    /// Size of the page image in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Pages are never empty; provided for clippy symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Kind recorded in the page header.
    pub fn kind(&self) -> Result<PageKind> {
        PageKind::try_from(self.data[header::PAGE_KIND])
    }

    /// Rewrites the header kind, dropping any backing.
    pub fn set_kind(&mut self, kind: PageKind) {
        self.data_mut()[header::PAGE_KIND] = kind.as_u8();
    }

    /// Whole page image including the header.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable page image. Invalidates the backing.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.backing = None;
        Arc::make_mut(&mut self.data).as_mut_slice()
    }

    /// Page bytes following the header.
    pub fn body(&self) -> &[u8] {
        &self.data[PAGE_HDR_LEN..]
    }

    /// Mutable page bytes following the header. Invalidates the backing.
    pub fn body_mut(&mut self) -> &mut [u8] {
        &mut self.data_mut()[PAGE_HDR_LEN..]
    }

    /// Cached decoded representation, if any.
    pub fn backing(&self) -> Option<&PageBacking> {
        self.backing.as_ref()
    }

    /// Attaches a decoded representation matching the current bytes.
    pub fn set_backing(&mut self, backing: PageBacking) {
        self.backing = Some(backing);
    }

    pub(crate) fn shares_bytes_with(&self, other: &Page) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("index", &self.index)
            .field("kind", &self.kind().ok())
            .field("len", &self.data.len())
            .field("backing", &self.backing.as_ref().map(PageBacking::kind))
            .finish()
    }
}
