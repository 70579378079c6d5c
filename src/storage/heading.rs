//! Heading page stored at page index 0.

use std::convert::TryInto;
use std::ops::Range;

use crate::primitives::pager::{Page, PageManager};
use crate::storage::alloc::DbItemReference;
use crate::storage::index::AccessMethod;
use crate::types::{page::PageKind, PageId, Result, StoreError};

/// Page index of the heading page.
pub const HEADING_PAGE: PageId = PageId(0);

/// Longest type tag the heading can record.
pub const MAX_TYPE_TAG_LEN: usize = 32;

const HEADING_MAGIC: [u8; 8] = *b"PKVHEAD1";

// Offsets relative to the page body.
const MAGIC: Range<usize> = 0..8;
const ACCESS_METHOD: usize = 8;
const VERSIONED: usize = 9;
const RESERVED: Range<usize> = 10..12;
const PAGE_SIZE: Range<usize> = 12..16;
const MAX_KEY_SIZE: Range<usize> = 16..20;
const MAX_EMPTY_PAGES: Range<usize> = 20..24;
const ROOT: Range<usize> = 24..34;
const INVENTORY: Range<usize> = 34..44;
const AUTO_FLUSH_INTERVAL: Range<usize> = 44..52;
const AUTO_FLUSH_TIMEOUT_MS: Range<usize> = 52..60;
const KEY_TAG_LEN: usize = 60;
const KEY_TAG: Range<usize> = 61..93;
const VALUE_TAG_LEN: usize = 93;
const VALUE_TAG: Range<usize> = 94..126;
const FLUSH_COUNT: Range<usize> = 126..134;

/// Settings captured when the store was created or last flushed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Serialize)]
pub struct HeadingSettings {
    /// Released pages tolerated before vacuum.
    pub max_empty_pages: u32,
    /// Writes between automatic flushes, 0 when disabled.
    pub auto_flush_interval: u64,
    /// Idle time before an automatic flush, 0 when disabled.
    pub auto_flush_timeout_ms: u64,
}

/// Decoded heading page.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
pub struct Heading {
    /// Index implementation used by the store.
    pub access_method: AccessMethod,
    /// Whether values are MVCC version chains.
    pub versioned: bool,
    /// Page size fixed at creation.
    pub page_size: u32,
    /// Longest encoded key accepted, 0 for unlimited.
    pub max_key_size: u32,
    /// Key codec identity.
    pub key_type: String,
    /// Value codec identity.
    pub value_type: String,
    /// Root of the index: a node page (slot 0) or a radix root blob.
    pub root: Option<DbItemReference>,
    /// Persisted transaction inventory blob.
    pub inventory: Option<DbItemReference>,
    /// Settings snapshot.
    pub settings: HeadingSettings,
    /// Completed flushes over the life of the store.
    pub flush_count: u64,
}

fn put_tag(body: &mut [u8], len_at: usize, range: Range<usize>, tag: &str) -> Result<()> {
    let bytes = tag.as_bytes();
    if bytes.len() > MAX_TYPE_TAG_LEN {
        return Err(StoreError::Invalid("type tag longer than 32 bytes"));
    }
    body[len_at] = bytes.len() as u8;
    body[range.clone()].fill(0);
    body[range.start..range.start + bytes.len()].copy_from_slice(bytes);
    Ok(())
}

fn get_tag(body: &[u8], len_at: usize, range: Range<usize>) -> Result<String> {
    let len = body[len_at] as usize;
    if len > MAX_TYPE_TAG_LEN {
        return Err(StoreError::Corruption("heading type tag length out of range"));
    }
    String::from_utf8(body[range.start..range.start + len].to_vec())
        .map_err(|_| StoreError::Corruption("heading type tag is not utf-8"))
}

impl Heading {
    /// Writes the heading into `page`.
    pub fn encode(&self, page: &mut Page) -> Result<()> {
        page.set_kind(PageKind::Heading);
        let body = page.body_mut();
        body.fill(0);
        body[MAGIC].copy_from_slice(&HEADING_MAGIC);
        body[ACCESS_METHOD] = self.access_method.as_u8();
        body[VERSIONED] = self.versioned as u8;
        body[RESERVED].fill(0);
        body[PAGE_SIZE].copy_from_slice(&self.page_size.to_be_bytes());
        body[MAX_KEY_SIZE].copy_from_slice(&self.max_key_size.to_be_bytes());
        body[MAX_EMPTY_PAGES].copy_from_slice(&self.settings.max_empty_pages.to_be_bytes());
        body[ROOT].copy_from_slice(&DbItemReference::encode_opt(self.root));
        body[INVENTORY].copy_from_slice(&DbItemReference::encode_opt(self.inventory));
        body[AUTO_FLUSH_INTERVAL]
            .copy_from_slice(&self.settings.auto_flush_interval.to_be_bytes());
        body[AUTO_FLUSH_TIMEOUT_MS]
            .copy_from_slice(&self.settings.auto_flush_timeout_ms.to_be_bytes());
        put_tag(body, KEY_TAG_LEN, KEY_TAG, &self.key_type)?;
        put_tag(body, VALUE_TAG_LEN, VALUE_TAG, &self.value_type)?;
        body[FLUSH_COUNT].copy_from_slice(&self.flush_count.to_be_bytes());
        Ok(())
    }

    /// Reads the heading from `page`.
    pub fn decode(page: &Page) -> Result<Self> {
        if page.kind()? != PageKind::Heading {
            return Err(StoreError::Corruption("page 0 is not a heading page"));
        }
        let body = page.body();
        if body[MAGIC] != HEADING_MAGIC {
            return Err(StoreError::Corruption("invalid heading magic"));
        }
        let versioned = match body[VERSIONED] {
            0 => false,
            1 => true,
            _ => return Err(StoreError::Corruption("heading versioning flag out of range")),
        };
        Ok(Self {
            access_method: AccessMethod::try_from(body[ACCESS_METHOD])?,
            versioned,
            page_size: u32::from_be_bytes(body[PAGE_SIZE].try_into().unwrap()),
            max_key_size: u32::from_be_bytes(body[MAX_KEY_SIZE].try_into().unwrap()),
            key_type: get_tag(body, KEY_TAG_LEN, KEY_TAG)?,
            value_type: get_tag(body, VALUE_TAG_LEN, VALUE_TAG)?,
            root: DbItemReference::decode_opt(&body[ROOT])?,
            inventory: DbItemReference::decode_opt(&body[INVENTORY])?,
            settings: HeadingSettings {
                max_empty_pages: u32::from_be_bytes(body[MAX_EMPTY_PAGES].try_into().unwrap()),
                auto_flush_interval: u64::from_be_bytes(
                    body[AUTO_FLUSH_INTERVAL].try_into().unwrap(),
                ),
                auto_flush_timeout_ms: u64::from_be_bytes(
                    body[AUTO_FLUSH_TIMEOUT_MS].try_into().unwrap(),
                ),
            },
            flush_count: u64::from_be_bytes(body[FLUSH_COUNT].try_into().unwrap()),
        })
    }

    /// Loads the heading through a page manager.
    pub fn load(pager: &dyn PageManager) -> Result<Self> {
        Self::decode(&pager.fetch_page(HEADING_PAGE)?)
    }

    /// Persists the heading through a page manager.
    pub fn store(&self, pager: &dyn PageManager) -> Result<()> {
        let mut page = Page::new(HEADING_PAGE, pager.page_size(), PageKind::Heading)?;
        self.encode(&mut page)?;
        pager.update_page(&page)
    }

    /// Compares the stored identity with the one a caller expects.
    pub fn validate(&self, expected: &Heading) -> Result<()> {
        let mut mismatches = Vec::new();
        if self.access_method != expected.access_method {
            mismatches.push(format!(
                "access method {} (requested {})",
                self.access_method, expected.access_method
            ));
        }
        if self.versioned != expected.versioned {
            mismatches.push(format!(
                "versioned {} (requested {})",
                self.versioned, expected.versioned
            ));
        }
        if self.key_type != expected.key_type {
            mismatches.push(format!(
                "key type {} (requested {})",
                self.key_type, expected.key_type
            ));
        }
        if self.value_type != expected.value_type {
            mismatches.push(format!(
                "value type {} (requested {})",
                self.value_type, expected.value_type
            ));
        }
        if self.max_key_size != expected.max_key_size {
            mismatches.push(format!(
                "max key size {} (requested {})",
                self.max_key_size, expected.max_key_size
            ));
        }
        if self.page_size != expected.page_size {
            mismatches.push(format!(
                "page size {} (requested {})",
                self.page_size, expected.page_size
            ));
        }
        if mismatches.is_empty() {
            Ok(())
        } else {
            Err(StoreError::ConfigMismatch(mismatches.join(", ")))
        }
    }
}
