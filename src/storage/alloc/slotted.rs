//! Slotted page layout.
//!
//! Body header (big-endian):
//! `[bucket u8][reserved u8][capacity u16][used u16][first_free u16]`, followed by `capacity`
//! slots of `[len u16][data; slot_size]`. A free slot stores `FREE_LEN` as its length and the
//! index of the next free slot in its first two data bytes.

use std::convert::TryInto;
use std::ops::Range;

use super::size_range::{slot_size, slots_per_page};
use crate::primitives::pager::Page;
use crate::types::{page::PageKind, Result, StoreError};

pub(crate) const SLOTTED_HDR_LEN: usize = 8;
pub(crate) const SLOT_LEN_BYTES: usize = 2;

const BUCKET: usize = 0;
const CAPACITY: Range<usize> = 2..4;
const USED: Range<usize> = 4..6;
const FIRST_FREE: Range<usize> = 6..8;

const FREE_LEN: u16 = u16::MAX;
const NO_SLOT: u16 = u16::MAX;

/// Decoded slotted page header.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SlottedHeader {
    /// Size bucket shared by every slot on the page.
    pub bucket: u8,
    /// Total slots on the page.
    pub capacity: u16,
    /// Occupied slots.
    pub used: u16,
    first_free: u16,
}

impl SlottedHeader {
    /// `true` when no slot is available.
    pub fn is_full(&self) -> bool {
        self.used == self.capacity
    }

    fn read(body: &[u8]) -> Result<Self> {
        let hdr = Self {
            bucket: body[BUCKET],
            capacity: u16::from_be_bytes(body[CAPACITY].try_into().unwrap()),
            used: u16::from_be_bytes(body[USED].try_into().unwrap()),
            first_free: u16::from_be_bytes(body[FIRST_FREE].try_into().unwrap()),
        };
        if hdr.used > hdr.capacity {
            return Err(StoreError::Corruption("slotted page used count exceeds capacity"));
        }
        Ok(hdr)
    }

    fn write(&self, body: &mut [u8]) {
        body[BUCKET] = self.bucket;
        body[1] = 0;
        body[CAPACITY].copy_from_slice(&self.capacity.to_be_bytes());
        body[USED].copy_from_slice(&self.used.to_be_bytes());
        body[FIRST_FREE].copy_from_slice(&self.first_free.to_be_bytes());
    }
}

fn slot_range(bucket: u8, slot: u16) -> Range<usize> {
    let start = SLOTTED_HDR_LEN + slot as usize * (SLOT_LEN_BYTES + slot_size(bucket));
    start..start + SLOT_LEN_BYTES + slot_size(bucket)
}

/// Formats `page` as an empty slotted page for `bucket`.
pub fn format(page: &mut Page, bucket: u8) {
    let capacity = slots_per_page(bucket, page.len()) as u16;
    page.set_kind(PageKind::Slotted);
    let body = page.body_mut();
    body.fill(0);
    SlottedHeader {
        bucket,
        capacity,
        used: 0,
        first_free: if capacity == 0 { NO_SLOT } else { 0 },
    }
    .write(body);
    for slot in 0..capacity {
        let range = slot_range(bucket, slot);
        let next = if slot + 1 < capacity { slot + 1 } else { NO_SLOT };
        body[range.start..range.start + 2].copy_from_slice(&FREE_LEN.to_be_bytes());
        body[range.start + 2..range.start + 4].copy_from_slice(&next.to_be_bytes());
    }
}

/// Reads the header of a slotted page.
pub fn header(page: &Page) -> Result<SlottedHeader> {
    if page.kind()? != PageKind::Slotted {
        return Err(StoreError::Invalid("page is not a slotted page"));
    }
    SlottedHeader::read(page.body())
}

fn occupied(body: &[u8], hdr: &SlottedHeader, slot: u16) -> Result<Range<usize>> {
    if slot >= hdr.capacity {
        return Err(StoreError::Invalid("slot index out of range"));
    }
    let range = slot_range(hdr.bucket, slot);
    let len = u16::from_be_bytes(body[range.start..range.start + 2].try_into().unwrap());
    if len == FREE_LEN {
        return Err(StoreError::Invalid("slot is not allocated"));
    }
    if len as usize > slot_size(hdr.bucket) {
        return Err(StoreError::Corruption("slot length exceeds slot size"));
    }
    let data = range.start + SLOT_LEN_BYTES;
    Ok(data..data + len as usize)
}

/// Stores `data` in the first free slot. Returns `None` when the page is full.
pub fn insert(page: &mut Page, data: &[u8]) -> Result<Option<u16>> {
    let mut hdr = header(page)?;
    if hdr.is_full() || hdr.first_free == NO_SLOT {
        return Ok(None);
    }
    if data.len() > slot_size(hdr.bucket) {
        return Err(StoreError::Invalid("blob does not fit the page size range"));
    }
    let slot = hdr.first_free;
    if slot >= hdr.capacity {
        return Err(StoreError::Corruption("free slot index out of range"));
    }
    let body = page.body_mut();
    let range = slot_range(hdr.bucket, slot);
    let next = u16::from_be_bytes(body[range.start + 2..range.start + 4].try_into().unwrap());
    body[range.start..range.start + 2].copy_from_slice(&(data.len() as u16).to_be_bytes());
    let start = range.start + SLOT_LEN_BYTES;
    body[start..start + data.len()].copy_from_slice(data);
    hdr.first_free = next;
    hdr.used += 1;
    hdr.write(body);
    Ok(Some(slot))
}

/// Bytes stored in `slot`.
pub fn read(page: &Page, slot: u16) -> Result<&[u8]> {
    let hdr = header(page)?;
    let body = page.body();
    let range = occupied(body, &hdr, slot)?;
    Ok(&body[range])
}

/// Replaces the content of an occupied slot. `data` must fit the page's bucket.
pub fn overwrite(page: &mut Page, slot: u16, data: &[u8]) -> Result<()> {
    let hdr = header(page)?;
    if data.len() > slot_size(hdr.bucket) {
        return Err(StoreError::Invalid("blob does not fit the page size range"));
    }
    occupied(page.body(), &hdr, slot)?;
    let range = slot_range(hdr.bucket, slot);
    let body = page.body_mut();
    body[range.start..range.start + 2].copy_from_slice(&(data.len() as u16).to_be_bytes());
    let start = range.start + SLOT_LEN_BYTES;
    body[start..start + data.len()].copy_from_slice(data);
    Ok(())
}

/// Frees `slot` and returns the updated header.
pub fn remove(page: &mut Page, slot: u16) -> Result<SlottedHeader> {
    let mut hdr = header(page)?;
    occupied(page.body(), &hdr, slot)?;
    let range = slot_range(hdr.bucket, slot);
    let body = page.body_mut();
    body[range.start..range.start + 2].copy_from_slice(&FREE_LEN.to_be_bytes());
    body[range.start + 2..range.start + 4].copy_from_slice(&hdr.first_free.to_be_bytes());
    hdr.first_free = slot;
    hdr.used -= 1;
    hdr.write(body);
    Ok(hdr)
}
