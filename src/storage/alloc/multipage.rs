//! Blobs too large for any slotted bucket.
//!
//! The first page of a chain stores `[total_len u64][next u64]` before its data; every later
//! page stores `[next u64]`. `next` uses [`PageId::NONE_RAW`] to end the chain.

use std::convert::TryInto;

use crate::primitives::pager::{Page, PageManager};
use crate::types::{page::PageKind, PageId, Result, StoreError};

const FIRST_HDR: usize = 16;
const NEXT_HDR: usize = 8;

fn capacity(page_size: usize, first: bool) -> usize {
    let body = page_size - crate::types::page::PAGE_HDR_LEN;
    body - if first { FIRST_HDR } else { NEXT_HDR }
}

fn next_of(page: &Page, first: bool) -> Option<PageId> {
    let at = if first { 8 } else { 0 };
    PageId::decode_opt(u64::from_be_bytes(
        page.body()[at..at + 8].try_into().unwrap(),
    ))
}

fn fetch_chain_page(pager: &dyn PageManager, id: PageId) -> Result<Page> {
    let page = pager.fetch_page(id)?;
    if page.kind()? != PageKind::MultiPage {
        return Err(StoreError::Corruption("multi-page chain points at a foreign page"));
    }
    Ok(page)
}

/// Page indices of the chain starting at `first`.
pub fn chain(pager: &dyn PageManager, first: PageId) -> Result<Vec<PageId>> {
    let mut pages = vec![first];
    let mut page = fetch_chain_page(pager, first)?;
    let mut next = next_of(&page, true);
    while let Some(id) = next {
        if pages.len() as u64 > pager.stats().page_count {
            return Err(StoreError::Corruption("multi-page chain cycles"));
        }
        pages.push(id);
        page = fetch_chain_page(pager, id)?;
        next = next_of(&page, false);
    }
    Ok(pages)
}

/// Writes `data` across `existing` pages, creating or releasing pages as needed.
/// Returns the first page of the chain.
pub fn write(pager: &dyn PageManager, existing: &[PageId], data: &[u8]) -> Result<PageId> {
    let page_size = pager.page_size();
    let first_cap = capacity(page_size, true);
    let next_cap = capacity(page_size, false);
    let needed = if data.len() <= first_cap {
        1
    } else {
        1 + (data.len() - first_cap).div_ceil(next_cap)
    };
    let mut pages: Vec<PageId> = existing.iter().copied().take(needed).collect();
    for &surplus in existing.iter().skip(needed) {
        pager.remove_page(surplus)?;
    }
    while pages.len() < needed {
        pages.push(pager.create_page()?.index());
    }
    let mut offset = 0usize;
    for (i, &id) in pages.iter().enumerate() {
        let first = i == 0;
        let mut page = Page::new(id, page_size, PageKind::MultiPage)?;
        let next = PageId::encode_opt(pages.get(i + 1).copied());
        let body = page.body_mut();
        let hdr = if first {
            body[0..8].copy_from_slice(&(data.len() as u64).to_be_bytes());
            body[8..16].copy_from_slice(&next.to_be_bytes());
            FIRST_HDR
        } else {
            body[0..8].copy_from_slice(&next.to_be_bytes());
            NEXT_HDR
        };
        let take = (data.len() - offset).min(if first { first_cap } else { next_cap });
        body[hdr..hdr + take].copy_from_slice(&data[offset..offset + take]);
        offset += take;
        pager.update_page(&page)?;
    }
    Ok(pages[0])
}

/// Total blob length recorded on the first page.
pub fn length(pager: &dyn PageManager, first: PageId) -> Result<u64> {
    let page = fetch_chain_page(pager, first)?;
    Ok(u64::from_be_bytes(page.body()[0..8].try_into().unwrap()))
}

/// Bytes `start..end` of the blob, touching only the pages that hold them.
pub fn read_segment(
    pager: &dyn PageManager,
    first: PageId,
    start: usize,
    end: usize,
) -> Result<Vec<u8>> {
    let page_size = pager.page_size();
    let first_cap = capacity(page_size, true);
    let next_cap = capacity(page_size, false);
    let mut page = fetch_chain_page(pager, first)?;
    let total = u64::from_be_bytes(page.body()[0..8].try_into().unwrap()) as usize;
    if start > end || end > total {
        return Err(StoreError::Invalid("segment out of blob bounds"));
    }
    let mut out = Vec::with_capacity(end - start);
    let mut page_start = 0usize;
    let mut is_first = true;
    loop {
        let (hdr, cap) = if is_first {
            (FIRST_HDR, first_cap)
        } else {
            (NEXT_HDR, next_cap)
        };
        let page_end = (page_start + cap).min(total);
        if page_end > start && page_start < end {
            let from = start.max(page_start) - page_start;
            let to = end.min(page_end) - page_start;
            out.extend_from_slice(&page.body()[hdr + from..hdr + to]);
        }
        if page_end >= end {
            break;
        }
        let Some(next) = next_of(&page, is_first) else {
            return Err(StoreError::Corruption("multi-page chain shorter than its length"));
        };
        page = fetch_chain_page(pager, next)?;
        page_start = page_end;
        is_first = false;
    }
    Ok(out)
}

/// Releases every page of the chain.
pub fn free(pager: &dyn PageManager, first: PageId) -> Result<()> {
    for id in chain(pager, first)? {
        pager.remove_page(id)?;
    }
    Ok(())
}
