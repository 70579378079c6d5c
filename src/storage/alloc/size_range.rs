use crate::types::page::PAGE_HDR_LEN;

use super::slotted::{SLOTTED_HDR_LEN, SLOT_LEN_BYTES};

/// Smallest slot size in bytes; bucket `n` holds slots of `MIN_SLOT << n` bytes.
pub const MIN_SLOT: usize = 32;

/// Storage class of a blob.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SizeRange {
    /// Stored in a slot of `32 << bucket` bytes on a slotted page.
    Bucket(u8),
    /// Stored across a dedicated chain of pages.
    MultiPage,
}

impl SizeRange {
    /// Classifies a blob of `len` bytes for pages of `page_size` bytes.
    pub fn for_len(len: usize, page_size: usize) -> Self {
        let max = max_bucket(page_size);
        let mut bucket = 0u8;
        while bucket <= max {
            if len <= slot_size(bucket) {
                return SizeRange::Bucket(bucket);
            }
            bucket += 1;
        }
        SizeRange::MultiPage
    }
}

/// Slot payload size for `bucket`.
pub const fn slot_size(bucket: u8) -> usize {
    MIN_SLOT << bucket
}

/// Number of slots of `bucket` that fit on one page.
pub fn slots_per_page(bucket: u8, page_size: usize) -> usize {
    let body = page_size - PAGE_HDR_LEN - SLOTTED_HDR_LEN;
    body / (SLOT_LEN_BYTES + slot_size(bucket))
}

/// Largest bucket whose slots still fit two to a page.
pub fn max_bucket(page_size: usize) -> u8 {
    let mut bucket = 0u8;
    while slots_per_page(bucket + 1, page_size) >= 2 {
        bucket += 1;
    }
    bucket
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_double() {
        assert_eq!(SizeRange::for_len(0, 4096), SizeRange::Bucket(0));
        assert_eq!(SizeRange::for_len(32, 4096), SizeRange::Bucket(0));
        assert_eq!(SizeRange::for_len(33, 4096), SizeRange::Bucket(1));
        assert_eq!(SizeRange::for_len(1000, 4096), SizeRange::Bucket(5));
    }

    #[test]
    fn largest_bucket_holds_two_slots() {
        for page_size in [4096usize, 8192, 16384, 32768, 65536] {
            let max = max_bucket(page_size);
            assert!(slots_per_page(max, page_size) >= 2);
            assert!(slots_per_page(max + 1, page_size) < 2);
            assert_eq!(
                SizeRange::for_len(slot_size(max) + 1, page_size),
                SizeRange::MultiPage
            );
        }
    }
}
