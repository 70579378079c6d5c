#![forbid(unsafe_code)]

//! Identifiers, the crate-wide error type, and the shared page header layout.

use std::fmt;

/// Page checksum helpers.
pub mod checksum;

pub use checksum::page_crc32;

/// Logical index of a page inside a store.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, serde::Serialize)]
pub struct PageId(pub u64);

impl PageId {
    /// Sentinel stored on disk for "no page".
    pub const NONE_RAW: u64 = u64::MAX;

    /// Encodes an optional page id using [`PageId::NONE_RAW`] for `None`.
    pub fn encode_opt(page: Option<PageId>) -> u64 {
        page.map(|p| p.0).unwrap_or(Self::NONE_RAW)
    }

    /// Decodes a value written by [`PageId::encode_opt`].
    pub fn decode_opt(raw: u64) -> Option<PageId> {
        if raw == Self::NONE_RAW {
            None
        } else {
            Some(PageId(raw))
        }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors surfaced by every layer of the engine.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Underlying file operation failed.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// On-disk bytes failed validation.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// Caller supplied an argument the engine cannot honour.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Stored type identity or constraints differ from the requested ones.
    #[error("configuration mismatch: {0}")]
    ConfigMismatch(String),
    /// Configuration could not be parsed or failed validation.
    #[error("configuration: {0}")]
    Config(String),
    /// No version of the record is writable by the acting transaction.
    #[error("write conflict")]
    WriteConflict,
    /// Serialized key is longer than the configured maximum.
    #[error("key of {len} bytes exceeds the maximum key size of {max} bytes")]
    KeyTooLarge {
        /// Encoded key length.
        len: usize,
        /// Configured limit.
        max: usize,
    },
    /// Storage was closed or never opened.
    #[error("storage is not open")]
    NotOpen,
    /// The transaction id counter reached its bound.
    #[error("transaction ids exhausted")]
    TransactionIdsExhausted,
    /// Operation does not fit the transaction's current state.
    #[error("transaction state: {0}")]
    TransactionState(&'static str),
    /// A value codec rejected its input.
    #[error("codec: {0}")]
    Codec(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

pub mod page {
    //! Shared on-disk page header.

    use core::convert::{TryFrom, TryInto};

    use super::{PageId, Result, StoreError};

    pub const PAGE_MAGIC: [u8; 4] = *b"PGKV";
    pub const PAGE_FORMAT_VERSION: u16 = 1;
    pub const DEFAULT_PAGE_SIZE: u32 = 8192;
    pub const PAGE_HDR_LEN: usize = 24;

    /// Page sizes a store may be created with.
    pub const SUPPORTED_PAGE_SIZES: [u32; 5] = [4096, 8192, 16384, 32768, 65536];

    pub mod header {
        //! Byte offsets for fixed header fields.
        use core::ops::Range;

        pub const MAGIC: Range<usize> = 0..4;
        pub const FORMAT_VERSION: Range<usize> = 4..6;
        pub const PAGE_KIND: usize = 6;
        pub const RESERVED: usize = 7;
        pub const PAGE_NO: Range<usize> = 8..16;
        pub const CRC32: Range<usize> = 16..20;
        pub const RESERVED_2: Range<usize> = 20..24;
    }

    /// Type tag stored in every page header. Drives how a fetched page is decoded.
    #[repr(u8)]
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
    pub enum PageKind {
        Unformatted = 0,
        Heading = 1,
        FreeSpaceMap = 2,
        BPlusTreeNode = 3,
        Slotted = 4,
        MultiPage = 5,
    }

    impl PageKind {
        pub const fn as_u8(self) -> u8 {
            self as u8
        }
    }

    impl TryFrom<u8> for PageKind {
        type Error = StoreError;

        fn try_from(value: u8) -> Result<Self> {
            match value {
                0 => Ok(PageKind::Unformatted),
                1 => Ok(PageKind::Heading),
                2 => Ok(PageKind::FreeSpaceMap),
                3 => Ok(PageKind::BPlusTreeNode),
                4 => Ok(PageKind::Slotted),
                5 => Ok(PageKind::MultiPage),
                _ => Err(StoreError::Corruption("unknown page kind")),
            }
        }
    }

    #[derive(Clone, Debug, Eq, PartialEq)]
    pub struct PageHeader {
        pub format_version: u16,
        pub kind: PageKind,
        pub page_no: PageId,
        pub crc32: u32,
    }

    impl PageHeader {
        pub fn new(page_no: PageId, kind: PageKind) -> Self {
            Self {
                format_version: PAGE_FORMAT_VERSION,
                kind,
                page_no,
                crc32: 0,
            }
        }

        pub fn with_crc32(mut self, crc32: u32) -> Self {
            self.crc32 = crc32;
            self
        }

        pub fn encode(&self, dst: &mut [u8]) -> Result<()> {
            if dst.len() < PAGE_HDR_LEN {
                return Err(StoreError::Invalid("page header buffer too small"));
            }
            let hdr = &mut dst[..PAGE_HDR_LEN];
            hdr[header::MAGIC].copy_from_slice(&PAGE_MAGIC);
            hdr[header::FORMAT_VERSION].copy_from_slice(&self.format_version.to_be_bytes());
            hdr[header::PAGE_KIND] = self.kind.as_u8();
            hdr[header::RESERVED] = 0;
            hdr[header::PAGE_NO].copy_from_slice(&self.page_no.0.to_be_bytes());
            hdr[header::CRC32].copy_from_slice(&self.crc32.to_be_bytes());
            hdr[header::RESERVED_2].fill(0);
            Ok(())
        }

        pub fn decode(src: &[u8]) -> Result<Self> {
            if src.len() < PAGE_HDR_LEN {
                return Err(StoreError::Corruption("page header truncated"));
            }
            let hdr = &src[..PAGE_HDR_LEN];
            let magic: [u8; 4] = hdr[header::MAGIC].try_into().unwrap();
            if magic != PAGE_MAGIC {
                return Err(StoreError::Corruption("invalid page magic"));
            }
            let format_version =
                u16::from_be_bytes(hdr[header::FORMAT_VERSION].try_into().unwrap());
            if format_version != PAGE_FORMAT_VERSION {
                return Err(StoreError::Corruption("unsupported page format version"));
            }
            if hdr[header::RESERVED] != 0 {
                return Err(StoreError::Corruption("page header reserved byte not zero"));
            }
            let kind = PageKind::try_from(hdr[header::PAGE_KIND])?;
            let page_no = PageId(u64::from_be_bytes(hdr[header::PAGE_NO].try_into().unwrap()));
            let crc32 = u32::from_be_bytes(hdr[header::CRC32].try_into().unwrap());
            Ok(Self {
                format_version,
                kind,
                page_no,
                crc32,
            })
        }
    }

    pub fn clear_crc32(buf: &mut [u8]) -> Result<()> {
        if buf.len() < header::CRC32.end {
            return Err(StoreError::Invalid("page header buffer too small"));
        }
        buf[header::CRC32].fill(0);
        Ok(())
    }

    /// Returns `true` for one of [`SUPPORTED_PAGE_SIZES`].
    pub fn is_supported_page_size(size: u32) -> bool {
        SUPPORTED_PAGE_SIZES.contains(&size)
    }
}
