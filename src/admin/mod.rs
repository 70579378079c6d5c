#![forbid(unsafe_code)]

//! Offline inspection and verification of a store.
//!
//! Both entry points open the files directly through the page manager, without the typed
//! wrappers, so they work on any store regardless of its key and value codecs.

mod inspect;
mod verify;

/// Heading and page-map summary.
pub use inspect::{inspect, InspectReport, PageKindCounts};

/// Structural verification of pages, index and value blobs.
pub use verify::{verify, VerifyFinding, VerifyReport, VerifySeverity};
