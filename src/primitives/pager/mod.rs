#![forbid(unsafe_code)]

mod cache;
mod manager;
mod page;
mod page_map;

pub use cache::{CacheLimits, CacheStats, CachingPageManager};
pub use manager::{CompactionReport, FilePageManager, PageManager};
pub use page::{Page, PageBacking};
pub use page_map::{map_path, PageMap, PageMapStats, Relocation};
