use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::primitives::pager::CacheLimits;
use crate::storage::index::AccessMethod;
use crate::storage::HeadingSettings;
use crate::types::{page, Result, StoreError};

/// Options used when creating or opening a store.
///
/// Every field has a default, so a TOML file only needs the keys it changes:
///
/// ```toml
/// access_method = "radix"
/// page_size = 8192
/// auto_flush_timeout_ms = 250
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Index implementation for new stores.
    pub access_method: AccessMethod,
    /// Page size for new stores. One of 4096, 8192, 16384, 32768 or 65536.
    pub page_size: u32,
    /// Pages kept resident by the cache.
    pub max_cached_pages: usize,
    /// Dirty pages tolerated before every dirty page is written back.
    pub max_dirty_pages: usize,
    /// Sync the data file after every page write.
    pub forced_writes: bool,
    /// Longest encoded key accepted by the B+ tree.
    pub max_key_size: u32,
    /// Reclaimable pages tolerated before a vacuum runs.
    pub max_empty_pages: u32,
    /// Writes between automatic flushes. 0 disables the count trigger.
    pub auto_flush_interval: u64,
    /// Idle milliseconds after the last write before an automatic flush. 0 disables the timer.
    pub auto_flush_timeout_ms: u64,
    /// Highest transaction id a versioned store may issue. TOML integers are signed, so files
    /// can raise it at most to `i64::MAX`.
    pub max_transaction_id: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            access_method: AccessMethod::BPlusTree,
            page_size: 4096,
            max_cached_pages: 1000,
            max_dirty_pages: 1000,
            forced_writes: false,
            max_key_size: 64,
            max_empty_pages: 100,
            auto_flush_interval: 10_000,
            auto_flush_timeout_ms: 1_000,
            max_transaction_id: i64::MAX as u64,
        }
    }
}

impl StorageConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(src: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(src).map_err(|err| StoreError::Config(err.message().to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|err| {
            StoreError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Renders the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|err| StoreError::Config(err.to_string()))
    }

    /// Rejects combinations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !page::is_supported_page_size(self.page_size) {
            return Err(StoreError::Config(format!(
                "unsupported page size {}",
                self.page_size
            )));
        }
        if self.max_cached_pages == 0 {
            return Err(StoreError::Config("max_cached_pages must be positive".into()));
        }
        if self.max_dirty_pages == 0 || self.max_dirty_pages > self.max_cached_pages {
            return Err(StoreError::Config(format!(
                "max_dirty_pages must be between 1 and max_cached_pages ({})",
                self.max_cached_pages
            )));
        }
        if self.access_method == AccessMethod::BPlusTree && self.max_key_size == 0 {
            return Err(StoreError::Config("max_key_size must be positive".into()));
        }
        if self.max_transaction_id == 0 || self.max_transaction_id == u64::MAX {
            return Err(StoreError::Config(
                "max_transaction_id must be between 1 and u64::MAX - 1".into(),
            ));
        }
        Ok(())
    }

    /// Sets [`StorageConfig::access_method`].
    pub fn with_access_method(mut self, access_method: AccessMethod) -> Self {
        self.access_method = access_method;
        self
    }

    /// Sets [`StorageConfig::page_size`].
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Sets both cache limits.
    pub fn with_cache_limits(mut self, max_cached_pages: usize, max_dirty_pages: usize) -> Self {
        self.max_cached_pages = max_cached_pages;
        self.max_dirty_pages = max_dirty_pages;
        self
    }

    /// Sets [`StorageConfig::forced_writes`].
    pub fn with_forced_writes(mut self, forced_writes: bool) -> Self {
        self.forced_writes = forced_writes;
        self
    }

    /// Sets [`StorageConfig::max_key_size`].
    pub fn with_max_key_size(mut self, max_key_size: u32) -> Self {
        self.max_key_size = max_key_size;
        self
    }

    /// Sets [`StorageConfig::max_empty_pages`].
    pub fn with_max_empty_pages(mut self, max_empty_pages: u32) -> Self {
        self.max_empty_pages = max_empty_pages;
        self
    }

    /// Sets both auto-flush triggers.
    pub fn with_auto_flush(mut self, interval: u64, timeout_ms: u64) -> Self {
        self.auto_flush_interval = interval;
        self.auto_flush_timeout_ms = timeout_ms;
        self
    }

    /// Sets [`StorageConfig::max_transaction_id`].
    pub fn with_max_transaction_id(mut self, max_transaction_id: u64) -> Self {
        self.max_transaction_id = max_transaction_id;
        self
    }

    pub(crate) fn cache_limits(&self) -> CacheLimits {
        CacheLimits {
            max_cached_pages: self.max_cached_pages,
            max_dirty_pages: self.max_dirty_pages,
        }
    }

    /// Key size recorded in the heading. The radix tree has no limit.
    pub(crate) fn effective_max_key_size(&self) -> u32 {
        match self.access_method {
            AccessMethod::BPlusTree => self.max_key_size,
            AccessMethod::Radix => 0,
        }
    }

    pub(crate) fn heading_settings(&self) -> HeadingSettings {
        HeadingSettings {
            max_empty_pages: self.max_empty_pages,
            auto_flush_interval: self.auto_flush_interval,
            auto_flush_timeout_ms: self.auto_flush_timeout_ms,
        }
    }
}
