use std::fmt;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use super::config::StorageConfig;
use super::core::{Identity, StorageStats, VacuumReport};
use super::shared::{OpenMode, Shared};
use crate::storage::codec::{key_bytes, val_bytes, KeyCodec, ValCodec};
use crate::storage::index::ConsistencyReport;
use crate::types::Result;

/// Decodes a raw `(key, value)` pair.
pub(crate) fn decode_pair<K: KeyCodec, V: ValCodec>(
    pair: Option<(Vec<u8>, Vec<u8>)>,
) -> Result<Option<(K, V)>> {
    match pair {
        Some((key, value)) => Ok(Some((K::decode_key(&key)?, V::decode_val(&value)?))),
        None => Ok(None),
    }
}

/// Typed key-value store without versioning.
///
/// Handles are cheap to clone and may be shared across threads. Reads take a shared lock and
/// writes an exclusive one for the duration of the call.
///
/// ```no_run
/// use pagekv::{Storage, StorageConfig};
///
/// let store: Storage<u64, String> =
///     Storage::open_or_create("data/kv", StorageConfig::default())?;
/// store.set(&7, &"seven".to_string())?;
/// assert_eq!(store.get(&7)?.as_deref(), Some("seven"));
/// store.close()?;
/// # Ok::<(), pagekv::StoreError>(())
/// ```
pub struct Storage<K, V> {
    shared: Arc<Shared>,
    _types: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Clone for Storage<K, V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            _types: PhantomData,
        }
    }
}

impl<K, V> fmt::Debug for Storage<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.shared.path())
            .field("open", &self.shared.is_open())
            .finish()
    }
}

impl<K: KeyCodec, V: ValCodec> Storage<K, V> {
    fn identity() -> Identity {
        Identity {
            versioned: false,
            key_type: K::TYPE_TAG,
            value_type: V::TYPE_TAG,
        }
    }

    fn open_with(path: &Path, config: StorageConfig, mode: OpenMode) -> Result<Self> {
        Ok(Self {
            shared: Shared::open(path, config, Self::identity(), mode)?,
            _types: PhantomData,
        })
    }

    /// Opens a store that must already exist.
    pub fn open_existing(path: impl AsRef<Path>, config: StorageConfig) -> Result<Self> {
        Self::open_with(path.as_ref(), config, OpenMode::Existing)
    }

    /// Creates a store that must not exist yet.
    pub fn create_new(path: impl AsRef<Path>, config: StorageConfig) -> Result<Self> {
        Self::open_with(path.as_ref(), config, OpenMode::New)
    }

    /// Opens the store at `path`, creating it when missing.
    pub fn open_or_create(path: impl AsRef<Path>, config: StorageConfig) -> Result<Self> {
        Self::open_with(path.as_ref(), config, OpenMode::OpenOrCreate)
    }

    /// Path of the content file.
    pub fn path(&self) -> &Path {
        self.shared.path()
    }

    /// `false` once [`Storage::close`] has run.
    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    /// Value stored under `key`.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let key = key_bytes(key);
        match self.shared.read(|core| core.get(&key))? {
            Some(value) => Ok(Some(V::decode_val(&value)?)),
            None => Ok(None),
        }
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set(&self, key: &K, value: &V) -> Result<()> {
        let key = key_bytes(key);
        let value = val_bytes(value);
        self.shared.mutate(|core| core.set(&key, &value))
    }

    /// Removes `key`. Returns `false` when it was absent.
    pub fn remove(&self, key: &K) -> Result<bool> {
        let key = key_bytes(key);
        self.shared.mutate(|core| core.remove(&key))
    }

    /// `true` when `key` is present.
    pub fn exists(&self, key: &K) -> Result<bool> {
        let key = key_bytes(key);
        self.shared.read(|core| core.exists(&key))
    }

    /// Encoded length of the value under `key`.
    pub fn raw_data_length(&self, key: &K) -> Result<Option<u64>> {
        let key = key_bytes(key);
        self.shared.read(|core| core.raw_data_length(&key))
    }

    /// Bytes `start..end` of the encoded value under `key`, read without loading the rest.
    pub fn raw_data_segment(&self, key: &K, start: usize, end: usize) -> Result<Option<Vec<u8>>> {
        let key = key_bytes(key);
        self.shared
            .read(|core| core.raw_data_segment(&key, start, end))
    }

    /// Smallest key and its value.
    pub fn min(&self) -> Result<Option<(K, V)>> {
        decode_pair(self.shared.read(|core| core.min())?)
    }

    /// Largest key and its value.
    pub fn max(&self) -> Result<Option<(K, V)>> {
        decode_pair(self.shared.read(|core| core.max())?)
    }

    /// Largest key strictly below `key`.
    pub fn previous_to(&self, key: &K) -> Result<Option<(K, V)>> {
        let key = key_bytes(key);
        decode_pair(self.shared.read(|core| core.previous_to(&key))?)
    }

    /// Smallest key strictly above `key`.
    pub fn next_to(&self, key: &K) -> Result<Option<(K, V)>> {
        let key = key_bytes(key);
        decode_pair(self.shared.read(|core| core.next_to(&key))?)
    }

    /// Number of keys. Walks the whole index.
    pub fn count(&self) -> Result<u64> {
        self.shared.read(|core| core.count())
    }

    /// Structural check of the index.
    pub fn check_consistency(&self) -> Result<ConsistencyReport> {
        self.shared.read(|core| core.check_consistency())
    }

    /// `true` when a stored key extends the encoding of `key`. Radix stores only.
    pub fn has_sub_keys(&self, key: &K) -> Result<bool> {
        let key = key_bytes(key);
        self.shared.read(|core| core.has_sub_keys(&key))
    }

    /// Makes every completed write durable.
    pub fn flush(&self) -> Result<()> {
        self.shared.flush()
    }

    /// Flushes and compacts the data file.
    pub fn vacuum(&self) -> Result<VacuumReport> {
        self.shared.write(|core| core.vacuum())
    }

    /// Engine counters.
    pub fn stats(&self) -> Result<StorageStats> {
        self.shared.read(|core| Ok(core.stats()))
    }

    /// Stops the auto-flush thread, flushes and releases the files. Later calls fail with
    /// [`StoreError::NotOpen`](crate::StoreError::NotOpen).
    pub fn close(&self) -> Result<()> {
        self.shared.close()
    }
}
