use std::fmt;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use super::config::StorageConfig;
use super::core::{Identity, StorageStats, VacuumReport};
use super::shared::{OpenMode, Shared};
use super::storage::decode_pair;
use crate::storage::codec::{key_bytes, val_bytes, KeyCodec, ValCodec};
use crate::storage::index::ConsistencyReport;
use crate::storage::mvcc::{Transaction, TransactionState};
use crate::types::Result;

/// Typed key-value store with snapshot isolation.
///
/// Every data call takes the [`Transaction`] it runs in. A transaction sees its own writes
/// and whatever had committed when it began; two transactions writing the same key
/// concurrently make the second fail with [`StoreError::WriteConflict`](crate::StoreError).
///
/// ```no_run
/// use pagekv::{StorageConfig, VersionedStorage};
///
/// let store: VersionedStorage<u32, String> =
///     VersionedStorage::open_or_create("data/mvcc", StorageConfig::default())?;
/// let txn = store.begin()?;
/// store.set(&txn, &1, &"one".to_string())?;
/// store.commit(&txn)?;
/// # Ok::<(), pagekv::StoreError>(())
/// ```
pub struct VersionedStorage<K, V> {
    shared: Arc<Shared>,
    _types: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Clone for VersionedStorage<K, V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            _types: PhantomData,
        }
    }
}

impl<K, V> fmt::Debug for VersionedStorage<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionedStorage")
            .field("path", &self.shared.path())
            .field("open", &self.shared.is_open())
            .finish()
    }
}

impl<K: KeyCodec, V: ValCodec> VersionedStorage<K, V> {
    fn identity() -> Identity {
        Identity {
            versioned: true,
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

    /// Opens a store that must already exist. Transactions left open by the previous
    /// session are rolled back.
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

    /// `false` once [`VersionedStorage::close`] has run.
    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    /// Starts a transaction.
    pub fn begin(&self) -> Result<Transaction> {
        self.shared.write(|core| core.inventory_mut()?.begin())
    }

    /// Current state of `txn`.
    pub fn state(&self, txn: &Transaction) -> Result<TransactionState> {
        self.shared.read(|core| Ok(core.inventory()?.state(txn.id())))
    }

    /// First commit phase: marks `txn` prepared and flushes the store. On failure the
    /// transaction is rolled back and the error returned.
    pub fn prepare(&self, txn: &Transaction) -> Result<()> {
        self.shared.write(|core| core.prepare(txn.id()))
    }

    /// Commits `txn`, preparing it first when still active.
    pub fn commit(&self, txn: &Transaction) -> Result<()> {
        self.shared.mutate(|core| core.commit(txn.id()))
    }

    /// Discards the writes of `txn`.
    pub fn rollback(&self, txn: &Transaction) -> Result<()> {
        self.shared.mutate(|core| core.rollback(txn.id()))
    }

    /// Value of `key` as seen by `txn`.
    pub fn get(&self, txn: &Transaction, key: &K) -> Result<Option<V>> {
        let key = key_bytes(key);
        match self
            .shared
            .read(|core| core.versioned_get(txn.snapshot(), &key))?
        {
            Some(value) => Ok(Some(V::decode_val(&value)?)),
            None => Ok(None),
        }
    }

    /// Writes `value` under `key` in `txn`.
    pub fn set(&self, txn: &Transaction, key: &K, value: &V) -> Result<()> {
        let key = key_bytes(key);
        let value = val_bytes(value);
        self.shared
            .mutate(|core| core.versioned_set(txn.snapshot(), &key, &value))
    }

    /// Removes `key` in `txn`. Returns `false` when `txn` saw no value.
    pub fn remove(&self, txn: &Transaction, key: &K) -> Result<bool> {
        let key = key_bytes(key);
        self.shared
            .mutate(|core| core.versioned_remove(txn.snapshot(), &key))
    }

    /// `true` when `txn` sees a value under `key`.
    pub fn exists(&self, txn: &Transaction, key: &K) -> Result<bool> {
        let key = key_bytes(key);
        self.shared
            .read(|core| core.versioned_exists(txn.snapshot(), &key))
    }

    /// Encoded length of the value `txn` sees under `key`.
    pub fn raw_data_length(&self, txn: &Transaction, key: &K) -> Result<Option<u64>> {
        let key = key_bytes(key);
        self.shared
            .read(|core| core.versioned_length(txn.snapshot(), &key))
    }

    /// Bytes `start..end` of the encoded value `txn` sees under `key`.
    pub fn raw_data_segment(
        &self,
        txn: &Transaction,
        key: &K,
        start: usize,
        end: usize,
    ) -> Result<Option<Vec<u8>>> {
        let key = key_bytes(key);
        self.shared
            .read(|core| core.versioned_segment(txn.snapshot(), &key, start, end))
    }

    /// Smallest key visible to `txn`.
    pub fn min(&self, txn: &Transaction) -> Result<Option<(K, V)>> {
        decode_pair(self.shared.read(|core| core.versioned_min(txn.snapshot()))?)
    }

    /// Largest key visible to `txn`.
    pub fn max(&self, txn: &Transaction) -> Result<Option<(K, V)>> {
        decode_pair(self.shared.read(|core| core.versioned_max(txn.snapshot()))?)
    }

    /// Largest key visible to `txn` strictly below `key`.
    pub fn previous_to(&self, txn: &Transaction, key: &K) -> Result<Option<(K, V)>> {
        let key = key_bytes(key);
        decode_pair(
            self.shared
                .read(|core| core.versioned_previous_to(txn.snapshot(), &key))?,
        )
    }

    /// Smallest key visible to `txn` strictly above `key`.
    pub fn next_to(&self, txn: &Transaction, key: &K) -> Result<Option<(K, V)>> {
        let key = key_bytes(key);
        decode_pair(
            self.shared
                .read(|core| core.versioned_next_to(txn.snapshot(), &key))?,
        )
    }

    /// Keys visible to `txn`.
    pub fn count(&self, txn: &Transaction) -> Result<u64> {
        self.shared.read(|core| core.versioned_count(txn.snapshot()))
    }

    /// `true` when `txn` sees a key extending `key`. Radix stores only.
    pub fn has_sub_keys(&self, txn: &Transaction, key: &K) -> Result<bool> {
        let key = key_bytes(key);
        self.shared
            .read(|core| core.versioned_has_sub_keys(txn.snapshot(), &key))
    }

    /// Structural check of the index.
    pub fn check_consistency(&self) -> Result<ConsistencyReport> {
        self.shared.read(|core| core.check_consistency())
    }

    /// Makes every completed write and transaction outcome durable.
    pub fn flush(&self) -> Result<()> {
        self.shared.flush()
    }

    /// Reclaims versions no transaction can see, then compacts the data file.
    pub fn vacuum(&self) -> Result<VacuumReport> {
        self.shared.write(|core| core.vacuum())
    }

    /// Engine counters.
    pub fn stats(&self) -> Result<StorageStats> {
        self.shared.read(|core| Ok(core.stats()))
    }

    /// Stops the auto-flush thread, flushes and releases the files. Transactions still
    /// open are rolled back when the store is next opened.
    pub fn close(&self) -> Result<()> {
        self.shared.close()
    }
}
