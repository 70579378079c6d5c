#![allow(missing_docs)]

use pagekv::{
    admin::verify, types::Result, StorageConfig, StoreError, TransactionState, VersionedStorage,
};
use tempfile::tempdir;

fn config() -> StorageConfig {
    StorageConfig::default().with_auto_flush(0, 0)
}

#[test]
fn snapshot_ignores_later_commits() -> Result<()> {
    let dir = tempdir()?;
    let store: VersionedStorage<String, u64> =
        VersionedStorage::create_new(dir.path().join("mvcc"), config())?;

    let setup = store.begin()?;
    store.set(&setup, &"balance".to_string(), &100)?;
    store.commit(&setup)?;

    let reader = store.begin()?;
    let writer = store.begin()?;
    store.set(&writer, &"balance".to_string(), &40)?;
    assert_eq!(store.get(&writer, &"balance".to_string())?, Some(40));
    assert_eq!(store.get(&reader, &"balance".to_string())?, Some(100));
    store.commit(&writer)?;

    assert_eq!(store.get(&reader, &"balance".to_string())?, Some(100));
    let late = store.begin()?;
    assert_eq!(store.get(&late, &"balance".to_string())?, Some(40));
    Ok(())
}

#[test]
fn concurrent_writers_conflict() -> Result<()> {
    let dir = tempdir()?;
    let store: VersionedStorage<u32, String> =
        VersionedStorage::create_new(dir.path().join("mvcc"), config())?;

    let first = store.begin()?;
    let second = store.begin()?;
    store.set(&first, &7, &"first".to_string())?;
    assert!(matches!(
        store.set(&second, &7, &"second".to_string()),
        Err(StoreError::WriteConflict)
    ));
    assert!(matches!(
        store.remove(&second, &7),
        Ok(false) | Err(StoreError::WriteConflict)
    ));
    store.commit(&first)?;

    // A transaction that began before the commit still cannot overwrite it.
    assert!(matches!(
        store.set(&second, &7, &"second".to_string()),
        Err(StoreError::WriteConflict)
    ));
    store.rollback(&second)?;
    assert_eq!(store.state(&second)?, TransactionState::RolledBack);

    let after = store.begin()?;
    store.set(&after, &7, &"third".to_string())?;
    store.commit(&after)?;
    let reader = store.begin()?;
    assert_eq!(store.get(&reader, &7)?.as_deref(), Some("third"));
    Ok(())
}

#[test]
fn removal_is_visible_only_after_commit() -> Result<()> {
    let dir = tempdir()?;
    let store: VersionedStorage<u32, u32> =
        VersionedStorage::create_new(dir.path().join("mvcc"), config())?;
    let setup = store.begin()?;
    for key in 0..10 {
        store.set(&setup, &key, &(key * 10))?;
    }
    store.commit(&setup)?;

    let remover = store.begin()?;
    assert!(store.remove(&remover, &3)?);
    assert!(!store.remove(&remover, &3)?);
    assert!(!store.exists(&remover, &3)?);
    assert_eq!(store.count(&remover)?, 9);

    let concurrent = store.begin()?;
    assert!(store.exists(&concurrent, &3)?);
    store.commit(&remover)?;
    assert!(store.exists(&concurrent, &3)?);

    let later = store.begin()?;
    assert!(!store.exists(&later, &3)?);
    assert_eq!(store.next_to(&later, &2)?, Some((4, 40)));
    Ok(())
}

#[test]
fn open_transactions_are_rolled_back_on_reopen() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("mvcc");
    {
        let store: VersionedStorage<u32, String> = VersionedStorage::create_new(&path, config())?;
        let committed = store.begin()?;
        store.set(&committed, &1, &"durable".to_string())?;
        store.commit(&committed)?;

        let abandoned = store.begin()?;
        store.set(&abandoned, &1, &"lost".to_string())?;
        store.set(&abandoned, &2, &"lost".to_string())?;
        store.close()?;
    }

    let store: VersionedStorage<u32, String> = VersionedStorage::open_existing(&path, config())?;
    let reader = store.begin()?;
    assert_eq!(store.get(&reader, &1)?.as_deref(), Some("durable"));
    assert_eq!(store.get(&reader, &2)?, None);
    assert_eq!(store.count(&reader)?, 1);

    let writer = store.begin()?;
    store.set(&writer, &2, &"fresh".to_string())?;
    store.commit(&writer)?;

    let report = store.vacuum()?;
    assert!(report.versions_reclaimed >= 2);
    store.close()?;

    let report = verify(&path)?;
    assert!(report.success, "verify findings: {:?}", report.findings);
    Ok(())
}

#[test]
fn prepared_transactions_survive_as_pending_until_commit() -> Result<()> {
    let dir = tempdir()?;
    let store: VersionedStorage<u32, u32> =
        VersionedStorage::create_new(dir.path().join("mvcc"), config())?;
    let txn = store.begin()?;
    store.set(&txn, &1, &1)?;
    store.prepare(&txn)?;
    assert!(store.prepare(&txn).is_err());

    let reader = store.begin()?;
    assert_eq!(store.get(&reader, &1)?, None);
    store.commit(&txn)?;
    assert_eq!(store.get(&reader, &1)?, None);
    assert_eq!(store.get(&store.begin()?, &1)?, Some(1));
    Ok(())
}

#[test]
fn transaction_ids_are_bounded() -> Result<()> {
    let dir = tempdir()?;
    let store: VersionedStorage<u32, u32> = VersionedStorage::create_new(
        dir.path().join("mvcc"),
        config().with_max_transaction_id(3),
    )?;
    for _ in 0..3 {
        let txn = store.begin()?;
        store.commit(&txn)?;
    }
    assert!(matches!(
        store.begin(),
        Err(StoreError::TransactionIdsExhausted)
    ));
    Ok(())
}
