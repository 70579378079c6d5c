#![allow(missing_docs)]

use std::thread;
use std::time::{Duration, Instant};

use pagekv::{types::Result, Storage, StorageConfig, StoreError, VersionedStorage};
use tempfile::tempdir;

const THREADS: u64 = 4;
const PER_THREAD: u64 = 250;

#[test]
fn concurrent_writers_with_background_flush() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("kv");
    let config = StorageConfig::default().with_auto_flush(100, 5);
    let store: Storage<u64, u64> = Storage::create_new(&path, config.clone())?;

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let store = store.clone();
            thread::spawn(move || -> Result<()> {
                for i in 0..PER_THREAD {
                    let key = t * PER_THREAD + i;
                    store.set(&key, &(key * 2))?;
                    if i % 10 == 0 {
                        assert_eq!(store.get(&key)?, Some(key * 2));
                    }
                }
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread panicked")?;
    }

    assert_eq!(store.count()?, THREADS * PER_THREAD);
    let deadline = Instant::now() + Duration::from_secs(5);
    while store.stats()?.writes_since_flush != 0 {
        assert!(Instant::now() < deadline, "background flush never caught up");
        thread::sleep(Duration::from_millis(10));
    }
    store.close()?;
    assert!(matches!(store.count(), Err(StoreError::NotOpen)));

    let reopened: Storage<u64, u64> = Storage::open_existing(&path, config)?;
    let last = THREADS * PER_THREAD - 1;
    assert_eq!(reopened.count()?, last + 1);
    assert_eq!(reopened.get(&last)?, Some(last * 2));
    Ok(())
}

#[test]
fn close_races_with_idle_flush() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("kv");
    for round in 0..20u32 {
        let store: Storage<u32, u32> =
            Storage::open_or_create(&path, StorageConfig::default().with_auto_flush(0, 1))?;
        store.set(&round, &round)?;
        thread::sleep(Duration::from_millis((round % 3) as u64));
        store.close()?;
    }
    let store: Storage<u32, u32> = Storage::open_existing(&path, StorageConfig::default())?;
    assert_eq!(store.count()?, 20);
    Ok(())
}

#[test]
fn versioned_transactions_from_many_threads() -> Result<()> {
    let dir = tempdir()?;
    let store: VersionedStorage<u64, u64> = VersionedStorage::create_new(
        dir.path().join("mvcc"),
        StorageConfig::default().with_auto_flush(0, 5),
    )?;

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let store = store.clone();
            thread::spawn(move || -> Result<()> {
                for i in 0..50 {
                    let txn = store.begin()?;
                    store.set(&txn, &(t * 1_000 + i), &i)?;
                    if i % 5 == 0 {
                        store.rollback(&txn)?;
                    } else {
                        store.commit(&txn)?;
                    }
                }
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("transaction thread panicked")?;
    }

    let reader = store.begin()?;
    assert_eq!(store.count(&reader)?, THREADS * 40);
    assert_eq!(store.get(&reader, &5)?, None);
    assert_eq!(store.get(&reader, &1_006)?, Some(6));
    store.commit(&reader)?;

    let report = store.vacuum()?;
    assert_eq!(report.records_removed, THREADS * 10);
    store.close()?;
    Ok(())
}
