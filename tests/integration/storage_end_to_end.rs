#![allow(missing_docs)]

use pagekv::{
    admin::{inspect, verify},
    types::Result,
    Storage, StorageConfig,
};
use tempfile::tempdir;

const KEYS: u32 = 1_000;

fn value_for(key: u32) -> String {
    format!("value-{key:05}-{}", "x".repeat((key % 97) as usize))
}

fn config() -> StorageConfig {
    StorageConfig::default()
        .with_cache_limits(32, 16)
        .with_auto_flush(0, 0)
}

#[test]
fn integer_keys_with_string_values_round_trip() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("kv");
    {
        let store: Storage<i32, String> = Storage::create_new(&path, config())?;
        for i in 0..1_000 {
            store.set(&i, &format!("v{i}"))?;
        }
        store.close()?;
    }
    let store: Storage<i32, String> = Storage::open_existing(&path, config())?;
    for i in 0..1_000 {
        assert_eq!(store.get(&i)?, Some(format!("v{i}")));
    }
    assert_eq!(store.count()?, 1_000);
    Ok(())
}

#[test]
fn thousand_keys_survive_reopen_in_order() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("kv");

    {
        let store: Storage<u32, String> = Storage::create_new(&path, config())?;
        // Odd keys first so both halves of the tree see out-of-order inserts.
        for key in (1..KEYS).step_by(2).chain((0..KEYS).step_by(2)) {
            store.set(&key, &value_for(key))?;
        }
        store.close()?;
    }

    let store: Storage<u32, String> = Storage::open_existing(&path, config())?;
    assert_eq!(store.count()?, KEYS as u64);
    assert_eq!(store.min()?, Some((0, value_for(0))));
    assert_eq!(store.max()?, Some((KEYS - 1, value_for(KEYS - 1))));

    let mut walked = 0u32;
    let mut cursor = store.min()?;
    while let Some((key, value)) = cursor {
        assert_eq!(key, walked);
        assert_eq!(value, value_for(key));
        walked += 1;
        cursor = store.next_to(&key)?;
    }
    assert_eq!(walked, KEYS);

    assert_eq!(store.previous_to(&500)?.map(|(k, _)| k), Some(499));
    assert_eq!(store.previous_to(&0)?, None);
    assert_eq!(store.next_to(&(KEYS - 1))?, None);
    assert!(store.check_consistency()?.ok);
    store.close()?;

    let report = verify(&path)?;
    assert!(report.success, "verify findings: {:?}", report.findings);
    assert_eq!(report.keys_checked, KEYS as u64);
    Ok(())
}

#[test]
fn overwrite_and_remove_keep_the_index_consistent() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("kv");
    let store: Storage<u32, String> = Storage::create_new(&path, config())?;

    for key in 0..KEYS {
        store.set(&key, &value_for(key))?;
    }
    for key in (0..KEYS).filter(|k| k % 3 == 0) {
        assert!(store.remove(&key)?);
    }
    for key in (0..KEYS).filter(|k| k % 3 == 1) {
        store.set(&key, &format!("updated-{key}"))?;
    }
    assert!(!store.remove(&0)?);

    let expected = (0..KEYS).filter(|k| k % 3 != 0).count() as u64;
    assert_eq!(store.count()?, expected);
    assert!(!store.exists(&3)?);
    assert_eq!(store.get(&4)?.as_deref(), Some("updated-4"));
    assert_eq!(store.get(&5)?, Some(value_for(5)));
    assert_eq!(store.next_to(&2)?.map(|(k, _)| k), Some(4));
    assert!(store.check_consistency()?.ok);
    store.close()?;

    let report = inspect(&path)?;
    assert_eq!(report.heading.key_type, "u32");
    assert_eq!(report.heading.value_type, "string");
    assert!(!report.heading.versioned);
    assert!(report.kinds.bplus_tree_nodes > 1);
    Ok(())
}

#[test]
fn store_reopens_with_differently_tuned_cache() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("kv");
    {
        let store: Storage<u64, Vec<u8>> = Storage::create_new(&path, config())?;
        for key in 0..64u64 {
            store.set(&key, &vec![key as u8; 3_000])?;
        }
    }
    let tuned = config().with_cache_limits(4, 2).with_forced_writes(true);
    let store: Storage<u64, Vec<u8>> = Storage::open_or_create(&path, tuned)?;
    for key in 0..64u64 {
        assert_eq!(store.get(&key)?, Some(vec![key as u8; 3_000]));
    }
    let stats = store.stats()?;
    assert!(stats.cache.misses > 0);
    Ok(())
}
