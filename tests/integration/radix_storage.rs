#![allow(missing_docs)]

use pagekv::{
    admin::{inspect, verify},
    types::Result,
    AccessMethod, Storage, StorageConfig, StoreError, VersionedStorage,
};
use tempfile::tempdir;

fn config() -> StorageConfig {
    StorageConfig::default()
        .with_access_method(AccessMethod::Radix)
        .with_auto_flush(0, 0)
}

const WORDS: &[&str] = &[
    "a", "an", "and", "ant", "anteater", "antelope", "any", "b", "band", "bandana", "banner",
    "bar", "", "zebra",
];

#[test]
fn radix_keys_iterate_in_byte_order() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("radix");
    {
        let store: Storage<String, u32> = Storage::create_new(&path, config())?;
        for (i, word) in WORDS.iter().enumerate() {
            store.set(&word.to_string(), &(i as u32))?;
        }
    }

    let store: Storage<String, u32> = Storage::open_existing(&path, config())?;
    let mut sorted: Vec<&str> = WORDS.to_vec();
    sorted.sort();
    let mut walked = Vec::new();
    let mut cursor = store.min()?;
    while let Some((key, _)) = cursor {
        cursor = store.next_to(&key)?;
        walked.push(key);
    }
    assert_eq!(walked, sorted);
    assert_eq!(store.count()?, WORDS.len() as u64);
    assert_eq!(store.max()?.map(|(k, _)| k).as_deref(), Some("zebra"));
    assert_eq!(
        store.previous_to(&"antelope".to_string())?.map(|(k, _)| k).as_deref(),
        Some("anteater")
    );
    assert_eq!(
        store.next_to(&"ante".to_string())?.map(|(k, _)| k).as_deref(),
        Some("anteater")
    );
    assert_eq!(store.get(&String::new())?, Some(12));
    assert!(store.check_consistency()?.ok);
    store.close()?;

    let report = inspect(&path)?;
    assert_eq!(report.heading.access_method, AccessMethod::Radix);
    assert_eq!(report.heading.max_key_size, 0);
    assert!(verify(&path)?.success);
    Ok(())
}

#[test]
fn sub_keys_follow_removals() -> Result<()> {
    let dir = tempdir()?;
    let store: Storage<String, u32> = Storage::create_new(dir.path().join("radix"), config())?;
    for (i, word) in WORDS.iter().enumerate() {
        store.set(&word.to_string(), &(i as u32))?;
    }

    assert!(store.has_sub_keys(&"ant".to_string())?);
    assert!(store.has_sub_keys(&"ban".to_string())?);
    assert!(!store.has_sub_keys(&"zebra".to_string())?);
    assert!(!store.has_sub_keys(&"q".to_string())?);

    for word in ["anteater", "antelope"] {
        assert!(store.remove(&word.to_string())?);
    }
    assert!(!store.has_sub_keys(&"ant".to_string())?);
    assert!(store.exists(&"ant".to_string())?);
    assert!(!store.remove(&"antelope".to_string())?);
    assert!(store.check_consistency()?.ok);
    Ok(())
}

#[test]
fn long_keys_are_accepted() -> Result<()> {
    let dir = tempdir()?;
    let store: Storage<Vec<u8>, Vec<u8>> =
        Storage::create_new(dir.path().join("radix"), config())?;
    let long_key: Vec<u8> = (0..5_000u32).map(|i| (i % 200) as u8).collect();
    store.set(&long_key, &b"long".to_vec())?;
    let mut prefix = long_key[..2_500].to_vec();
    store.set(&prefix, &b"half".to_vec())?;
    assert_eq!(store.get(&long_key)?, Some(b"long".to_vec()));
    assert!(store.has_sub_keys(&prefix)?);
    prefix.push(0xFF);
    assert!(!store.has_sub_keys(&prefix)?);
    Ok(())
}

#[test]
fn bplus_tree_stores_reject_sub_key_queries() -> Result<()> {
    let dir = tempdir()?;
    let store: Storage<String, u32> = Storage::create_new(
        dir.path().join("btree"),
        StorageConfig::default().with_auto_flush(0, 0),
    )?;
    store.set(&"key".to_string(), &1)?;
    assert!(matches!(
        store.has_sub_keys(&"k".to_string()),
        Err(StoreError::Invalid(_))
    ));
    Ok(())
}

#[test]
fn versioned_radix_hides_uncommitted_sub_keys() -> Result<()> {
    let dir = tempdir()?;
    let store: VersionedStorage<String, u32> =
        VersionedStorage::create_new(dir.path().join("radix"), config())?;
    let setup = store.begin()?;
    store.set(&setup, &"user".to_string(), &0)?;
    store.commit(&setup)?;

    let reader = store.begin()?;
    let writer = store.begin()?;
    store.set(&writer, &"user/1".to_string(), &1)?;
    assert!(store.has_sub_keys(&writer, &"user".to_string())?);
    assert!(!store.has_sub_keys(&reader, &"user".to_string())?);
    Ok(())
}
