#![allow(missing_docs)]

use std::fs;

use pagekv::{types::Result, AccessMethod, Storage, StorageConfig, StoreError};
use tempfile::tempdir;

#[test]
fn store_created_from_a_toml_file() -> Result<()> {
    let dir = tempdir()?;
    let config_path = dir.path().join("store.toml");
    fs::write(
        &config_path,
        "page_size = 8192\nmax_key_size = 16\nauto_flush_timeout_ms = 0\n",
    )?;
    let config = StorageConfig::load(&config_path)?;
    assert_eq!(config.page_size, 8192);
    assert_eq!(config.access_method, AccessMethod::BPlusTree);

    let path = dir.path().join("kv");
    let store: Storage<String, String> = Storage::create_new(&path, config.clone())?;
    store.set(&"short".to_string(), &"ok".to_string())?;
    assert!(matches!(
        store.set(&"a key longer than sixteen".to_string(), &"no".to_string()),
        Err(StoreError::KeyTooLarge { max: 16, .. })
    ));
    store.close()?;

    let stats = Storage::<String, String>::open_existing(&path, config.clone())?.stats()?;
    assert_eq!(stats.heading.page_size, 8192);
    assert_eq!(stats.heading.max_key_size, 16);

    let err = Storage::<String, String>::open_existing(&path, config.clone().with_page_size(4096))
        .unwrap_err();
    assert!(matches!(err, StoreError::ConfigMismatch(ref msg) if msg.contains("page size")));

    let err = Storage::<String, String>::open_existing(&path, config.with_max_key_size(32))
        .unwrap_err();
    assert!(matches!(err, StoreError::ConfigMismatch(ref msg) if msg.contains("max key size")));
    Ok(())
}

#[test]
fn malformed_files_are_config_errors() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("bad.toml");

    fs::write(&path, "page_size = 1000\n")?;
    assert!(matches!(StorageConfig::load(&path), Err(StoreError::Config(_))));

    fs::write(&path, "unknown_knob = true\n")?;
    assert!(matches!(StorageConfig::load(&path), Err(StoreError::Config(_))));

    fs::write(&path, "max_cached_pages = 10\nmax_dirty_pages = 11\n")?;
    assert!(matches!(StorageConfig::load(&path), Err(StoreError::Config(_))));

    assert!(matches!(
        StorageConfig::load(dir.path().join("missing.toml")),
        Err(StoreError::Config(_))
    ));
    Ok(())
}

#[test]
fn opening_a_missing_store_fails() -> Result<()> {
    let dir = tempdir()?;
    let result =
        Storage::<u32, u32>::open_existing(dir.path().join("absent"), StorageConfig::default());
    assert!(result.is_err());
    assert!(!dir.path().join("absent").exists());
    Ok(())
}
