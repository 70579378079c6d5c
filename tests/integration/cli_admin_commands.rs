#![allow(missing_docs)]

use std::fs;
use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use pagekv::{Storage, StorageConfig, VersionedStorage};
use serde_json::Value;
use tempfile::TempDir;

fn setup_store(name: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join(name);
    let store: Storage<u32, String> =
        Storage::create_new(&path, StorageConfig::default()).expect("create store");
    for key in 0..200u32 {
        store
            .set(&key, &format!("value {key}").repeat(8))
            .expect("set");
    }
    store.close().expect("close");
    (dir, path)
}

#[test]
fn inspect_json_reports_heading_and_pages() {
    let (_dir, path) = setup_store("inspect");
    let output = cargo_bin_cmd!("pagekv")
        .args(["--format", "json", "inspect"])
        .arg(&path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["heading"]["key_type"], "u32");
    assert_eq!(json["heading"]["access_method"], "bplus_tree");
    assert_eq!(json["kinds"]["heading"], 1);
    assert!(json["pages"]["page_count"].as_u64().unwrap_or(0) > 2);
}

#[test]
fn inspect_text_lists_page_kinds() {
    let (_dir, path) = setup_store("inspect-text");
    let output = cargo_bin_cmd!("pagekv")
        .arg("inspect")
        .arg(&path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    assert!(text.contains("access_method=bplus_tree"));
    assert!(text.contains("btree="));
}

#[test]
fn verify_succeeds_on_a_clean_store() {
    let (_dir, path) = setup_store("verify");
    let output = cargo_bin_cmd!("pagekv")
        .args(["--format", "json", "verify"])
        .arg(&path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert!(json["success"].as_bool().unwrap_or(false));
    assert_eq!(json["keys_checked"], 200);
    assert!(json["index"]["ok"].as_bool().unwrap_or(false));
}

#[test]
fn verify_checks_versioned_stores() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("mvcc");
    let store: VersionedStorage<u32, u32> =
        VersionedStorage::create_new(&path, StorageConfig::default()).expect("create store");
    let txn = store.begin().expect("begin");
    store.set(&txn, &1, &1).expect("set");
    store.commit(&txn).expect("commit");
    store.close().expect("close");

    cargo_bin_cmd!("pagekv")
        .arg("verify")
        .arg(&path)
        .assert()
        .success();
}

#[test]
fn verify_fails_on_a_damaged_page() {
    let (_dir, path) = setup_store("damaged");
    let mut bytes = fs::read(&path).expect("read data file");
    let at = bytes.len() / 2;
    bytes[at] ^= 0xFF;
    fs::write(&path, bytes).expect("write data file");

    cargo_bin_cmd!("pagekv")
        .arg("verify")
        .arg(&path)
        .assert()
        .failure();
}

#[test]
fn config_prints_defaults_as_toml() {
    let output = cargo_bin_cmd!("pagekv")
        .arg("config")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    assert!(text.contains("page_size = 4096"));
    assert!(text.contains("access_method = \"bplus_tree\""));
}

#[test]
fn missing_store_is_an_error() {
    let dir = TempDir::new().expect("tempdir");
    cargo_bin_cmd!("pagekv")
        .arg("inspect")
        .arg(dir.path().join("absent"))
        .assert()
        .failure();
}
