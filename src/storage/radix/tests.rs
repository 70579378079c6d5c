use super::RadixTree;
use crate::primitives::pager::{FilePageManager, PageManager};
use crate::storage::alloc::{Allocator, DbItemReference};
use crate::storage::index::IndexEngine;
use crate::types::PageId;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

fn allocator() -> (TempDir, Allocator) {
    let dir = tempdir().unwrap();
    let pager: Arc<dyn PageManager> =
        Arc::new(FilePageManager::create(dir.path().join("db"), 4096, false).unwrap());
    pager.create_page().unwrap();
    pager.create_page().unwrap();
    Allocator::format(pager.as_ref()).unwrap();
    (dir, Allocator::new(pager))
}

fn value(n: u64) -> DbItemReference {
    DbItemReference::new(PageId(10_000 + n), 0)
}

#[test]
fn shared_prefixes_split_and_merge() {
    let (_dir, mut alloc) = allocator();
    let mut tree = RadixTree::create(&mut alloc).unwrap();
    for (i, key) in ["romane", "romanus", "romulus", "rubens", "ruber", "rubicon"]
        .iter()
        .enumerate()
    {
        assert_eq!(tree.set(&mut alloc, key.as_bytes(), value(i as u64)).unwrap(), None);
    }
    assert_eq!(tree.count(&alloc).unwrap(), 6);
    assert_eq!(tree.get(&alloc, b"romulus").unwrap(), Some(value(2)));
    assert_eq!(tree.get(&alloc, b"rom").unwrap(), None);
    assert!(tree.has_sub_keys(&alloc, b"rom").unwrap());
    assert!(tree.has_sub_keys(&alloc, b"rube").unwrap());
    assert!(!tree.has_sub_keys(&alloc, b"rubicon").unwrap());
    assert!(!tree.has_sub_keys(&alloc, b"rx").unwrap());
    let report = tree.check_consistency(&alloc).unwrap();
    assert!(report.ok, "{}", report.message);

    assert_eq!(tree.remove(&mut alloc, b"romanus").unwrap(), Some(value(1)));
    assert_eq!(tree.remove(&mut alloc, b"romanus").unwrap(), None);
    assert_eq!(tree.remove(&mut alloc, b"roman").unwrap(), None);
    let report = tree.check_consistency(&alloc).unwrap();
    assert!(report.ok, "{}", report.message);
    assert_eq!(tree.get(&alloc, b"romane").unwrap(), Some(value(0)));
}

#[test]
fn empty_key_and_prefix_keys_coexist() {
    let (_dir, mut alloc) = allocator();
    let mut tree = RadixTree::create(&mut alloc).unwrap();
    tree.set(&mut alloc, b"", value(0)).unwrap();
    tree.set(&mut alloc, b"a", value(1)).unwrap();
    tree.set(&mut alloc, b"ab", value(2)).unwrap();
    tree.set(&mut alloc, b"abc", value(3)).unwrap();
    assert_eq!(tree.min(&alloc).unwrap(), Some((b"".to_vec(), value(0))));
    assert_eq!(tree.max(&alloc).unwrap(), Some((b"abc".to_vec(), value(3))));
    assert_eq!(tree.next_to(&alloc, b"a").unwrap().unwrap().0, b"ab");
    assert_eq!(tree.previous_to(&alloc, b"ab").unwrap().unwrap().0, b"a");
    assert_eq!(tree.previous_to(&alloc, b"a").unwrap().unwrap().0, b"");
    assert_eq!(tree.remove(&mut alloc, b"ab").unwrap(), Some(value(2)));
    let report = tree.check_consistency(&alloc).unwrap();
    assert!(report.ok, "{}", report.message);
    assert_eq!(tree.get(&alloc, b"abc").unwrap(), Some(value(3)));
}

#[test]
fn long_keys_have_no_size_limit() {
    let (_dir, mut alloc) = allocator();
    let mut tree = RadixTree::create(&mut alloc).unwrap();
    let long = vec![b'k'; 20_000];
    tree.set(&mut alloc, &long, value(1)).unwrap();
    let mut sibling = long.clone();
    sibling[19_999] = b'z';
    tree.set(&mut alloc, &sibling, value(2)).unwrap();
    assert_eq!(tree.get(&alloc, &long).unwrap(), Some(value(1)));
    assert_eq!(tree.next_to(&alloc, &long).unwrap().unwrap().0, sibling);
    assert!(tree.check_consistency(&alloc).unwrap().ok);
}

#[test]
fn reopened_tree_keeps_root() {
    let (_dir, mut alloc) = allocator();
    let mut tree = RadixTree::create(&mut alloc).unwrap();
    for n in 0..300u32 {
        tree.set(&mut alloc, format!("key-{n}").as_bytes(), value(n as u64))
            .unwrap();
    }
    let root = tree.root().unwrap();
    let reopened = RadixTree::open(&alloc, root).unwrap();
    assert_eq!(reopened.count(&alloc).unwrap(), 300);
    assert_eq!(reopened.get(&alloc, b"key-77").unwrap(), Some(value(77)));
}

#[derive(Clone, Debug)]
enum Op {
    Set(Vec<u8>, u64),
    Remove(Vec<u8>),
}

fn small_key() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(prop_oneof![Just(b'a'), Just(b'b'), Just(b'c')], 0..6)
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (small_key(), 0u64..1000).prop_map(|(k, v)| Op::Set(k, v)),
        1 => small_key().prop_map(Op::Remove),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn radix_matches_btreemap(ops in proptest::collection::vec(op(), 1..150), probes in proptest::collection::vec(small_key(), 1..20)) {
        let (_dir, mut alloc) = allocator();
        let mut tree = RadixTree::create(&mut alloc).unwrap();
        let mut reference: BTreeMap<Vec<u8>, DbItemReference> = BTreeMap::new();
        for op in ops {
            match op {
                Op::Set(k, v) => {
                    prop_assert_eq!(tree.set(&mut alloc, &k, value(v)).unwrap(), reference.insert(k, value(v)));
                }
                Op::Remove(k) => {
                    prop_assert_eq!(tree.remove(&mut alloc, &k).unwrap(), reference.remove(&k));
                }
            }
        }
        let report = tree.check_consistency(&alloc).unwrap();
        prop_assert!(report.ok, "{}", report.message);
        prop_assert_eq!(tree.count(&alloc).unwrap(), reference.len() as u64);
        prop_assert_eq!(tree.min(&alloc).unwrap(), reference.iter().next().map(|(k, v)| (k.clone(), *v)));
        prop_assert_eq!(tree.max(&alloc).unwrap(), reference.iter().next_back().map(|(k, v)| (k.clone(), *v)));
        for probe in probes {
            prop_assert_eq!(tree.get(&alloc, &probe).unwrap(), reference.get(&probe).copied());
            let next = reference
                .range((Bound::Excluded(probe.clone()), Bound::Unbounded))
                .next()
                .map(|(k, v)| (k.clone(), *v));
            prop_assert_eq!(tree.next_to(&alloc, &probe).unwrap(), next);
            let prev = reference.range(..probe.clone()).next_back().map(|(k, v)| (k.clone(), *v));
            prop_assert_eq!(tree.previous_to(&alloc, &probe).unwrap(), prev);
            let sub = reference
                .keys()
                .any(|k| k.len() > probe.len() && k.starts_with(&probe));
            prop_assert_eq!(tree.has_sub_keys(&alloc, &probe).unwrap(), sub);
        }
    }
}
