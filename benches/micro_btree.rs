//! Micro benchmarks for the two access methods behind `Storage`.
#![forbid(unsafe_code)]
#![allow(missing_docs)]

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use pagekv::{AccessMethod, Storage, StorageConfig};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::TempDir;

const INSERT_COUNT: u64 = 8_192;
const LOOKUP_SAMPLES: usize = 2_048;
const RANGE_WIDTH: u64 = 256;

fn micro_index(c: &mut Criterion) {
    for method in [AccessMethod::BPlusTree, AccessMethod::Radix] {
        let mut group = c.benchmark_group(format!("micro/{method}"));
        group.sample_size(20);

        group.throughput(Throughput::Elements(INSERT_COUNT));
        group.bench_function("sequential_insert", |b| {
            b.iter_batched(
                || FreshStore::new(method),
                |store| {
                    store.insert_sequence(0, INSERT_COUNT);
                    black_box(store);
                },
                BatchSize::LargeInput,
            );
        });

        let mut random_keys: Vec<u64> = (0..INSERT_COUNT).collect();
        random_keys.shuffle(&mut ChaCha8Rng::seed_from_u64(0xBEEF_F00D));
        group.throughput(Throughput::Elements(INSERT_COUNT));
        group.bench_function("random_insert", |b| {
            b.iter_batched(
                || FreshStore::new(method),
                |store| {
                    store.insert_keys(&random_keys);
                    black_box(store);
                },
                BatchSize::LargeInput,
            );
        });

        group.throughput(Throughput::Elements(INSERT_COUNT));
        group.bench_function("delete_random", |b| {
            b.iter_batched(
                || {
                    let store = FreshStore::new(method);
                    store.insert_sequence(0, INSERT_COUNT);
                    store
                },
                |store| {
                    store.delete_keys(&random_keys);
                    black_box(store);
                },
                BatchSize::LargeInput,
            );
        });

        let mut loaded = LoadedStore::new(method, INSERT_COUNT);
        group.throughput(Throughput::Elements(LOOKUP_SAMPLES as u64));
        group.bench_function(BenchmarkId::new("point_lookup", LOOKUP_SAMPLES), |b| {
            b.iter(|| loaded.point_lookup(LOOKUP_SAMPLES));
        });

        group.throughput(Throughput::Elements(RANGE_WIDTH));
        group.bench_function(BenchmarkId::new("next_to_scan", RANGE_WIDTH), |b| {
            b.iter(|| loaded.scan(RANGE_WIDTH));
        });

        group.finish();
    }
}

struct FreshStore {
    _tmpdir: TempDir,
    store: Storage<u64, u64>,
}

impl FreshStore {
    fn new(access_method: AccessMethod) -> Self {
        let tmpdir = tempfile::tempdir().expect("tmpdir");
        let config = StorageConfig::default()
            .with_access_method(access_method)
            .with_auto_flush(0, 0);
        let store = Storage::create_new(tmpdir.path().join("bench"), config).expect("store");
        Self {
            _tmpdir: tmpdir,
            store,
        }
    }

    fn insert_sequence(&self, start: u64, count: u64) {
        for key in start..(start + count) {
            self.store.set(&key, &key).expect("insert");
        }
    }

    fn insert_keys(&self, keys: &[u64]) {
        for key in keys {
            self.store.set(key, key).expect("insert");
        }
    }

    fn delete_keys(&self, keys: &[u64]) {
        for key in keys {
            self.store.remove(key).expect("delete");
        }
    }
}

struct LoadedStore {
    fresh: FreshStore,
    max_key: u64,
    rng: ChaCha8Rng,
}

impl LoadedStore {
    fn new(access_method: AccessMethod, count: u64) -> Self {
        let fresh = FreshStore::new(access_method);
        fresh.insert_sequence(0, count);
        fresh.store.flush().expect("flush");
        Self {
            fresh,
            max_key: count,
            rng: ChaCha8Rng::seed_from_u64(0xFEED_FACE),
        }
    }

    fn point_lookup(&mut self, samples: usize) {
        for _ in 0..samples {
            let key = self.rng.gen_range(0..self.max_key);
            black_box(self.fresh.store.get(&key).expect("get"));
        }
    }

    fn scan(&mut self, width: u64) {
        for _ in 0..16 {
            let mut key = self.rng.gen_range(0..(self.max_key - width));
            for _ in 0..width {
                match self.fresh.store.next_to(&key).expect("next_to") {
                    Some((next, value)) => {
                        black_box(value);
                        key = next;
                    }
                    None => break,
                }
            }
        }
    }
}

criterion_group!(benches, micro_index);
criterion_main!(benches);
