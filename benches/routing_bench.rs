// benches/routing_bench.rs

//! Routing benchmarks.
//!
//! Measures the cost of the two operations on the hot path of every
//! forwarded command: hashing a key to its slot, and looking up (or
//! updating) that slot's owner in the slot table.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use criterion::{Criterion, criterion_group, criterion_main};
use spineldb_proxy::core::backend::Instance;
use spineldb_proxy::core::routing::SlotTable;
use spineldb_proxy::core::routing::slot::{NUM_SLOTS, get_slot};

fn dummy_instance(port: u16) -> Arc<Instance> {
    Arc::new(Instance::new(
        format!("127.0.0.1:{port}").parse().unwrap(),
        1,
        None,
        Duration::from_millis(50),
        Duration::from_millis(50),
    ))
}

/// Benchmark CRC16/XMODEM slot hashing, with and without a hash tag.
pub fn bench_get_slot(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_slot");

    let plain_key = Bytes::from_static(b"user:1000:session");
    group.bench_function("plain_key", |b| {
        b.iter(|| get_slot(&plain_key));
    });

    let tagged_key = Bytes::from_static(b"user:{1000}:session");
    group.bench_function("hash_tagged_key", |b| {
        b.iter(|| get_slot(&tagged_key));
    });

    group.finish();
}

/// Benchmark reads and writes on a fully populated slot table.
pub fn bench_slot_table(c: &mut Criterion) {
    let mut group = c.benchmark_group("slot_table");

    let table = SlotTable::new();
    let instance = dummy_instance(7000);
    for slot in 0..NUM_SLOTS {
        table.set(slot, instance.clone());
    }

    group.bench_function("get_hit", |b| {
        b.iter(|| table.get(8192));
    });

    group.bench_function("set_reassign", |b| {
        b.iter(|| table.set(8192, instance.clone()));
    });

    group.bench_function("replace_all_full_table", |b| {
        let new_owners: Vec<(u16, Arc<Instance>)> =
            (0..NUM_SLOTS).map(|slot| (slot, instance.clone())).collect();
        b.iter(|| table.replace_all(&new_owners));
    });

    group.finish();
}

criterion_group!(benches, bench_get_slot, bench_slot_table);
criterion_main!(benches);
