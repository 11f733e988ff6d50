//! Append throughput benchmark, mirroring the shape of the teacher's
//! `forgeerp-infra/benches/event_sourcing_benchmarks.rs`.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use dcb_core::{AppendCriteria, EphemeralEvent, EventStreamId, TagSet};
use dcb_store::Storage;
use dcb_store_memory::InMemoryStorage;

fn append_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("append_throughput");
    for batch_size in [1usize, 10, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(batch_size), &batch_size, |b, &batch_size| {
            let storage = InMemoryStorage::new();
            let stream = EventStreamId::concrete("bench", "domain");
            b.iter(|| {
                let events = (0..batch_size)
                    .map(|_| EphemeralEvent::new("Benchmarked", serde_json::json!({}), TagSet::new()))
                    .collect();
                storage.append(&AppendCriteria::unconditional(), &stream, events).unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, append_throughput);
criterion_main!(benches);
