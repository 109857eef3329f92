//! Benchmarks for the page cache
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use pennsieve::cache::segment::{decode, encode};
use pennsieve::cache::{CacheSettings, PageCache, PageStore, Segment};
use tempfile::tempdir;

fn create_segment(count: usize) -> Segment {
    Segment::from_pairs(
        (0..count)
            .map(|i| (i as i64 * 4_000, (i as f64 * 0.01).sin()))
            .collect(),
    )
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    for size in [100, 3600, 36000] {
        let segment = create_segment(size);

        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("encode_{}", size), |b| {
            b.iter(|| encode(black_box("N:channel:bench"), black_box(&segment)).unwrap())
        });

        let bytes = encode("N:channel:bench", &segment).unwrap();

        group.bench_function(format!("decode_{}", size), |b| {
            b.iter(|| decode(black_box("N:channel:bench"), black_box(&bytes)).unwrap())
        });
    }

    group.finish();
}

fn bench_page_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("page_store");

    let dir = tempdir().unwrap();
    let store = PageStore::open(dir.path()).unwrap();
    let bytes = encode("N:channel:bench", &create_segment(3600)).unwrap();

    group.throughput(Throughput::Bytes(bytes.len() as u64));

    group.bench_function("write_page", |b| {
        let mut page = 0;
        b.iter(|| {
            store.write("N:channel:bench", page % 64, black_box(&bytes)).unwrap();
            page += 1;
        })
    });

    group.bench_function("read_page", |b| {
        b.iter(|| store.read("N:channel:bench", black_box(0)).unwrap())
    });

    group.finish();
}

fn bench_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache");

    let dir = tempdir().unwrap();
    let cache = PageCache::open(CacheSettings {
        background_compaction: false,
        ..CacheSettings::new(dir.path())
    })
    .unwrap();
    let segment = create_segment(3600);
    cache.set_page_data("N:channel:bench", 0, Some(&segment), false);

    group.bench_function("get_page_hit", |b| {
        b.iter(|| cache.get_page_data("N:channel:bench", black_box(0)).unwrap())
    });

    group.bench_function("check_page_miss", |b| {
        b.iter(|| cache.check_page("N:channel:bench", black_box(-1)))
    });

    group.finish();
}

criterion_group!(benches, bench_codec, bench_page_store, bench_cache);
criterion_main!(benches);
