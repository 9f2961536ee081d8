use criterion::{black_box, Criterion, criterion_group, criterion_main};

use kvstore::{KvStore, KvStoreFlags, ScanAction};

fn filled(shard_bits: u32, keys: usize) -> KvStore<String, usize> {
    let mut kvs = KvStore::new(shard_bits, KvStoreFlags::ALLOCATE_SHARDS_ON_DEMAND).unwrap();
    for i in 0..keys {
        let key = format!("key:{}", i);
        let shard = kvs.shard_for(key.as_str());
        kvs.shard_add_raw(shard, key, i).unwrap();
    }
    kvs
}

fn settle(kvs: &mut KvStore<String, usize>) {
    while kvs.rehashing_count() > 0 {
        kvs.incrementally_rehash(1_000);
    }
}

fn full_scan(kvs: &mut KvStore<String, usize>) -> usize {
    let mut visited = 0;
    let mut cursor = 0;
    loop {
        cursor = kvs.scan(cursor, None, |_, _| {
            visited += 1;
            ScanAction::Keep
        }, None);
        if cursor == 0 {
            return visited;
        }
    }
}

fn benchmark_add(c: &mut Criterion) {
    c.bench_function("add 10k keys into 16 shards", |b| {
        b.iter(|| black_box(filled(4, 10_000).size()))
    });
}

fn benchmark_scan(c: &mut Criterion) {
    let mut kvs = filled(10, 50_000);
    settle(&mut kvs);
    c.bench_function("scan 50k keys over 1024 shards", |b| {
        b.iter(|| black_box(full_scan(&mut kvs)))
    });
}

fn benchmark_fair_random(c: &mut Criterion) {
    let kvs = filled(10, 50_000);
    c.bench_function("fair random shard of 1024", |b| {
        b.iter(|| black_box(kvs.fair_random_shard_index()))
    });
}

fn benchmark_incremental_rehash(c: &mut Criterion) {
    c.bench_function("grow 16 shards to 64k buckets", |b| {
        b.iter(|| {
            let mut kvs = filled(4, 10_000);
            kvs.expand(1 << 16, false, None).unwrap();
            settle(&mut kvs);
            black_box(kvs.bucket_count())
        })
    });
}

criterion_group!(benches, benchmark_add, benchmark_scan, benchmark_fair_random, benchmark_incremental_rehash);
criterion_main!(benches);
