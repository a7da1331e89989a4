//! Benchmarks for the per-request bookkeeping on the backend worker.
//!
//! Every lookup and readdir entry goes through the inode map and the stat
//! cache, so these sit on the hot path of `ls -l` on a large directory.

use std::hint::black_box;
use std::time::{SystemTime, UNIX_EPOCH};

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use smbfs_mount::{
    DEFAULT_STAT_CACHE_CAPACITY, DEFAULT_STAT_TTL, InodeMap, SharePath, StatCache, StatSnapshot,
    mode,
};

fn make_snapshot(inode: u64) -> StatSnapshot {
    let now = SystemTime::now();
    StatSnapshot {
        inode,
        mode: mode::S_IFREG | 0o660,
        size: inode * 512,
        atime: now,
        mtime: UNIX_EPOCH,
        ctime: UNIX_EPOCH,
        uid: 1000,
        gid: 1000,
        nlink: 1,
    }
}

fn inode_map_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("inode_map");

    group.bench_function("inc_ref_new_path", |b| {
        let mut map = InodeMap::new();
        let dir = SharePath::root().join("dir");
        let mut counter = 0u64;
        b.iter(|| {
            counter += 1;
            let path = dir.join(&format!("file_{counter}"));
            black_box(map.inc_ref(&path))
        });
    });

    group.bench_function("inc_ref_existing_path", |b| {
        let mut map = InodeMap::new();
        let path = SharePath::root().join("existing");
        map.inc_ref(&path);
        b.iter(|| black_box(map.inc_ref(&path)));
    });

    group.bench_function("inc_ref_then_forget", |b| {
        b.iter_batched(
            InodeMap::new,
            |mut map| {
                let path = SharePath::root().join("transient");
                let ino = map.inc_ref(&path);
                black_box(map.forget(ino, 1))
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

fn stat_cache_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("stat_cache");

    group.bench_function("put_full_cache", |b| {
        let mut cache = StatCache::new(DEFAULT_STAT_CACHE_CAPACITY, DEFAULT_STAT_TTL);
        let mut inode = 0u64;
        b.iter(|| {
            inode += 1;
            cache.put(make_snapshot(inode));
        });
    });

    group.bench_function("get_hit", |b| {
        let mut cache = StatCache::default();
        for inode in 2..1026 {
            cache.put(make_snapshot(inode));
        }
        let mut inode = 2u64;
        b.iter(|| {
            inode = if inode >= 1025 { 2 } else { inode + 1 };
            black_box(cache.get(inode))
        });
    });

    group.bench_function("get_miss", |b| {
        let mut cache = StatCache::default();
        b.iter(|| black_box(cache.get(black_box(99))));
    });

    group.finish();
}

criterion_group!(benches, inode_map_benchmarks, stat_cache_benchmarks);
criterion_main!(benches);
