use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pooled_bplus::{BPlusTree, PoolAllocator, PooledBPlusTree};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

const SIZES: [i64; 3] = [1_000, 10_000, 100_000];

fn shuffled(n: i64) -> Vec<i64> {
    let mut keys: Vec<i64> = (0..n).collect();
    keys.shuffle(&mut StdRng::seed_from_u64(n as u64));
    keys
}

fn insertion(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    for n in SIZES {
        let keys = shuffled(n);

        group.bench_with_input(BenchmarkId::new("system", n), &keys, |b, keys| {
            b.iter(|| {
                let mut tree = BPlusTree::<i64, i64, 32>::new();
                for &k in keys {
                    tree.insert(k, k).unwrap();
                }
                black_box(tree.size())
            })
        });

        group.bench_with_input(BenchmarkId::new("pooled", n), &keys, |b, keys| {
            b.iter(|| {
                let mut tree: PooledBPlusTree<i64, i64, 32, 256> =
                    PooledBPlusTree::new_in(PoolAllocator::new(), PoolAllocator::new()).unwrap();
                for &k in keys {
                    tree.insert(k, k).unwrap();
                }
                black_box(tree.size())
            })
        });

        group.bench_with_input(BenchmarkId::new("std", n), &keys, |b, keys| {
            b.iter(|| {
                let mut map = std::collections::BTreeMap::new();
                for &k in keys {
                    map.insert(k, k);
                }
                black_box(map.len())
            })
        });
    }
    group.finish();
}

fn lookup_and_erase(c: &mut Criterion) {
    let mut group = c.benchmark_group("erase");
    for n in SIZES {
        let keys = shuffled(n);
        let mut tree = BPlusTree::<i64, i64, 32>::new();
        for &k in &keys {
            tree.insert(k, k).unwrap();
        }

        group.bench_with_input(BenchmarkId::new("lookup", n), &keys, |b, keys| {
            b.iter(|| keys.iter().filter(|k| tree.contains(k)).count())
        });

        group.bench_with_input(BenchmarkId::new("erase_all_keys", n), &keys, |b, keys| {
            b.iter(|| {
                let mut copy = tree.clone();
                for k in keys {
                    copy.erase(k);
                }
                black_box(copy.is_empty())
            })
        });
    }
    group.finish();
}

criterion_group!(benches, insertion, lookup_and_erase);
criterion_main!(benches);
