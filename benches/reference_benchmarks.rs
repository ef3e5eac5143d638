//! Performance benchmarks for the Reference tensor algebra.
//!
//! Run with: cargo bench --bench reference_benchmarks

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use normweave::reference::{cross_product, Reference};

fn flat_reference(axis: &str, len: usize) -> Reference {
    let data: Vec<serde_json::Value> = (0..len).map(|i| serde_json::json!(i)).collect();
    Reference::from_data(serde_json::Value::Array(data), Some(vec![axis.to_string()])).unwrap()
}

fn bench_cross_product(c: &mut Criterion) {
    let mut group = c.benchmark_group("cross_product");
    for &len in &[8usize, 64, 512] {
        let a = flat_reference("a", len);
        let b = flat_reference("b", len);
        group.bench_with_input(BenchmarkId::new("two_axes", len), &len, |bencher, _| {
            bencher.iter(|| cross_product(&[&a, &b]).unwrap());
        });
    }
    group.finish();
}

fn bench_slice(c: &mut Criterion) {
    let a = flat_reference("a", 64);
    let b = flat_reference("b", 64);
    let joined = cross_product(&[&a, &b]).unwrap();
    c.bench_function("slice_one_axis_of_two", |bencher| {
        bencher.iter(|| joined.slice(&["a"]).unwrap());
    });
}

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");
    for &len in &[8usize, 64, 512] {
        let a = flat_reference("a", len);
        let b = flat_reference("a", len);
        group.bench_with_input(BenchmarkId::new("same_axis", len), &len, |bencher, _| {
            bencher.iter(|| a.append(&b, Some("a")).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_cross_product, bench_slice, bench_append);
criterion_main!(benches);
