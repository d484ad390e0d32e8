//! Benchmarks for the bit-exact reference GEMM

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tilepack_core::{DenseMatrix, LeakyRelu, PostScale};

fn ramp(rows: usize, cols: usize) -> DenseMatrix<'static, i16> {
    let mut m = DenseMatrix::new(rows, cols).unwrap();
    m.fill_range_cycling(-64, 63).unwrap();
    m
}

fn bench_reference_gemm(c: &mut Criterion) {
    let mut group = c.benchmark_group("reference_gemm");

    for &size in &[32usize, 64, 128] {
        let a = ramp(size, size);
        let b = ramp(size, size);
        let mut x = DenseMatrix::<i32>::new(size, size).unwrap();
        x.fill_cycling(97, 0).unwrap();
        let scale = PostScale::new(3, 4).pack().unwrap();
        let leaky = LeakyRelu::new(1, 2).pack().unwrap();
        let mut out = DenseMatrix::<i16>::new(size, size).unwrap();

        group.bench_with_input(BenchmarkId::new("multiply", size), &size, |bench, _| {
            bench.iter(|| {
                out.multiply(black_box(&a), black_box(&b)).unwrap();
            });
        });

        group.bench_with_input(BenchmarkId::new("scale_leaky", size), &size, |bench, _| {
            bench.iter(|| {
                out.multiply_with_scale_and_leaky_activation(
                    black_box(&a),
                    black_box(&b),
                    black_box(&x),
                    scale,
                    leaky,
                )
                .unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_reference_gemm);
criterion_main!(benches);
