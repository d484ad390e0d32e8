//! Benchmarks for partitioning and layout construction

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tilepack_core::{HardwareConfig, TripletSet};
use tilepack_sparse::{MultiStageLayout, PartitionedMatrix, SingleStageLayout, StageInput};

fn bench_partition(c: &mut Criterion) {
    let mut group = c.benchmark_group("partition");
    let config = HardwareConfig::default().with_tile_capacity(1024, 1024);

    for &nnz in &[1_000usize, 10_000, 100_000] {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let triplets = TripletSet::random(4096, 4096, nnz, &mut rng).unwrap();
        group.throughput(Throughput::Elements(nnz as u64));

        group.bench_with_input(BenchmarkId::new("tiles", nnz), &triplets, |b, t| {
            b.iter(|| PartitionedMatrix::<f32>::from_triplets(black_box(t), &config).unwrap());
        });

        let partition = PartitionedMatrix::<f32>::from_triplets(&triplets, &config).unwrap();
        group.bench_with_input(BenchmarkId::new("single_stage", nnz), &partition, |b, p| {
            b.iter(|| SingleStageLayout::build(black_box(p), &config).unwrap());
        });
    }

    group.finish();
}

fn bench_multistage(c: &mut Criterion) {
    let config = HardwareConfig::default();
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let dims = [1024usize, 512, 256, 128];
    let stages: Vec<StageInput> = dims
        .windows(2)
        .map(|w| StageInput::new(TripletSet::random(w[1], w[0], w[0] * 8, &mut rng).unwrap(), 0.1))
        .collect();

    c.bench_function("multistage/build", |b| {
        b.iter(|| MultiStageLayout::build(black_box(&stages), &config).unwrap());
    });
}

criterion_group!(benches, bench_partition, bench_multistage);
criterion_main!(benches);
