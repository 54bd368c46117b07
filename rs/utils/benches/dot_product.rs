use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use utils::distance::dot_product::DotProductDistanceCalculator;
use utils::test_utils::generate_random_vector;
use utils::DistanceCalculator;

fn bench_dot_product(c: &mut Criterion) {
    let mut group = c.benchmark_group("dot_product");

    for size in [64, 128, 256, 512, 768, 960, 1024, 1536, 3072].iter() {
        let a = generate_random_vector(*size);
        let b = generate_random_vector(*size);

        group.bench_with_input(BenchmarkId::new("dispatch", size), &size, |bench, &_size| {
            bench.iter(|| DotProductDistanceCalculator::calculate(black_box(&a), black_box(&b)));
        });

        group.bench_with_input(BenchmarkId::new("scalar", size), &size, |bench, &_size| {
            bench.iter(|| {
                DotProductDistanceCalculator::calculate_scalar(black_box(&a), black_box(&b))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_dot_product);
criterion_main!(benches);
