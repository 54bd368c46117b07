use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use strum::IntoEnumIterator;
use utils::distance::l2::{L2DistanceCalculator, L2DistanceCalculatorImpl};
use utils::test_utils::generate_random_vector;

fn bench_l2_squared(c: &mut Criterion) {
    let mut group = c.benchmark_group("L2 squared");
    // Padded dimensions seen by the rotator and centroid ranking.
    for size in [64, 128, 256, 512, 768, 960, 1024, 1536, 3072].iter() {
        let a = generate_random_vector(*size);
        let b = generate_random_vector(*size);

        for implem in L2DistanceCalculatorImpl::iter() {
            group.bench_with_input(
                BenchmarkId::new(format!("{:?}", implem), *size),
                &implem,
                |bencher, implem| {
                    bencher.iter(|| {
                        L2DistanceCalculator::calculate_squared_with(
                            *implem,
                            black_box(&a),
                            black_box(&b),
                        )
                    })
                },
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_l2_squared);
criterion_main!(benches);
