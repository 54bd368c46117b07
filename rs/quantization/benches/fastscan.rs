use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use quantization::fastscan::accumulate::{accumulate_hacc_with, accumulate_with, FastScanImpl};
use quantization::fastscan::{batch_bytes, pack_batch, HaccLut, Lut};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use strum::IntoEnumIterator;
use utils::test_utils::generate_random_vector;

fn bench_accumulate(c: &mut Criterion) {
    let _ = env_logger::try_init();
    let mut group = c.benchmark_group("FastScan accumulate");
    let mut rng = StdRng::seed_from_u64(7);
    for padded_dim in [128, 256, 512, 960, 1024, 3072].iter() {
        let codes: Vec<Vec<u64>> = (0..32)
            .map(|_| (0..*padded_dim / 64).map(|_| rng.gen()).collect())
            .collect();
        let refs: Vec<&[u64]> = codes.iter().map(|c| c.as_slice()).collect();
        let mut batch = vec![0u8; batch_bytes(*padded_dim)];
        pack_batch(&refs, *padded_dim, &mut batch);

        let query = generate_random_vector(*padded_dim);
        let lut = Lut::new(&query);
        let hacc = HaccLut::new(&query);

        for implem in FastScanImpl::iter() {
            group.bench_with_input(
                BenchmarkId::new(format!("baseline_{:?}", implem), *padded_dim),
                &implem,
                |bencher, implem| {
                    bencher.iter(|| accumulate_with(*implem, black_box(&batch), black_box(lut.table()), *padded_dim))
                },
            );
            group.bench_with_input(
                BenchmarkId::new(format!("hacc_{:?}", implem), *padded_dim),
                &implem,
                |bencher, implem| {
                    bencher.iter(|| {
                        accumulate_hacc_with(*implem, black_box(&batch), black_box(hacc.hc_lut()), *padded_dim)
                    })
                },
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_accumulate);
criterion_main!(benches);
