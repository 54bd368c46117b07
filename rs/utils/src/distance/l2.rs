use strum::EnumIter;

use crate::{CalculateSquared, DistanceCalculator};

#[derive(Debug, EnumIter, PartialEq, Clone, Copy)]
pub enum L2DistanceCalculatorImpl {
    Scalar,
    SIMD,
}

pub struct L2DistanceCalculator {}

impl L2DistanceCalculator {
    /// Squared L2 distance using the requested implementation. `SIMD` falls back to
    /// scalar code when the CPU lacks AVX2/FMA.
    pub fn calculate_squared_with(implem: L2DistanceCalculatorImpl, a: &[f32], b: &[f32]) -> f32 {
        match implem {
            L2DistanceCalculatorImpl::Scalar => Self::accumulate_scalar(a, b),
            L2DistanceCalculatorImpl::SIMD => Self::accumulate(a, b),
        }
    }
}

impl DistanceCalculator for L2DistanceCalculator {
    fn accumulate(a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        #[cfg(target_arch = "x86_64")]
        {
            if a.len() >= 16 && is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma")
            {
                // SAFETY: feature support checked above.
                return unsafe { x86_64::l2_squared_avx2(a, b) };
            }
        }
        Self::accumulate_scalar(a, b)
    }

    fn accumulate_scalar(a: &[f32], b: &[f32]) -> f32 {
        a.iter()
            .zip(b.iter())
            .map(|(&x, &y)| (x - y) * (x - y))
            .sum::<f32>()
    }

    fn outermost_op(x: f32) -> f32 {
        x.sqrt()
    }
}

impl CalculateSquared for L2DistanceCalculator {
    fn calculate_squared(a: &[f32], b: &[f32]) -> f32 {
        Self::accumulate(a, b)
    }
}

#[cfg(target_arch = "x86_64")]
mod x86_64 {
    use std::arch::x86_64::*;

    #[target_feature(enable = "avx2,fma")]
    pub unsafe fn l2_squared_avx2(a: &[f32], b: &[f32]) -> f32 {
        let n = a.len().min(b.len());
        let mut acc0 = _mm256_setzero_ps();
        let mut acc1 = _mm256_setzero_ps();
        let mut i = 0;
        while i + 16 <= n {
            let d0 = _mm256_sub_ps(
                _mm256_loadu_ps(a.as_ptr().add(i)),
                _mm256_loadu_ps(b.as_ptr().add(i)),
            );
            let d1 = _mm256_sub_ps(
                _mm256_loadu_ps(a.as_ptr().add(i + 8)),
                _mm256_loadu_ps(b.as_ptr().add(i + 8)),
            );
            acc0 = _mm256_fmadd_ps(d0, d0, acc0);
            acc1 = _mm256_fmadd_ps(d1, d1, acc1);
            i += 16;
        }
        while i + 8 <= n {
            let d = _mm256_sub_ps(
                _mm256_loadu_ps(a.as_ptr().add(i)),
                _mm256_loadu_ps(b.as_ptr().add(i)),
            );
            acc0 = _mm256_fmadd_ps(d, d, acc0);
            i += 8;
        }
        let mut lanes = [0.0f32; 8];
        _mm256_storeu_ps(lanes.as_mut_ptr(), _mm256_add_ps(acc0, acc1));
        let mut sum: f32 = lanes.iter().sum();
        for j in i..n {
            let d = a[j] - b[j];
            sum += d * d;
        }
        sum
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;
    use crate::test_utils::generate_random_vector;

    #[test]
    fn test_l2_impls() {
        for dim in [3, 16, 64, 100, 128, 1000] {
            let a = generate_random_vector(dim);
            let b = generate_random_vector(dim);
            let expected = L2DistanceCalculator::calculate_scalar(&a, &b);
            for implem in L2DistanceCalculatorImpl::iter() {
                let squared = L2DistanceCalculator::calculate_squared_with(implem, &a, &b);
                assert!(
                    (squared.sqrt() - expected).abs() < 1e-4,
                    "{:?} dim {}: {} vs {}",
                    implem,
                    dim,
                    squared.sqrt(),
                    expected
                );
            }
        }
    }

    #[test]
    fn test_l2_known_value() {
        let a = [0.0, 3.0, 0.0];
        let b = [4.0, 0.0, 0.0];
        assert_eq!(L2DistanceCalculator::calculate(&a, &b), 5.0);
        assert_eq!(L2DistanceCalculator::calculate_squared(&a, &b), 25.0);
    }
}
