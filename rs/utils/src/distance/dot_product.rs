use crate::DistanceCalculator;

pub struct DotProductDistanceCalculator {}

impl DotProductDistanceCalculator {
    pub fn norm_squared(a: &[f32]) -> f32 {
        Self::accumulate(a, a)
    }

    pub fn norm(a: &[f32]) -> f32 {
        Self::norm_squared(a).sqrt()
    }
}

impl DistanceCalculator for DotProductDistanceCalculator {
    fn accumulate(a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        #[cfg(target_arch = "x86_64")]
        {
            if a.len() >= 16 && is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma")
            {
                // SAFETY: feature support checked above.
                return unsafe { x86_64::dot_avx2(a, b) };
            }
        }
        Self::accumulate_scalar(a, b)
    }

    fn accumulate_scalar(a: &[f32], b: &[f32]) -> f32 {
        let mut ret = 0.0;
        for i in 0..a.len() {
            ret += a[i] * b[i];
        }
        ret
    }

    // The raw product is the similarity, larger is closer.
    fn outermost_op(x: f32) -> f32 {
        x
    }
}

#[cfg(target_arch = "x86_64")]
mod x86_64 {
    use std::arch::x86_64::*;

    #[target_feature(enable = "avx2,fma")]
    pub unsafe fn dot_avx2(a: &[f32], b: &[f32]) -> f32 {
        let n = a.len().min(b.len());
        let mut acc = _mm256_setzero_ps();
        let mut i = 0;
        while i + 8 <= n {
            acc = _mm256_fmadd_ps(
                _mm256_loadu_ps(a.as_ptr().add(i)),
                _mm256_loadu_ps(b.as_ptr().add(i)),
                acc,
            );
            i += 8;
        }
        let mut lanes = [0.0f32; 8];
        _mm256_storeu_ps(lanes.as_mut_ptr(), acc);
        let mut sum: f32 = lanes.iter().sum();
        for j in i..n {
            sum += a[j] * b[j];
        }
        sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::generate_random_vector;

    #[test]
    fn test_dot_product_distance_calculator() {
        for dim in [7, 128, 300] {
            let a = generate_random_vector(dim);
            let b = generate_random_vector(dim);
            let result = DotProductDistanceCalculator::calculate(&a, &b);
            let expected = DotProductDistanceCalculator::calculate_scalar(&a, &b);
            assert!((result - expected).abs() < 1e-3 * expected.abs().max(1.0));
        }
    }

    #[test]
    fn test_norm() {
        assert_eq!(DotProductDistanceCalculator::norm(&[3.0, 4.0]), 5.0);
    }
}
