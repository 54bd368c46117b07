use strum::EnumIter;

use crate::fastscan::{batch_bytes, BATCH_SIZE};

/// 16-bit lane sums stay exact for 256 codebook pairs of byte entries.
const FLUSH_PAIRS: usize = 256;

#[derive(Debug, EnumIter, PartialEq, Clone, Copy)]
pub enum FastScanImpl {
    Scalar,
    SIMD,
}

/// Sum over all codebooks of `lut[codebook][nibble]` for each of the 32 codes of a batch.
pub fn accumulate(codes: &[u8], lut: &[u8], padded_dim: usize) -> [u32; BATCH_SIZE] {
    accumulate_with(FastScanImpl::SIMD, codes, lut, padded_dim)
}

/// Same as `accumulate` over a `u16` table split by `transfer_lut_hacc`.
pub fn accumulate_hacc(codes: &[u8], hc_lut: &[u8], padded_dim: usize) -> [i32; BATCH_SIZE] {
    accumulate_hacc_with(FastScanImpl::SIMD, codes, hc_lut, padded_dim)
}

pub fn accumulate_with(
    implem: FastScanImpl,
    codes: &[u8],
    lut: &[u8],
    padded_dim: usize,
) -> [u32; BATCH_SIZE] {
    let num_pairs = padded_dim / 8;
    assert_eq!(codes.len(), batch_bytes(padded_dim));
    assert_eq!(lut.len(), num_pairs * 32);
    accumulate_tables(implem, codes, lut, 32, num_pairs)
}

pub fn accumulate_hacc_with(
    implem: FastScanImpl,
    codes: &[u8],
    hc_lut: &[u8],
    padded_dim: usize,
) -> [i32; BATCH_SIZE] {
    let num_pairs = padded_dim / 8;
    assert_eq!(codes.len(), batch_bytes(padded_dim));
    assert_eq!(hc_lut.len(), num_pairs * 64);
    let low = accumulate_tables(implem, codes, hc_lut, 64, num_pairs);
    let high = accumulate_tables(implem, codes, &hc_lut[32..], 64, num_pairs);

    let mut result = [0i32; BATCH_SIZE];
    for (i, out) in result.iter_mut().enumerate() {
        *out = (low[i] + (high[i] << 8)) as i32;
    }
    result
}

/// `lut` holds one 32-byte table pair every `stride` bytes, pair `m` matching codes
/// `32m..32m + 32`. Callers guarantee the lengths.
fn accumulate_tables(
    implem: FastScanImpl,
    codes: &[u8],
    lut: &[u8],
    stride: usize,
    num_pairs: usize,
) -> [u32; BATCH_SIZE] {
    debug_assert!(codes.len() >= num_pairs * 32);
    debug_assert!(num_pairs == 0 || lut.len() >= stride * (num_pairs - 1) + 32);
    match implem {
        FastScanImpl::Scalar => accumulate_tables_scalar(codes, lut, stride, num_pairs),
        FastScanImpl::SIMD => {
            #[cfg(target_arch = "x86_64")]
            {
                if is_x86_feature_detected!("avx2") {
                    // SAFETY: feature support checked above, lengths checked by the callers.
                    return unsafe { x86_64::accumulate_tables_avx2(codes, lut, stride, num_pairs) };
                }
            }
            accumulate_tables_scalar(codes, lut, stride, num_pairs)
        }
    }
}

fn accumulate_tables_scalar(codes: &[u8], lut: &[u8], stride: usize, num_pairs: usize) -> [u32; BATCH_SIZE] {
    let mut result = [0u32; BATCH_SIZE];
    for m in 0..num_pairs {
        let block = &codes[32 * m..32 * m + 32];
        let table = &lut[stride * m..stride * m + 32];
        for i in 0..16 {
            let first = block[i];
            let second = block[16 + i];
            result[i] += table[(first & 0xF) as usize] as u32 + table[16 + (second & 0xF) as usize] as u32;
            result[16 + i] += table[(first >> 4) as usize] as u32 + table[16 + (second >> 4) as usize] as u32;
        }
    }
    result
}

#[cfg(target_arch = "x86_64")]
mod x86_64 {
    use std::arch::x86_64::*;

    use super::FLUSH_PAIRS;
    use crate::fastscan::BATCH_SIZE;

    /// Shuffle-based lookup. Each 16-bit lane accumulates an even byte plus 256 times an odd
    /// byte; a second accumulator collects the odd bytes so the even sums can be recovered.
    #[target_feature(enable = "avx2")]
    pub unsafe fn accumulate_tables_avx2(
        codes: &[u8],
        lut: &[u8],
        stride: usize,
        num_pairs: usize,
    ) -> [u32; BATCH_SIZE] {
        let mask = _mm256_set1_epi8(0x0F);
        let mut totals = [0u32; BATCH_SIZE];
        let mut start = 0;
        while start < num_pairs {
            let end = (start + FLUSH_PAIRS).min(num_pairs);
            let mut low_even = _mm256_setzero_si256();
            let mut low_odd = _mm256_setzero_si256();
            let mut high_even = _mm256_setzero_si256();
            let mut high_odd = _mm256_setzero_si256();
            for m in start..end {
                let c = _mm256_loadu_si256(codes.as_ptr().add(32 * m) as *const __m256i);
                let t = _mm256_loadu_si256(lut.as_ptr().add(stride * m) as *const __m256i);
                let lo = _mm256_and_si256(c, mask);
                let hi = _mm256_and_si256(_mm256_srli_epi16(c, 4), mask);
                let res_lo = _mm256_shuffle_epi8(t, lo);
                let res_hi = _mm256_shuffle_epi8(t, hi);
                low_even = _mm256_add_epi16(low_even, res_lo);
                low_odd = _mm256_add_epi16(low_odd, _mm256_srli_epi16(res_lo, 8));
                high_even = _mm256_add_epi16(high_even, res_hi);
                high_odd = _mm256_add_epi16(high_odd, _mm256_srli_epi16(res_hi, 8));
            }
            low_even = _mm256_sub_epi16(low_even, _mm256_slli_epi16(low_odd, 8));
            high_even = _mm256_sub_epi16(high_even, _mm256_slli_epi16(high_odd, 8));
            flush(&mut totals[..16], low_even, low_odd);
            flush(&mut totals[16..], high_even, high_odd);
            start = end;
        }
        totals
    }

    /// Lane 0 holds the first codebook of the pair, lane 1 the second; both add to the same code.
    #[target_feature(enable = "avx2")]
    unsafe fn flush(out: &mut [u32], even: __m256i, odd: __m256i) {
        let mut e = [0u16; 16];
        let mut o = [0u16; 16];
        _mm256_storeu_si256(e.as_mut_ptr() as *mut __m256i, even);
        _mm256_storeu_si256(o.as_mut_ptr() as *mut __m256i, odd);
        for j in 0..8 {
            out[2 * j] += e[j] as u32 + e[8 + j] as u32;
            out[2 * j + 1] += o[j] as u32 + o[8 + j] as u32;
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use strum::IntoEnumIterator;

    use super::*;
    use crate::fastscan::lut::transfer_lut_hacc;
    use crate::fastscan::pack::{pack_batch, unpack_single_vector};
    use crate::rabitq::code::binary_nibble;

    fn random_batch(padded_dim: usize, rng: &mut StdRng) -> Vec<u8> {
        let codes: Vec<Vec<u64>> = (0..BATCH_SIZE)
            .map(|_| (0..padded_dim / 64).map(|_| rng.gen()).collect())
            .collect();
        let refs: Vec<&[u64]> = codes.iter().map(|c| c.as_slice()).collect();
        let mut batch = vec![0u8; batch_bytes(padded_dim)];
        pack_batch(&refs, padded_dim, &mut batch);
        batch
    }

    /// Per code, per codebook lookup with no batching at all.
    fn naive_sum<T: Copy + Into<u64>>(batch: &[u8], table: &[T], padded_dim: usize) -> Vec<u64> {
        (0..BATCH_SIZE)
            .map(|i| {
                let words = unpack_single_vector(batch, padded_dim, i);
                (0..padded_dim / 4)
                    .map(|k| {
                        let entry: u64 = table[16 * k + binary_nibble(&words, k) as usize].into();
                        entry
                    })
                    .sum::<u64>()
            })
            .collect()
    }

    #[test]
    fn test_accumulate_matches_naive_sum() {
        let mut rng = StdRng::seed_from_u64(31);
        for padded_dim in (64..=4096).step_by(64) {
            let batch = random_batch(padded_dim, &mut rng);
            let lut: Vec<u8> = (0..padded_dim * 4).map(|_| rng.gen()).collect();
            let expected = naive_sum(&batch, &lut, padded_dim);
            for implem in FastScanImpl::iter() {
                let result = accumulate_with(implem, &batch, &lut, padded_dim);
                for i in 0..BATCH_SIZE {
                    assert_eq!(result[i] as u64, expected[i], "{:?} dim {} code {}", implem, padded_dim, i);
                }
            }
        }
    }

    #[test]
    fn test_accumulate_hacc_matches_naive_sum() {
        let mut rng = StdRng::seed_from_u64(32);
        for padded_dim in (64..=4096).step_by(64) {
            let batch = random_batch(padded_dim, &mut rng);
            let lut: Vec<u16> = (0..padded_dim * 4).map(|_| rng.gen()).collect();
            let mut hc_lut = vec![0u8; padded_dim * 8];
            transfer_lut_hacc(&lut, padded_dim, &mut hc_lut);
            let expected = naive_sum(&batch, &lut, padded_dim);
            for implem in FastScanImpl::iter() {
                let result = accumulate_hacc_with(implem, &batch, &hc_lut, padded_dim);
                for i in 0..BATCH_SIZE {
                    assert_eq!(result[i] as u64, expected[i], "{:?} dim {} code {}", implem, padded_dim, i);
                }
            }
        }
    }

    #[test]
    fn test_saturated_tables() {
        // Largest entries over more than one flush window.
        let padded_dim = 4096;
        let batch = vec![0xFFu8; batch_bytes(padded_dim)];
        let lut = vec![u8::MAX; padded_dim * 4];
        let result = accumulate(&batch, &lut, padded_dim);
        assert!(result.iter().all(|&x| x == 255 * 1024));

        let hc_lut = vec![u8::MAX; padded_dim * 8];
        let result = accumulate_hacc(&batch, &hc_lut, padded_dim);
        assert!(result.iter().all(|&x| x == 65535 * 1024));
    }

    #[test]
    #[should_panic]
    fn test_wrong_lut_length() {
        accumulate(&[0u8; 256], &[0u8; 100], 64);
    }
}
