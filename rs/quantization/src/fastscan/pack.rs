use crate::fastscan::{batch_bytes, BATCH_SIZE};
use crate::rabitq::code::{binary_code_len, binary_nibble};

/// Packs up to 32 binary codes (`padded_dim / 64` words each) into one FastScan batch.
///
/// For codebook pair `m` the batch holds 32 bytes at `32 * m`. Byte `i < 16` carries codebook
/// `2m` of code `i` in its low nibble and of code `i + 16` in its high nibble; bytes `16..32`
/// do the same for codebook `2m + 1`. Missing codes are zero.
pub fn pack_batch(codes: &[&[u64]], padded_dim: usize, out: &mut [u8]) {
    assert!(codes.len() <= BATCH_SIZE, "at most {} codes per batch", BATCH_SIZE);
    assert_eq!(out.len(), batch_bytes(padded_dim));
    debug_assert!(codes.iter().all(|c| c.len() == binary_code_len(padded_dim)));

    out.fill(0);
    for (m, block) in out.chunks_exact_mut(32).enumerate() {
        for (slot, code) in codes.iter().enumerate() {
            let (byte, shift) = if slot < 16 { (slot, 0) } else { (slot - 16, 4) };
            block[byte] |= binary_nibble(code, 2 * m) << shift;
            block[16 + byte] |= binary_nibble(code, 2 * m + 1) << shift;
        }
    }
}

/// Recovers the binary code stored in slot `index` of a packed batch.
pub fn unpack_single_vector(batch: &[u8], padded_dim: usize, index: usize) -> Vec<u64> {
    assert!(index < BATCH_SIZE);
    assert_eq!(batch.len(), batch_bytes(padded_dim));

    let (byte, shift) = if index < 16 { (index, 0) } else { (index - 16, 4) };
    let mut words = vec![0u64; binary_code_len(padded_dim)];
    for (m, block) in batch.chunks_exact(32).enumerate() {
        for (k, offset) in [(2 * m, 0), (2 * m + 1, 16)] {
            let nibble = ((block[offset + byte] >> shift) & 0xF) as u64;
            words[k / 16] |= nibble << (60 - 4 * (k % 16));
        }
    }
    words
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn random_codes(n: usize, padded_dim: usize, seed: u64) -> Vec<Vec<u64>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| (0..binary_code_len(padded_dim)).map(|_| rng.gen()).collect())
            .collect()
    }

    #[test]
    fn test_pack_unpack() {
        for padded_dim in [64, 128, 192, 960] {
            let codes = random_codes(32, padded_dim, padded_dim as u64);
            let refs: Vec<&[u64]> = codes.iter().map(|c| c.as_slice()).collect();
            let mut batch = vec![0u8; batch_bytes(padded_dim)];
            pack_batch(&refs, padded_dim, &mut batch);
            for (i, code) in codes.iter().enumerate() {
                assert_eq!(&unpack_single_vector(&batch, padded_dim, i), code);
            }
        }
    }

    #[test]
    fn test_partial_batch_is_zero_filled() {
        let codes = random_codes(5, 64, 1);
        let refs: Vec<&[u64]> = codes.iter().map(|c| c.as_slice()).collect();
        let mut batch = vec![0xFFu8; batch_bytes(64)];
        pack_batch(&refs, 64, &mut batch);
        for i in 5..BATCH_SIZE {
            assert!(unpack_single_vector(&batch, 64, i).iter().all(|&w| w == 0));
        }
    }

    #[test]
    fn test_layout() {
        // Code 0: dims 0 and 4 set -> codebook 0 = 0b1000, codebook 1 = 0b1000.
        // Code 17: dim 7 set -> codebook 1 = 0b0001.
        let mut codes = vec![vec![0u64; 1]; 18];
        codes[0][0] = (1u64 << 63) | (1u64 << 59);
        codes[17][0] = 1u64 << 56;
        let refs: Vec<&[u64]> = codes.iter().map(|c| c.as_slice()).collect();
        let mut batch = vec![0u8; batch_bytes(64)];
        pack_batch(&refs, 64, &mut batch);
        assert_eq!(batch[0], 0b1000);
        assert_eq!(batch[16], 0b1000);
        assert_eq!(batch[17], 0b0001 << 4);
        assert_eq!(batch.iter().filter(|&&b| b != 0).count(), 3);
    }
}
