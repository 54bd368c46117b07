//! Code containers produced by the RaBitQ quantizers and the bit layouts they use.
//!
//! * Binary codes keep one bit per padded dimension in `u64` words, most significant bit first:
//!   dimension `64 * w + j` lives in bit `63 - j` of word `w`. Four consecutive dimensions
//!   therefore form one nibble, which is what FastScan consumes.
//! * Extended codes pack `ex_bits` bits per dimension, little-endian inside each group of 8
//!   dimensions (a group occupies exactly `ex_bits` bytes).

/// Quantized vector relative to the origin, one level per dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct FullCode {
    pub code: Vec<u8>,
    pub f_add: f32,
    pub f_rescale: f32,
    pub f_error: f32,
    /// Step between consecutive levels, see `reconstruct_vec`.
    pub delta: f32,
    /// Value of level 0.
    pub vl: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryCode {
    pub words: Vec<u64>,
    pub f_add: f32,
    pub f_rescale: f32,
    pub f_error: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct BinaryCodeRef<'a> {
    pub words: &'a [u64],
    pub f_add: f32,
    pub f_rescale: f32,
    pub f_error: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExCode {
    pub data: Vec<u8>,
    pub f_add_ex: f32,
    pub f_rescale_ex: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct ExCodeRef<'a> {
    pub data: &'a [u8],
    pub f_add_ex: f32,
    pub f_rescale_ex: f32,
}

/// Output of the split quantizer: the sign code scanned by FastScan and the extended bits used
/// for boosting.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitCode {
    pub bin: BinaryCode,
    pub ex: ExCode,
}

impl BinaryCode {
    pub fn as_ref(&self) -> BinaryCodeRef<'_> {
        BinaryCodeRef {
            words: &self.words,
            f_add: self.f_add,
            f_rescale: self.f_rescale,
            f_error: self.f_error,
        }
    }

    pub fn bit(&self, dim: usize) -> bool {
        binary_bit(&self.words, dim)
    }
}

impl ExCode {
    pub fn as_ref(&self) -> ExCodeRef<'_> {
        ExCodeRef {
            data: &self.data,
            f_add_ex: self.f_add_ex,
            f_rescale_ex: self.f_rescale_ex,
        }
    }
}

pub fn binary_code_len(padded_dim: usize) -> usize {
    padded_dim / 64
}

pub fn ex_code_len(padded_dim: usize, ex_bits: usize) -> usize {
    padded_dim * ex_bits / 8
}

pub fn binary_bit(words: &[u64], dim: usize) -> bool {
    (words[dim / 64] >> (63 - dim % 64)) & 1 == 1
}

pub fn pack_binary_code<I: IntoIterator<Item = bool>>(bits: I, padded_dim: usize) -> Vec<u64> {
    let mut words = vec![0u64; binary_code_len(padded_dim)];
    for (dim, bit) in bits.into_iter().enumerate().take(padded_dim) {
        if bit {
            words[dim / 64] |= 1u64 << (63 - dim % 64);
        }
    }
    words
}

/// Nibble of codebook `k`, i.e. the bits of dimensions `4k..4k+4`, first dimension as the MSB.
#[inline]
pub fn binary_nibble(words: &[u64], k: usize) -> u8 {
    ((words[k / 16] >> (60 - 4 * (k % 16))) & 0xF) as u8
}

pub fn pack_ex_code(values: &[u16], ex_bits: usize) -> Vec<u8> {
    debug_assert!(values.len() % 8 == 0);
    let mut out = vec![0u8; ex_code_len(values.len(), ex_bits)];
    if ex_bits == 0 {
        return out;
    }
    let mask = (1u64 << ex_bits) - 1;
    for (group, chunk) in values.chunks_exact(8).enumerate() {
        let mut packed = 0u64;
        for (i, &v) in chunk.iter().enumerate() {
            packed |= (v as u64 & mask) << (i * ex_bits);
        }
        out[group * ex_bits..(group + 1) * ex_bits]
            .copy_from_slice(&packed.to_le_bytes()[..ex_bits]);
    }
    out
}

pub fn unpack_ex_code(data: &[u8], ex_bits: usize, padded_dim: usize) -> Vec<u16> {
    let mut values = vec![0u16; padded_dim];
    if ex_bits == 0 {
        return values;
    }
    let mask = (1u64 << ex_bits) - 1;
    for (group, chunk) in values.chunks_exact_mut(8).enumerate() {
        let mut bytes = [0u8; 8];
        bytes[..ex_bits].copy_from_slice(&data[group * ex_bits..(group + 1) * ex_bits]);
        let packed = u64::from_le_bytes(bytes);
        for (i, v) in chunk.iter_mut().enumerate() {
            *v = ((packed >> (i * ex_bits)) & mask) as u16;
        }
    }
    values
}
