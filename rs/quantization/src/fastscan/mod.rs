//! FastScan: scoring 32 binary codes at a time with byte shuffles over 4-bit lookup tables.
//!
//! A binary code is split into codebooks of 4 dimensions (one nibble each). Codes are packed
//! 32 per batch and interleaved per codebook pair so that one 32-byte load carries two
//! codebooks for the whole batch, see `pack::pack_batch`.

pub mod accumulate;
pub mod lut;
pub mod pack;

pub use accumulate::{accumulate, accumulate_hacc};
pub use lut::{transfer_lut_hacc, HaccLut, Lut};
pub use pack::{pack_batch, unpack_single_vector};

pub const BATCH_SIZE: usize = 32;

/// Bytes of one packed batch: 32 codes of `padded_dim` bits.
pub fn batch_bytes(padded_dim: usize) -> usize {
    padded_dim * BATCH_SIZE / 8
}

pub fn num_codebooks(padded_dim: usize) -> usize {
    padded_dim / 4
}

pub fn num_batches(num_codes: usize) -> usize {
    num_codes.div_ceil(BATCH_SIZE)
}
