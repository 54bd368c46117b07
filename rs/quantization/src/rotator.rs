use std::f32::consts::FRAC_1_SQRT_2;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use utils::mem::round_up_to_multiple;

use crate::error::RabitqError;

const ROTATOR_MAGIC: u32 = u32::from_le_bytes(*b"RQRT");
const ROTATOR_VERSION: u32 = 0;
const NUM_ROUNDS: usize = 4;
const HEADER_LEN: usize = 4 + 4 + 8 + 8 + 8 + 4;

/// Padded dimensions are word aligned so binary codes pack into whole `u64`s.
pub const DIM_ALIGNMENT: usize = 64;
/// Permutation entries are stored as `u32`.
pub const MAX_DIM: usize = 1 << 31;

fn checked_padded_dim(dim: usize) -> Option<usize> {
    if dim == 0 || dim > MAX_DIM {
        return None;
    }
    Some(round_up_to_multiple(dim, DIM_ALIGNMENT))
}

/// Random orthogonal transform: a seeded permutation followed by `NUM_ROUNDS` rounds of random
/// sign flips and normalized Fast Hadamard Transforms.
///
/// When `padded_dim` is not a power of two, each round transforms the largest power-of-two window,
/// alternating between the front and the back of the vector, and finishes with a normalized
/// butterfly between the two halves so every coordinate gets mixed. Every step is orthogonal, so
/// norms and inner products are preserved.
#[derive(Debug, Clone, PartialEq)]
pub struct Rotator {
    dim: usize,
    padded_dim: usize,
    seed: u64,
    permutation: Vec<u32>,
    // One bit per (round, coordinate); a set bit negates the coordinate.
    signs: Vec<u64>,
}

impl Rotator {
    pub fn new(dim: usize, seed: u64) -> Result<Self> {
        let padded_dim = checked_padded_dim(dim).ok_or_else(|| {
            RabitqError::InvalidConfig(format!("rotator dimension must be in 1..={}, got {}", MAX_DIM, dim))
        })?;

        let mut rng = StdRng::seed_from_u64(seed);
        let mut permutation: Vec<u32> = (0..padded_dim as u32).collect();
        permutation.shuffle(&mut rng);
        let signs = (0..NUM_ROUNDS * padded_dim / 64).map(|_| rng.gen::<u64>()).collect();

        Ok(Self {
            dim,
            padded_dim,
            seed,
            permutation,
            signs,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn padded_dim(&self) -> usize {
        self.padded_dim
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Serialized size in bytes.
    pub fn size(&self) -> usize {
        HEADER_LEN + self.permutation.len() * 4 + self.signs.len() * 8
    }

    pub fn rotate(&self, x: &[f32]) -> Result<Vec<f32>> {
        let mut out = vec![0.0f32; self.padded_dim];
        self.rotate_into(x, &mut out)?;
        Ok(out)
    }

    /// Rotates `x` (length `dim`) into `out` (length `padded_dim`). `out` is fully overwritten.
    pub fn rotate_into(&self, x: &[f32], out: &mut [f32]) -> Result<()> {
        if x.len() != self.dim {
            return Err(RabitqError::DimensionMismatch {
                expected: self.dim,
                got: x.len(),
            }
            .into());
        }
        if out.len() != self.padded_dim {
            return Err(RabitqError::DimensionMismatch {
                expected: self.padded_dim,
                got: out.len(),
            }
            .into());
        }

        out.fill(0.0);
        for (i, &value) in x.iter().enumerate() {
            out[self.permutation[i] as usize] = value;
        }

        let trunc = prev_power_of_two(self.padded_dim);
        let words_per_round = self.padded_dim / 64;
        for round in 0..NUM_ROUNDS {
            let signs = &self.signs[round * words_per_round..(round + 1) * words_per_round];
            flip_signs(out, signs);
            if trunc == self.padded_dim {
                fht_normalized(out);
            } else {
                if round % 2 == 0 {
                    fht_normalized(&mut out[..trunc]);
                } else {
                    fht_normalized(&mut out[self.padded_dim - trunc..]);
                }
                kac_walk(out);
            }
        }
        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(RabitqError::Io)?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        writer.flush().map_err(RabitqError::Io)?;
        debug!("Saved rotator ({} bytes) to {}", self.size(), path.display());
        Ok(())
    }

    /// Replaces `self` with the rotator stored at `path`. Fails if the file cannot be read or holds a
    /// rotator of a different dimension; `self` is left untouched in that case.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(RabitqError::Io)
            .with_context(|| format!("Failed to open rotator file {}", path.display()))?;
        let loaded = Self::read_from(&mut BufReader::new(file))?;
        if loaded.dim != self.dim {
            return Err(RabitqError::DimensionMismatch {
                expected: self.dim,
                got: loaded.dim,
            }
            .into());
        }
        *self = loaded;
        Ok(())
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<usize> {
        writer.write_u32::<LittleEndian>(ROTATOR_MAGIC).map_err(RabitqError::Io)?;
        writer.write_u32::<LittleEndian>(ROTATOR_VERSION).map_err(RabitqError::Io)?;
        writer.write_u64::<LittleEndian>(self.dim as u64).map_err(RabitqError::Io)?;
        writer.write_u64::<LittleEndian>(self.padded_dim as u64).map_err(RabitqError::Io)?;
        writer.write_u64::<LittleEndian>(self.seed).map_err(RabitqError::Io)?;
        writer.write_u32::<LittleEndian>(NUM_ROUNDS as u32).map_err(RabitqError::Io)?;
        for &p in &self.permutation {
            writer.write_u32::<LittleEndian>(p).map_err(RabitqError::Io)?;
        }
        for &word in &self.signs {
            writer.write_u64::<LittleEndian>(word).map_err(RabitqError::Io)?;
        }
        Ok(self.size())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let corrupted = |msg: &str| -> anyhow::Error { RabitqError::CorruptedFile(msg.to_string()).into() };

        let magic = reader.read_u32::<LittleEndian>().map_err(RabitqError::Io)?;
        if magic != ROTATOR_MAGIC {
            return Err(corrupted("bad rotator magic"));
        }
        let version = reader.read_u32::<LittleEndian>().map_err(RabitqError::Io)?;
        if version != ROTATOR_VERSION {
            return Err(corrupted(&format!("unknown rotator version {}", version)));
        }
        let dim = reader.read_u64::<LittleEndian>().map_err(RabitqError::Io)?;
        let padded_dim = reader.read_u64::<LittleEndian>().map_err(RabitqError::Io)?;
        let seed = reader.read_u64::<LittleEndian>().map_err(RabitqError::Io)?;
        let num_rounds = reader.read_u32::<LittleEndian>().map_err(RabitqError::Io)? as usize;
        let dim = usize::try_from(dim).map_err(|_| corrupted("rotator dimension out of range"))?;
        match checked_padded_dim(dim) {
            Some(expected) if expected as u64 == padded_dim => {}
            _ => return Err(corrupted("inconsistent rotator dimensions")),
        }
        let padded_dim = padded_dim as usize;
        if num_rounds != NUM_ROUNDS {
            return Err(corrupted("unexpected number of rotation rounds"));
        }

        // Grown as entries arrive so a truncated file fails before a large allocation.
        let mut permutation = Vec::new();
        for _ in 0..padded_dim {
            let p = reader.read_u32::<LittleEndian>().map_err(RabitqError::Io)?;
            if p as usize >= padded_dim {
                return Err(corrupted("permutation index out of range"));
            }
            permutation.push(p);
        }
        let mut seen = vec![false; padded_dim];
        for &p in &permutation {
            if std::mem::replace(&mut seen[p as usize], true) {
                return Err(corrupted("permutation has duplicates"));
            }
        }
        let mut signs = Vec::new();
        for _ in 0..num_rounds * padded_dim / 64 {
            signs.push(reader.read_u64::<LittleEndian>().map_err(RabitqError::Io)?);
        }

        Ok(Self {
            dim,
            padded_dim,
            seed,
            permutation,
            signs,
        })
    }
}

fn prev_power_of_two(n: usize) -> usize {
    debug_assert!(n > 0);
    1 << (usize::BITS - 1 - n.leading_zeros())
}

fn flip_signs(x: &mut [f32], signs: &[u64]) {
    for (chunk, &word) in x.chunks_exact_mut(64).zip(signs.iter()) {
        for (j, value) in chunk.iter_mut().enumerate() {
            if (word >> j) & 1 == 1 {
                *value = -*value;
            }
        }
    }
}

/// In-place Walsh-Hadamard transform scaled by `1/sqrt(n)`. `x.len()` must be a power of two.
fn fht_normalized(x: &mut [f32]) {
    let n = x.len();
    debug_assert!(n.is_power_of_two());
    let mut h = 1;
    while h < n {
        for block in x.chunks_exact_mut(2 * h) {
            let (lo, hi) = block.split_at_mut(h);
            for (a, b) in lo.iter_mut().zip(hi.iter_mut()) {
                let (u, v) = (*a, *b);
                *a = u + v;
                *b = u - v;
            }
        }
        h *= 2;
    }
    let scale = 1.0 / (n as f32).sqrt();
    x.iter_mut().for_each(|v| *v *= scale);
}

/// Normalized butterfly between coordinate `i` and `i + n/2`.
fn kac_walk(x: &mut [f32]) {
    let (lo, hi) = x.split_at_mut(x.len() / 2);
    for (a, b) in lo.iter_mut().zip(hi.iter_mut()) {
        let (u, v) = (*a, *b);
        *a = (u + v) * FRAC_1_SQRT_2;
        *b = (u - v) * FRAC_1_SQRT_2;
    }
}
