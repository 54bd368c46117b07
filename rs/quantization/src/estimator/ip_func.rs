use anyhow::Result;

use crate::error::RabitqError;
use crate::rabitq::config::MAX_EX_BITS;

/// Inner product between a float query and an extended code, specialized per bit width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExIpFunc {
    Empty,
    Bits1,
    Bits2,
    Bits3,
    Bits4,
    Bits5,
    Bits6,
    Bits7,
    Bits8,
}

pub fn select_excode_ipfunc(ex_bits: usize) -> Result<ExIpFunc> {
    let func = match ex_bits {
        0 => ExIpFunc::Empty,
        1 => ExIpFunc::Bits1,
        2 => ExIpFunc::Bits2,
        3 => ExIpFunc::Bits3,
        4 => ExIpFunc::Bits4,
        5 => ExIpFunc::Bits5,
        6 => ExIpFunc::Bits6,
        7 => ExIpFunc::Bits7,
        8 => ExIpFunc::Bits8,
        _ => {
            return Err(RabitqError::InvalidConfig(format!(
                "ex_bits must be at most {}, got {}",
                MAX_EX_BITS, ex_bits
            ))
            .into())
        }
    };
    Ok(func)
}

impl ExIpFunc {
    pub fn ex_bits(&self) -> usize {
        match self {
            ExIpFunc::Empty => 0,
            ExIpFunc::Bits1 => 1,
            ExIpFunc::Bits2 => 2,
            ExIpFunc::Bits3 => 3,
            ExIpFunc::Bits4 => 4,
            ExIpFunc::Bits5 => 5,
            ExIpFunc::Bits6 => 6,
            ExIpFunc::Bits7 => 7,
            ExIpFunc::Bits8 => 8,
        }
    }

    /// `Σ query[i] * ex[i]` over the first `padded_dim` dimensions.
    #[inline]
    pub fn ip(&self, query: &[f32], ex_data: &[u8], padded_dim: usize) -> f32 {
        match self {
            ExIpFunc::Empty => 0.0,
            ExIpFunc::Bits1 => ip_packed::<1>(query, ex_data, padded_dim),
            ExIpFunc::Bits2 => ip_packed::<2>(query, ex_data, padded_dim),
            ExIpFunc::Bits3 => ip_packed::<3>(query, ex_data, padded_dim),
            ExIpFunc::Bits4 => ip_packed::<4>(query, ex_data, padded_dim),
            ExIpFunc::Bits5 => ip_packed::<5>(query, ex_data, padded_dim),
            ExIpFunc::Bits6 => ip_packed::<6>(query, ex_data, padded_dim),
            ExIpFunc::Bits7 => ip_packed::<7>(query, ex_data, padded_dim),
            ExIpFunc::Bits8 => ip_packed::<8>(query, ex_data, padded_dim),
        }
    }
}

// Groups of 8 dimensions occupy B bytes, little-endian.
fn ip_packed<const B: usize>(query: &[f32], data: &[u8], padded_dim: usize) -> f32 {
    debug_assert!(query.len() >= padded_dim);
    debug_assert_eq!(data.len(), padded_dim * B / 8);
    let mask = (1u64 << B) - 1;
    let mut sum = 0.0f32;
    for (q, bytes) in query[..padded_dim].chunks_exact(8).zip(data.chunks_exact(B)) {
        let mut buf = [0u8; 8];
        buf[..B].copy_from_slice(bytes);
        let packed = u64::from_le_bytes(buf);
        let mut group = 0.0f32;
        for (j, &x) in q.iter().enumerate() {
            group += x * ((packed >> (j * B)) & mask) as f32;
        }
        sum += group;
    }
    sum
}
