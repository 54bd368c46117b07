use anyhow::Result;
use config::enums::MetricType;

use crate::error::RabitqError;
use crate::estimator::ip_func::ExIpFunc;
use crate::estimator::{g_terms, split_distance_boosting, sum_terms, EstimatorQuery};
use crate::rabitq::code::{binary_code_len, BinaryCodeRef, ExCodeRef};
use crate::rabitq::config::MAX_EX_BITS;

const QUERY_BITS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SingleEstimate {
    pub est: f32,
    pub low: f32,
    pub ip_x0_qr: f32,
}

/// Query descriptor scoring one binary code at a time.
///
/// The rotated query is scalar quantized to 8 bits (`q ≈ vl + delta * q_u8`) and stored as 8
/// bit planes with the same layout as binary codes, so `<bin, q_u8>` is a sum of popcounts.
#[derive(Debug, Clone)]
pub struct SplitSingleQuery {
    rotated_query: Vec<f32>,
    query_bin: Vec<u64>,
    padded_dim: usize,
    ex_bits: usize,
    metric: MetricType,
    delta: f32,
    vl: f32,
    k1x_sum_q: f32,
    kbx_sum_q: f32,
    g_add: f32,
    g_error: f32,
}

impl SplitSingleQuery {
    pub fn new(rotated_query: &[f32], padded_dim: usize, ex_bits: usize, metric: MetricType) -> Result<Self> {
        if padded_dim == 0 || padded_dim % 64 != 0 {
            return Err(RabitqError::InvalidConfig(format!(
                "padded dimension must be a positive multiple of 64, got {}",
                padded_dim
            ))
            .into());
        }
        if rotated_query.len() != padded_dim {
            return Err(RabitqError::DimensionMismatch {
                expected: padded_dim,
                got: rotated_query.len(),
            }
            .into());
        }
        if ex_bits > MAX_EX_BITS {
            return Err(RabitqError::InvalidConfig(format!("ex_bits {} out of range", ex_bits)).into());
        }

        let (vl, vr) = rotated_query
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), &x| (lo.min(x), hi.max(x)));
        let delta = (vr - vl) / ((1 << QUERY_BITS) - 1) as f32;

        let num_words = binary_code_len(padded_dim);
        let mut query_bin = vec![0u64; QUERY_BITS * num_words];
        for (dim, &x) in rotated_query.iter().enumerate() {
            let level = if delta > 0.0 {
                ((x - vl) / delta).round().clamp(0.0, 255.0) as u8
            } else {
                0
            };
            for plane in 0..QUERY_BITS {
                if (level >> plane) & 1 == 1 {
                    query_bin[plane * num_words + dim / 64] |= 1u64 << (63 - dim % 64);
                }
            }
        }

        let (k1x_sum_q, kbx_sum_q) = sum_terms(rotated_query, ex_bits);
        Ok(Self {
            rotated_query: rotated_query.to_vec(),
            query_bin,
            padded_dim,
            ex_bits,
            metric,
            delta,
            vl,
            k1x_sum_q,
            kbx_sum_q,
            g_add: 0.0,
            g_error: 0.0,
        })
    }

    /// Bit plane `b` of the quantized query occupies words `b * padded_dim / 64..`.
    pub fn query_bin(&self) -> &[u64] {
        &self.query_bin
    }

    pub fn delta(&self) -> f32 {
        self.delta
    }

    pub fn vl(&self) -> f32 {
        self.vl
    }

    pub fn ex_bits(&self) -> usize {
        self.ex_bits
    }

    pub fn set_g_add(&mut self, norm: f32, ip: f32) {
        let (g_add, g_error) = g_terms(self.metric, norm, ip);
        self.g_add = g_add;
        self.g_error = g_error;
    }

    /// Approximate `<bin, q>` and its worst case error, half a step per set bit.
    fn ip_bin(&self, words: &[u64]) -> (f32, f32) {
        let num_words = words.len();
        let mut weighted = 0u64;
        for plane in 0..QUERY_BITS {
            let bits = &self.query_bin[plane * num_words..(plane + 1) * num_words];
            let count: u32 = words.iter().zip(bits.iter()).map(|(x, q)| (x & q).count_ones()).sum();
            weighted += (count as u64) << plane;
        }
        let ones: u32 = words.iter().map(|x| x.count_ones()).sum();
        let ip = self.delta * weighted as f32 + self.vl * ones as f32;
        (ip, 0.5 * self.delta * ones as f32)
    }
}

impl EstimatorQuery for SplitSingleQuery {
    fn rotated_query(&self) -> &[f32] {
        &self.rotated_query
    }

    fn g_add(&self) -> f32 {
        self.g_add
    }

    fn g_error(&self) -> f32 {
        self.g_error
    }

    fn kbx_sum_q(&self) -> f32 {
        self.kbx_sum_q
    }
}

pub fn split_single_estdist(bin: BinaryCodeRef, query: &SplitSingleQuery, padded_dim: usize) -> SingleEstimate {
    debug_assert_eq!(padded_dim, query.padded_dim);
    debug_assert_eq!(bin.words.len(), binary_code_len(padded_dim));
    let (ip_x0_qr, ip_error) = query.ip_bin(bin.words);
    let est = bin.f_add + query.g_add + bin.f_rescale * (ip_x0_qr + query.k1x_sum_q);
    SingleEstimate {
        est,
        low: est - bin.f_error * query.g_error - bin.f_rescale.abs() * ip_error,
        ip_x0_qr,
    }
}

/// Binary estimate followed by boosting with the extended bits.
pub fn split_single_fulldist(
    bin: BinaryCodeRef,
    ex: ExCodeRef,
    ip_func: ExIpFunc,
    query: &SplitSingleQuery,
    padded_dim: usize,
    ex_bits: usize,
) -> f32 {
    let estimate = split_single_estdist(bin, query, padded_dim);
    if ex_bits == 0 {
        return estimate.est;
    }
    split_distance_boosting(ex, ip_func, query, padded_dim, ex_bits, estimate.ip_x0_qr)
}
