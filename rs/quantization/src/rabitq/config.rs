use std::cmp::Reverse;
use std::collections::BinaryHeap;

use anyhow::Result;
use log::debug;
use ndarray_rand::rand_distr::{Distribution, StandardNormal};
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::RabitqError;

pub const MAX_EX_BITS: usize = 8;
// Roughly a 5.8 sigma confidence on the binary estimate, so the lower bound is safe to prune with.
pub const DEFAULT_EPS0: f32 = 5.8;

pub(crate) const K_EPS: f64 = 1e-5;
const K_N_ENUM: usize = 10;
// Lower end of the rescale factor search, as a fraction of the upper end, per ex_bits.
const K_TIGHT_START: [f64; MAX_EX_BITS + 1] = [0.0, 0.15, 0.20, 0.52, 0.59, 0.71, 0.75, 0.77, 0.81];

const FASTER_NUM_SAMPLES: usize = 100;
const FASTER_SEED: u64 = 0x7261_6269;

/// Parameters of the extended-code quantizer.
///
/// By default the rescale factor is searched per vector. `faster_config` fixes it to the average
/// optimum over Gaussian samples of the target dimension, which is close to optimal for rotated
/// data and skips the per-vector search.
#[derive(Debug, Clone, PartialEq)]
pub struct RabitqConfig {
    pub t_const: Option<f64>,
    /// Confidence multiplier of the error bound.
    pub eps0: f32,
}

impl Default for RabitqConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RabitqConfig {
    pub fn new() -> Self {
        Self {
            t_const: None,
            eps0: DEFAULT_EPS0,
        }
    }

    pub fn with_eps0(mut self, eps0: f32) -> Self {
        self.eps0 = eps0;
        self
    }

    pub fn faster_config(dim: usize, total_bits: usize) -> Result<Self> {
        if dim == 0 {
            return Err(RabitqError::InvalidConfig("dimension must be positive".into()).into());
        }
        let ex_bits = ex_bits_of(total_bits)?;
        if ex_bits == 0 {
            return Ok(Self::new());
        }

        let mut rng = StdRng::seed_from_u64(FASTER_SEED);
        let mut sum = 0.0f64;
        for _ in 0..FASTER_NUM_SAMPLES {
            let sample: Vec<f64> = (0..dim)
                .map(|_| {
                    let x: f64 = StandardNormal.sample(&mut rng);
                    x
                })
                .collect();
            let norm = sample.iter().map(|x| x * x).sum::<f64>().sqrt();
            let o_abs: Vec<f64> = sample.iter().map(|x| x.abs() / norm).collect();
            sum += best_rescale_factor(&o_abs, ex_bits);
        }
        let t_const = sum / FASTER_NUM_SAMPLES as f64;
        debug!(
            "Faster config for dim {} and {} total bits: t = {:.4}",
            dim, total_bits, t_const
        );
        Ok(Self {
            t_const: Some(t_const),
            eps0: DEFAULT_EPS0,
        })
    }

    pub(crate) fn rescale_factor(&self, o_abs: &[f64], ex_bits: usize) -> f64 {
        match self.t_const {
            Some(t) => t,
            None => best_rescale_factor(o_abs, ex_bits),
        }
    }
}

pub fn ex_bits_of(total_bits: usize) -> Result<usize> {
    if total_bits == 0 || total_bits > MAX_EX_BITS + 1 {
        return Err(RabitqError::InvalidConfig(format!(
            "total_bits must be in [1, {}], got {}",
            MAX_EX_BITS + 1,
            total_bits
        ))
        .into());
    }
    Ok(total_bits - 1)
}

/// Finds the scale `t` maximizing the cosine between `|o|` and the code
/// `min(floor(t * |o_i|), 2^ex_bits - 1) + 0.5`.
///
/// The code only changes at the points `t = (k + 1) / |o_i|`, so every such point in
/// `[t_start, t_end)` is visited in increasing order while the numerator and squared denominator
/// of the cosine are updated incrementally. `o_abs` must be non-negative and unit length.
pub fn best_rescale_factor(o_abs: &[f64], ex_bits: usize) -> f64 {
    debug_assert!(ex_bits <= MAX_EX_BITS);
    let max_o = o_abs.iter().copied().fold(0.0f64, f64::max);
    if max_o <= 0.0 {
        return 1.0;
    }
    let max_code = (1i64 << ex_bits) - 1;
    let t_end = (max_code as f64 + K_N_ENUM as f64) / max_o;
    let t_start = t_end * K_TIGHT_START[ex_bits];

    let mut cur_o_bar: Vec<i64> = Vec::with_capacity(o_abs.len());
    let mut sqr_denominator = o_abs.len() as f64 * 0.25;
    let mut numerator = 0.0f64;
    for &o in o_abs {
        let cur = ((t_start * o) + K_EPS) as i64;
        cur_o_bar.push(cur);
        sqr_denominator += (cur * cur + cur) as f64;
        numerator += (cur as f64 + 0.5) * o;
    }

    let mut next_t: BinaryHeap<Reverse<(OrderedFloat<f64>, usize)>> = BinaryHeap::new();
    for (i, &o) in o_abs.iter().enumerate() {
        if o > 0.0 && cur_o_bar[i] < max_code {
            next_t.push(Reverse((OrderedFloat((cur_o_bar[i] + 1) as f64 / o), i)));
        }
    }

    let mut max_ip = 0.0f64;
    let mut best_t = t_start;
    while let Some(Reverse((OrderedFloat(cur_t), i))) = next_t.pop() {
        cur_o_bar[i] += 1;
        let updated = cur_o_bar[i];
        sqr_denominator += (2 * updated) as f64;
        numerator += o_abs[i];

        let cur_ip = numerator / sqr_denominator.sqrt();
        if cur_ip > max_ip {
            max_ip = cur_ip;
            best_t = cur_t;
        }

        if updated < max_code {
            let t_next = (updated + 1) as f64 / o_abs[i];
            if t_next < t_end {
                next_t.push(Reverse((OrderedFloat(t_next), i)));
            }
        }
    }
    best_t
}

#[cfg(test)]
mod tests {
    use utils::test_utils::generate_gaussian_vector;

    use super::*;

    fn cosine_at(o_abs: &[f64], t: f64, ex_bits: usize) -> f64 {
        let max_code = (1i64 << ex_bits) - 1;
        let mut num = 0.0;
        let mut den = 0.0;
        for &o in o_abs {
            let c = (((t * o) + K_EPS) as i64).min(max_code) as f64 + 0.5;
            num += c * o;
            den += c * c;
        }
        num / den.sqrt()
    }

    fn random_unit_abs(dim: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let v = generate_gaussian_vector(dim, &mut rng);
        let norm = v.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
        v.iter().map(|x| (*x as f64).abs() / norm).collect()
    }

    #[test]
    fn test_best_rescale_factor_beats_grid() {
        let o_abs = random_unit_abs(128, 5);
        for ex_bits in 1..=6 {
            let t = best_rescale_factor(&o_abs, ex_bits);
            let best = cosine_at(&o_abs, t, ex_bits);
            let max_o = o_abs.iter().copied().fold(0.0, f64::max);
            let t_end = ((1 << ex_bits) - 1 + K_N_ENUM) as f64 / max_o;
            let t_start = t_end * K_TIGHT_START[ex_bits];
            for step in 0..200 {
                let t_grid = t_start + (t_end - t_start) * step as f64 / 200.0;
                assert!(
                    cosine_at(&o_abs, t_grid, ex_bits) <= best + 1e-9,
                    "ex_bits {} grid point {} beats the search",
                    ex_bits,
                    t_grid
                );
            }
            assert!(best > 0.8);
        }
    }

    #[test]
    fn test_faster_config() {
        let config = RabitqConfig::faster_config(128, 5).expect("Failed to create config");
        let t = config.t_const.expect("Faster config should fix the rescale factor");
        assert!(t > 0.0);
        assert_eq!(config, RabitqConfig::faster_config(128, 5).expect("Failed to create config"));
        assert_eq!(RabitqConfig::faster_config(128, 1).expect("Failed to create config").t_const, None);
        assert!(RabitqConfig::faster_config(0, 5).is_err());
        assert!(RabitqConfig::faster_config(128, 10).is_err());
    }

    #[test]
    fn test_ex_bits_of() {
        assert_eq!(ex_bits_of(1).expect("valid"), 0);
        assert_eq!(ex_bits_of(9).expect("valid"), 8);
        assert!(ex_bits_of(0).is_err());
        assert!(ex_bits_of(10).is_err());
    }
}
