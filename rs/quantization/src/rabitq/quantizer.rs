use anyhow::Result;
use config::enums::MetricType;

use crate::error::RabitqError;
use crate::rabitq::code::{pack_binary_code, pack_ex_code, BinaryCode, ExCode, FullCode, SplitCode};
use crate::rabitq::config::{RabitqConfig, K_EPS, MAX_EX_BITS};

/// Per-vector terms of the distance estimator
/// `dist ≈ f_add + g_add + f_rescale * <xu_cb, q>`, with error bound `f_error * g_error`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Factors {
    pub f_add: f32,
    pub f_rescale: f32,
    pub f_error: f32,
}

/// Quantizes a rotated vector relative to the origin with `total_bits` bits per dimension.
pub fn quantize_full_single(
    data: &[f32],
    total_bits: usize,
    config: &RabitqConfig,
    metric: MetricType,
) -> Result<FullCode> {
    if data.is_empty() {
        return Err(RabitqError::InvalidConfig("cannot quantize an empty vector".into()).into());
    }
    if total_bits == 0 || total_bits > 8 {
        return Err(RabitqError::InvalidConfig(format!(
            "full codes hold 1 to 8 bits per dimension, got {}",
            total_bits
        ))
        .into());
    }
    let ex_bits = total_bits - 1;
    let code = total_code(data, ex_bits, config);
    let cb = centered_offset(total_bits);
    let xu_cb: Vec<f32> = code.iter().map(|&u| u as f32 - cb).collect();
    let factors = compute_factors(data, None, &xu_cb, metric, config.eps0);

    let ip_resi: f64 = dot_f64(data, &xu_cb);
    let xu_sqr: f64 = dot_f64(&xu_cb, &xu_cb);
    let delta = if xu_sqr > 0.0 { (ip_resi / xu_sqr) as f32 } else { 0.0 };

    Ok(FullCode {
        code: code.iter().map(|&u| u as u8).collect(),
        f_add: factors.f_add,
        f_rescale: factors.f_rescale,
        f_error: factors.f_error,
        delta,
        vl: -delta * cb,
    })
}

/// Quantizes `data - centroid` into a sign code plus `ex_bits` extended bits per dimension.
/// `data` must already be rotated and padded (length a multiple of 64).
pub fn quantize_split_single(
    data: &[f32],
    centroid: &[f32],
    ex_bits: usize,
    config: &RabitqConfig,
    metric: MetricType,
) -> Result<SplitCode> {
    let padded_dim = data.len();
    if padded_dim == 0 || padded_dim % 64 != 0 {
        return Err(RabitqError::InvalidConfig(format!(
            "padded dimension must be a positive multiple of 64, got {}",
            padded_dim
        ))
        .into());
    }
    if centroid.len() != padded_dim {
        return Err(RabitqError::DimensionMismatch {
            expected: padded_dim,
            got: centroid.len(),
        }
        .into());
    }
    if ex_bits > MAX_EX_BITS {
        return Err(RabitqError::InvalidConfig(format!(
            "ex_bits must be at most {}, got {}",
            MAX_EX_BITS, ex_bits
        ))
        .into());
    }

    let residual: Vec<f32> = data.iter().zip(centroid.iter()).map(|(x, c)| x - c).collect();
    let code = total_code(&residual, ex_bits, config);

    let bits: Vec<bool> = code.iter().map(|&u| (u >> ex_bits) & 1 == 1).collect();
    let xu_bin: Vec<f32> = bits.iter().map(|&b| if b { 0.5 } else { -0.5 }).collect();
    let bin_factors = compute_factors(&residual, Some(centroid), &xu_bin, metric, config.eps0);

    let cb = centered_offset(ex_bits + 1);
    let xu_total: Vec<f32> = code.iter().map(|&u| u as f32 - cb).collect();
    let ex_factors = compute_factors(&residual, Some(centroid), &xu_total, metric, config.eps0);
    let mask = ((1u32 << ex_bits) - 1) as u16;
    let ex_values: Vec<u16> = code.iter().map(|&u| u & mask).collect();

    Ok(SplitCode {
        bin: BinaryCode {
            words: pack_binary_code(bits, padded_dim),
            f_add: bin_factors.f_add,
            f_rescale: bin_factors.f_rescale,
            f_error: bin_factors.f_error,
        },
        ex: ExCode {
            data: pack_ex_code(&ex_values, ex_bits),
            f_add_ex: ex_factors.f_add,
            f_rescale_ex: ex_factors.f_rescale,
        },
    })
}

pub fn reconstruct_vec(code: &[u8], delta: f32, vl: f32) -> Vec<f32> {
    code.iter().map(|&c| delta * c as f32 + vl).collect()
}

/// `(2^total_bits - 1) / 2`, the offset that centers level codes around zero.
pub fn centered_offset(total_bits: usize) -> f32 {
    ((1u32 << total_bits) - 1) as f32 / 2.0
}

/// Level `u_i` in `[0, 2^(ex_bits+1))` of every dimension. The top bit is the sign of the residual;
/// the low `ex_bits` bits grow with `|r_i|` for positive dimensions and shrink for negative ones,
/// so `u_i - centered_offset` is symmetric around zero.
fn total_code(residual: &[f32], ex_bits: usize, config: &RabitqConfig) -> Vec<u16> {
    if ex_bits == 0 {
        return residual.iter().map(|&r| (r > 0.0) as u16).collect();
    }
    let mask = ((1u32 << ex_bits) - 1) as u16;
    let norm = residual
        .iter()
        .map(|&r| (r as f64) * (r as f64))
        .sum::<f64>()
        .sqrt();
    let o_abs: Vec<f64> = if norm > 0.0 {
        residual.iter().map(|&r| (r as f64).abs() / norm).collect()
    } else {
        vec![0.0; residual.len()]
    };
    let t = config.rescale_factor(&o_abs, ex_bits);

    residual
        .iter()
        .zip(o_abs.iter())
        .map(|(&r, &o)| {
            let cur = (((t * o) + K_EPS) as i64).clamp(0, mask as i64) as u16;
            if r > 0.0 {
                (1u16 << ex_bits) | cur
            } else {
                !cur & mask
            }
        })
        .collect()
}

fn dot_f64(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b.iter()).map(|(&x, &y)| x as f64 * y as f64).sum()
}

/// Factors for the code `xu_cb` (already centered) of `residual = o - c`.
///
/// With `ip_resi = <r, xu_cb>`, `ip_cent = <c, xu_cb>` and `l2_sqr = |r|^2`, the estimator of
/// `<r, q - c>` is `l2_sqr / ip_resi * (<xu_cb, q> - ip_cent)`; its error is bounded by
/// `|r| |q - c| eps0 sqrt((1/cos^2 - 1) / (D - 1))` where `cos` is the cosine between `r` and
/// `xu_cb`.
pub(crate) fn compute_factors(
    residual: &[f32],
    centroid: Option<&[f32]>,
    xu_cb: &[f32],
    metric: MetricType,
    eps0: f32,
) -> Factors {
    let dim = residual.len();
    let l2_sqr = dot_f64(residual, residual);
    let ip_resi = dot_f64(residual, xu_cb);
    let (ip_cent, ip_resi_cent) = match centroid {
        Some(c) => (dot_f64(c, xu_cb), dot_f64(residual, c)),
        None => (0.0, 0.0),
    };
    let xu_sqr = dot_f64(xu_cb, xu_cb);

    if l2_sqr == 0.0 || ip_resi == 0.0 {
        // The point sits on the centroid, `g_add` alone is the exact distance.
        return Factors {
            f_add: 0.0,
            f_rescale: 0.0,
            f_error: 0.0,
        };
    }

    let tmp = (l2_sqr * xu_sqr / (ip_resi * ip_resi) - 1.0).max(0.0);
    let error = l2_sqr.sqrt() * eps0 as f64 * (tmp / (dim.max(2) - 1) as f64).sqrt();

    let (f_add, f_rescale, f_error) = match metric {
        MetricType::L2 => (
            l2_sqr + 2.0 * l2_sqr * ip_cent / ip_resi,
            -2.0 * l2_sqr / ip_resi,
            2.0 * error,
        ),
        MetricType::InnerProduct => (
            -ip_resi_cent + l2_sqr * ip_cent / ip_resi,
            -l2_sqr / ip_resi,
            error,
        ),
    };
    Factors {
        f_add: f_add as f32,
        f_rescale: f_rescale as f32,
        f_error: f_error as f32,
    }
}
