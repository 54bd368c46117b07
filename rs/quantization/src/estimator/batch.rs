use anyhow::Result;
use config::enums::MetricType;

use crate::error::RabitqError;
use crate::estimator::{g_terms, sum_terms, EstimatorQuery};
use crate::fastscan::{accumulate, accumulate_hacc, batch_bytes, HaccLut, Lut, BATCH_SIZE};
use crate::rabitq::config::MAX_EX_BITS;

#[derive(Debug, Clone)]
enum BatchLut {
    Baseline(Lut),
    Hacc(HaccLut),
}

/// Query descriptor for FastScan. The lookup table only depends on the rotated query, so one
/// descriptor serves every probed cluster; `set_g_add` switches it to the next cluster.
#[derive(Debug, Clone)]
pub struct SplitBatchQuery {
    rotated_query: Vec<f32>,
    padded_dim: usize,
    ex_bits: usize,
    metric: MetricType,
    lut: BatchLut,
    lut_error: f32,
    k1x_sum_q: f32,
    kbx_sum_q: f32,
    g_add: f32,
    g_error: f32,
}

impl SplitBatchQuery {
    pub fn new(
        rotated_query: &[f32],
        padded_dim: usize,
        ex_bits: usize,
        metric: MetricType,
        use_hacc: bool,
    ) -> Result<Self> {
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

        let lut = if use_hacc {
            BatchLut::Hacc(HaccLut::new(rotated_query))
        } else {
            BatchLut::Baseline(Lut::new(rotated_query))
        };
        let lut_error = match &lut {
            BatchLut::Baseline(lut) => lut.max_ip_error(),
            BatchLut::Hacc(lut) => lut.max_ip_error(),
        };
        let (k1x_sum_q, kbx_sum_q) = sum_terms(rotated_query, ex_bits);
        Ok(Self {
            rotated_query: rotated_query.to_vec(),
            padded_dim,
            ex_bits,
            metric,
            lut,
            lut_error,
            k1x_sum_q,
            kbx_sum_q,
            g_add: 0.0,
            g_error: 0.0,
        })
    }

    /// `norm` is `|q - c|` and `ip` is `<q, c>` for the centroid `c` of the cluster being scanned.
    pub fn set_g_add(&mut self, norm: f32, ip: f32) {
        let (g_add, g_error) = g_terms(self.metric, norm, ip);
        self.g_add = g_add;
        self.g_error = g_error;
    }

    pub fn use_hacc(&self) -> bool {
        matches!(self.lut, BatchLut::Hacc(_))
    }

    pub fn padded_dim(&self) -> usize {
        self.padded_dim
    }

    pub fn ex_bits(&self) -> usize {
        self.ex_bits
    }

    pub fn metric(&self) -> MetricType {
        self.metric
    }
}

impl EstimatorQuery for SplitBatchQuery {
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

/// Per-code factors of one batch, 32 entries each.
#[derive(Debug, Clone, Copy)]
pub struct BatchFactors<'a> {
    pub f_add: &'a [f32],
    pub f_rescale: &'a [f32],
    pub f_error: &'a [f32],
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchEstimate {
    pub est: [f32; BATCH_SIZE],
    pub low: [f32; BATCH_SIZE],
    pub ip_x0_qr: [f32; BATCH_SIZE],
}

pub fn split_batch_estdist(
    batch: &[u8],
    factors: &BatchFactors,
    query: &SplitBatchQuery,
    padded_dim: usize,
    use_hacc: bool,
) -> Result<BatchEstimate> {
    if use_hacc != query.use_hacc() {
        return Err(RabitqError::InvalidConfig(format!(
            "query lookup table built with use_hacc = {}",
            query.use_hacc()
        ))
        .into());
    }
    if padded_dim != query.padded_dim {
        return Err(RabitqError::DimensionMismatch {
            expected: query.padded_dim,
            got: padded_dim,
        }
        .into());
    }
    if batch.len() != batch_bytes(padded_dim) {
        return Err(RabitqError::DimensionMismatch {
            expected: batch_bytes(padded_dim),
            got: batch.len(),
        }
        .into());
    }
    for f in [factors.f_add, factors.f_rescale, factors.f_error] {
        if f.len() != BATCH_SIZE {
            return Err(RabitqError::DimensionMismatch {
                expected: BATCH_SIZE,
                got: f.len(),
            }
            .into());
        }
    }

    let mut ip_x0_qr = [0.0f32; BATCH_SIZE];
    match &query.lut {
        BatchLut::Baseline(lut) => {
            let accu = accumulate(batch, lut.table(), padded_dim);
            for (ip, &a) in ip_x0_qr.iter_mut().zip(accu.iter()) {
                *ip = lut.ip(a);
            }
        }
        BatchLut::Hacc(lut) => {
            let accu = accumulate_hacc(batch, lut.hc_lut(), padded_dim);
            for (ip, &a) in ip_x0_qr.iter_mut().zip(accu.iter()) {
                *ip = lut.ip(a);
            }
        }
    }

    let mut est = [0.0f32; BATCH_SIZE];
    let mut low = [0.0f32; BATCH_SIZE];
    for i in 0..BATCH_SIZE {
        est[i] = factors.f_add[i] + query.g_add + factors.f_rescale[i] * (ip_x0_qr[i] + query.k1x_sum_q);
        // The table rounding error on `ip_x0_qr` widens the bound.
        low[i] = est[i] - factors.f_error[i] * query.g_error - factors.f_rescale[i].abs() * query.lut_error;
    }
    Ok(BatchEstimate { est, low, ip_x0_qr })
}
