//! Query-side descriptors turning code/query inner products into distance estimates.
//!
//! For a code of `o` in a cluster with centroid `c` and a rotated query `q`:
//!
//! * `set_g_add(norm, ip)` takes `norm = |q - c|` and `ip = <q, c>`;
//! * the binary estimate is `f_add + g_add + f_rescale * (<bin, q> - 0.5 Σq)`, with lower bound
//!   `est - f_error * g_error - |f_rescale| * e`, `e` bounding the rounding error of `<bin, q>`;
//! * boosting replaces `<bin - 0.5, q>` by `<u - cb, q>` for the full `ex_bits + 1` bit code `u`.
//!
//! With `MetricType::InnerProduct` the estimated quantity is `-<o, q>`, so smaller is better for
//! both metrics.

pub mod batch;
pub mod ip_func;
pub mod single;

use config::enums::MetricType;

use crate::rabitq::code::ExCodeRef;

pub use batch::{split_batch_estdist, BatchEstimate, BatchFactors, SplitBatchQuery};
pub use ip_func::{select_excode_ipfunc, ExIpFunc};
pub use single::{split_single_estdist, split_single_fulldist, SingleEstimate, SplitSingleQuery};

/// Query terms shared by the batch and single descriptors.
pub trait EstimatorQuery {
    fn rotated_query(&self) -> &[f32];

    fn g_add(&self) -> f32;

    fn g_error(&self) -> f32;

    /// `-(2^ex_bits - 0.5) * Σq`.
    fn kbx_sum_q(&self) -> f32;
}

pub(crate) fn g_terms(metric: MetricType, norm: f32, ip: f32) -> (f32, f32) {
    match metric {
        MetricType::L2 => (norm * norm, norm),
        MetricType::InnerProduct => (-ip, norm),
    }
}

pub(crate) fn sum_terms(rotated_query: &[f32], ex_bits: usize) -> (f32, f32) {
    let sum_q: f32 = rotated_query.iter().sum();
    let k1x_sum_q = -0.5 * sum_q;
    let kbx_sum_q = -(((1u32 << ex_bits) as f32) - 0.5) * sum_q;
    (k1x_sum_q, kbx_sum_q)
}

/// Refines the estimate of one candidate with its extended bits. `ip_x0_qr` is the candidate's
/// `<bin, q>` as produced by the binary estimate.
pub fn split_distance_boosting<Q: EstimatorQuery>(
    ex: ExCodeRef,
    ip_func: ExIpFunc,
    query: &Q,
    padded_dim: usize,
    ex_bits: usize,
    ip_x0_qr: f32,
) -> f32 {
    debug_assert_eq!(ip_func.ex_bits(), ex_bits);
    let ex_dot = ip_func.ip(query.rotated_query(), ex.data, padded_dim);
    ex.f_add_ex
        + query.g_add()
        + ex.f_rescale_ex * ((1u32 << ex_bits) as f32 * ip_x0_qr + ex_dot + query.kbx_sum_q())
}
