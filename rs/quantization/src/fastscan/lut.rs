use crate::fastscan::num_codebooks;

/// Float table of one codebook: entry `v` is the sum of the query values of the dimensions
/// whose bit is set in `v`, the first dimension being the most significant bit.
fn codebook_table(query: &[f32]) -> [f32; 16] {
    debug_assert_eq!(query.len(), 4);
    let mut table = [0.0f32; 16];
    for v in 1..16usize {
        let low = v & v.wrapping_neg();
        let dim = 3 - low.trailing_zeros() as usize;
        table[v] = table[v ^ low] + query[dim];
    }
    table
}

/// Quantizes every codebook table to `[0, max_level]` with a shared step and a per-codebook
/// base value. Returns `(levels, delta, sum_vl)`; `<bin, q> ≈ delta * Σ level + sum_vl`.
fn quantize_tables(query: &[f32], max_level: f32) -> (Vec<f32>, f32, f32) {
    let tables: Vec<[f32; 16]> = query.chunks_exact(4).map(codebook_table).collect();
    let bounds: Vec<(f32, f32)> = tables
        .iter()
        .map(|t| {
            t.iter()
                .fold((f32::MAX, f32::MIN), |(lo, hi), &x| (lo.min(x), hi.max(x)))
        })
        .collect();
    let max_range = bounds.iter().map(|(lo, hi)| hi - lo).fold(0.0f32, f32::max);
    let delta = max_range / max_level;
    let sum_vl = bounds.iter().map(|(lo, _)| lo).sum();

    let mut levels = Vec::with_capacity(tables.len() * 16);
    for (table, (vl, _)) in tables.iter().zip(bounds.iter()) {
        for &x in table {
            let level = if delta > 0.0 {
                ((x - vl) / delta).round().clamp(0.0, max_level)
            } else {
                0.0
            };
            levels.push(level);
        }
    }
    (levels, delta, sum_vl)
}

/// Baseline FastScan table: 16 `u8` entries per codebook, codebooks in order, so codebook
/// pair `m` occupies bytes `32m..32m + 32` exactly as the kernel loads it.
#[derive(Debug, Clone)]
pub struct Lut {
    table: Vec<u8>,
    delta: f32,
    sum_vl: f32,
}

impl Lut {
    pub fn new(query: &[f32]) -> Self {
        debug_assert!(query.len() % 8 == 0);
        let (levels, delta, sum_vl) = quantize_tables(query, u8::MAX as f32);
        Self {
            table: levels.into_iter().map(|l| l as u8).collect(),
            delta,
            sum_vl,
        }
    }

    pub fn table(&self) -> &[u8] {
        &self.table
    }

    pub fn delta(&self) -> f32 {
        self.delta
    }

    pub fn sum_vl(&self) -> f32 {
        self.sum_vl
    }

    /// Largest gap between `ip` and the exact `<bin, q>`: half a step per codebook.
    pub fn max_ip_error(&self) -> f32 {
        0.5 * self.delta * (self.table.len() / 16) as f32
    }

    /// Approximate `<bin, q>` from an accumulator over all codebooks.
    #[inline]
    pub fn ip(&self, accu: u32) -> f32 {
        self.delta * accu as f32 + self.sum_vl
    }
}

/// High accuracy table: `u16` entries, kept both flat and split into byte tables for the kernel.
#[derive(Debug, Clone)]
pub struct HaccLut {
    table: Vec<u16>,
    hc_lut: Vec<u8>,
    delta: f32,
    sum_vl: f32,
}

impl HaccLut {
    pub fn new(query: &[f32]) -> Self {
        let padded_dim = query.len();
        debug_assert!(padded_dim % 8 == 0);
        let (levels, delta, sum_vl) = quantize_tables(query, u16::MAX as f32);
        let table: Vec<u16> = levels.into_iter().map(|l| l as u16).collect();
        let mut hc_lut = vec![0u8; table.len() * 2];
        transfer_lut_hacc(&table, padded_dim, &mut hc_lut);
        Self {
            table,
            hc_lut,
            delta,
            sum_vl,
        }
    }

    pub fn table(&self) -> &[u16] {
        &self.table
    }

    pub fn hc_lut(&self) -> &[u8] {
        &self.hc_lut
    }

    pub fn delta(&self) -> f32 {
        self.delta
    }

    pub fn sum_vl(&self) -> f32 {
        self.sum_vl
    }

    pub fn max_ip_error(&self) -> f32 {
        0.5 * self.delta * (self.table.len() / 16) as f32
    }

    #[inline]
    pub fn ip(&self, accu: i32) -> f32 {
        self.delta * accu as f32 + self.sum_vl
    }
}

/// Splits a `u16` table (16 entries per codebook) into byte tables. Codebook pair `m` becomes
/// 64 bytes: low bytes of codebook `2m`, low bytes of `2m + 1`, high bytes of `2m`, high bytes
/// of `2m + 1`.
pub fn transfer_lut_hacc(lut: &[u16], padded_dim: usize, hc_lut: &mut [u8]) {
    let codebooks = num_codebooks(padded_dim);
    assert_eq!(lut.len(), codebooks * 16);
    assert_eq!(hc_lut.len(), codebooks * 32);

    for (pair, out) in lut.chunks_exact(32).zip(hc_lut.chunks_exact_mut(64)) {
        for (i, &entry) in pair.iter().enumerate() {
            out[i] = (entry & 0xFF) as u8;
            out[32 + i] = (entry >> 8) as u8;
        }
    }
}
