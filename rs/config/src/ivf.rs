use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::enums::MetricType;

pub const MAX_TOTAL_BITS: usize = 9;
pub const DEFAULT_ROTATOR_SEED: u64 = 0x5EED;

fn default_seed() -> u64 {
    DEFAULT_ROTATOR_SEED
}

/// Build-time parameters of an IVF + RaBitQ index. Persisted as YAML next to the index file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IvfRabitqConfig {
    pub num_features: usize,
    pub num_clusters: usize,
    /// 1 sign bit plus `total_bits - 1` extended bits per dimension.
    pub total_bits: usize,
    #[serde(default)]
    pub faster_quant: bool,
    #[serde(default)]
    pub metric: MetricType,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl IvfRabitqConfig {
    pub fn new(num_features: usize, num_clusters: usize, total_bits: usize) -> Self {
        Self {
            num_features,
            num_clusters,
            total_bits,
            faster_quant: false,
            metric: MetricType::L2,
            seed: DEFAULT_ROTATOR_SEED,
        }
    }

    pub fn with_metric(mut self, metric: MetricType) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_faster_quant(mut self, faster_quant: bool) -> Self {
        self.faster_quant = faster_quant;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn ex_bits(&self) -> usize {
        self.total_bits.saturating_sub(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_features == 0 {
            return Err(anyhow!("num_features must be positive"));
        }
        if self.num_clusters == 0 {
            return Err(anyhow!("num_clusters must be positive"));
        }
        if self.total_bits == 0 || self.total_bits > MAX_TOTAL_BITS {
            return Err(anyhow!(
                "total_bits must be in [1, {}], got {}",
                MAX_TOTAL_BITS,
                self.total_bits
            ));
        }
        Ok(())
    }
}
