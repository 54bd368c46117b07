use serde::{Deserialize, Serialize};
use strum::EnumIter;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, EnumIter)]
pub enum MetricType {
    #[default]
    L2,
    /// Maximum inner product. Reported distances are `-<o, q>`.
    InnerProduct,
}

impl TryFrom<u32> for MetricType {
    type Error = anyhow::Error;

    fn try_from(value: u32) -> anyhow::Result<Self> {
        match value {
            0 => Ok(MetricType::L2),
            1 => Ok(MetricType::InnerProduct),
            _ => Err(anyhow::anyhow!("unknown metric type {}", value)),
        }
    }
}

impl From<MetricType> for u32 {
    fn from(value: MetricType) -> Self {
        match value {
            MetricType::L2 => 0,
            MetricType::InnerProduct => 1,
        }
    }
}

/// How the candidates of a probed cluster are scored.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, EnumIter)]
pub enum ScanMode {
    /// Batches of 32 packed codes through lookup-table accumulation.
    #[default]
    FastScan,
    /// One code at a time against a bit-sliced query.
    Single,
}
