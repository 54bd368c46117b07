use anyhow::Result;
use config::ivf::IvfRabitqConfig;
use log::{debug, info};
use quantization::error::RabitqError;
use quantization::rabitq::code::SplitCode;
use quantization::rabitq::config::RabitqConfig;
use quantization::rabitq::quantize_split_single;
use quantization::rotator::Rotator;
use rayon::prelude::*;

use crate::ivf::cluster::ClusterArena;
use crate::ivf::index::IvfRabitq;

/// Builds an `IvfRabitq` from data already assigned to clusters.
///
/// Clustering itself is out of scope: callers pass the centroids and the cluster id of every
/// point. Point ids are the row numbers of `data`.
pub struct IvfRabitqBuilder {
    config: IvfRabitqConfig,
}

impl IvfRabitqBuilder {
    pub fn new(config: IvfRabitqConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| RabitqError::InvalidConfig(e.to_string()))?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &IvfRabitqConfig {
        &self.config
    }

    pub fn construct(&self, data: &[f32], centroids: &[f32], cluster_ids: &[u32]) -> Result<IvfRabitq> {
        let dim = self.config.num_features;
        let num_clusters = self.config.num_clusters;
        if data.len() % dim != 0 || data.len() / dim != cluster_ids.len() {
            return Err(RabitqError::DimensionMismatch {
                expected: cluster_ids.len() * dim,
                got: data.len(),
            }
            .into());
        }
        if centroids.len() != num_clusters * dim {
            return Err(RabitqError::DimensionMismatch {
                expected: num_clusters * dim,
                got: centroids.len(),
            }
            .into());
        }
        if let Some(&id) = cluster_ids.iter().find(|&&id| id as usize >= num_clusters) {
            return Err(RabitqError::ClusterIdOutOfRange { id, num_clusters }.into());
        }
        if cluster_ids.len() > u32::MAX as usize {
            return Err(RabitqError::InvalidConfig("too many points for u32 ids".into()).into());
        }

        let rotator = Rotator::new(dim, self.config.seed)?;
        let padded_dim = rotator.padded_dim();
        let ex_bits = self.config.ex_bits();
        let rabitq_config = if self.config.faster_quant {
            RabitqConfig::faster_config(padded_dim, self.config.total_bits)?
        } else {
            RabitqConfig::new()
        };

        let rotated_centroids = rotate_all(&rotator, centroids, dim)?;
        debug!("Rotated {} centroids", num_clusters);

        let codes: Vec<SplitCode> = data
            .par_chunks_exact(dim)
            .zip(cluster_ids.par_iter())
            .map(|(point, &cluster)| -> Result<SplitCode> {
                let rotated = rotator.rotate(point)?;
                let centroid = &rotated_centroids[cluster as usize * padded_dim..(cluster as usize + 1) * padded_dim];
                quantize_split_single(&rotated, centroid, ex_bits, &rabitq_config, self.config.metric)
            })
            .collect::<Result<_>>()?;
        debug!("Quantized {} points", codes.len());

        let mut members: Vec<Vec<(u32, SplitCode)>> = vec![vec![]; num_clusters];
        for (id, (code, &cluster)) in codes.into_iter().zip(cluster_ids.iter()).enumerate() {
            members[cluster as usize].push((id as u32, code));
        }
        let mut arena = ClusterArena::new(padded_dim, ex_bits, rotated_centroids);
        for cluster in &members {
            arena.push_cluster(cluster)?;
        }

        info!(
            "Built IVF index: {} points, {} clusters, dim {} (padded {}), {} total bits",
            cluster_ids.len(),
            num_clusters,
            dim,
            padded_dim,
            self.config.total_bits
        );
        IvfRabitq::new(self.config.clone(), rotator, rabitq_config, arena)
    }
}

fn rotate_all(rotator: &Rotator, vectors: &[f32], dim: usize) -> Result<Vec<f32>> {
    let padded_dim = rotator.padded_dim();
    let mut rotated = vec![0.0f32; vectors.len() / dim * padded_dim];
    rotated
        .par_chunks_exact_mut(padded_dim)
        .zip(vectors.par_chunks_exact(dim))
        .try_for_each(|(out, vector)| rotator.rotate_into(vector, out))?;
    Ok(rotated)
}

#[cfg(test)]
mod tests {
    use config::enums::MetricType;
    use quantization::rabitq::code::ex_code_len;
    use utils::test_utils::SyntheticDataset;

    use super::*;

    #[test]
    fn test_construct() {
        let dataset = SyntheticDataset::random(700, 100, 6, 31);
        let config = IvfRabitqConfig::new(100, 6, 3);
        let index = IvfRabitqBuilder::new(config)
            .expect("Failed to create builder")
            .construct(&dataset.data, &dataset.centroids, &dataset.cluster_ids)
            .expect("Failed to construct index");

        assert_eq!(index.num_points(), 700);
        assert_eq!(index.num_clusters(), 6);
        assert_eq!(index.padded_dim(), 128);
        assert_eq!(index.ex_bits(), 2);
        assert_eq!(index.rabitq_config().t_const, None);

        let arena = index.arena();
        for cluster in 0..6 {
            let expected: Vec<u32> = dataset
                .cluster_ids
                .iter()
                .enumerate()
                .filter(|(_, &c)| c as usize == cluster)
                .map(|(i, _)| i as u32)
                .collect();
            assert_eq!(arena.ids(cluster), expected.as_slice());
            assert_eq!(arena.cluster_len(cluster), expected.len());
            if let Some(&first) = expected.first() {
                assert_eq!(arena.ex_code(cluster, 0).data.len(), ex_code_len(128, 2));
                // Sign bits follow the rotated residual.
                let rotated = index.rotator().rotate(dataset.point(first as usize)).expect("Failed to rotate");
                let centroid = arena.centroid(cluster);
                let bin = arena.binary_code(cluster, 0);
                for d in 0..128 {
                    assert_eq!(bin.bit(d), rotated[d] > centroid[d], "dim {}", d);
                }
            }
        }
    }

    #[test]
    fn test_construct_faster_quant() {
        let dataset = SyntheticDataset::random(300, 64, 4, 32);
        let config = IvfRabitqConfig::new(64, 4, 7)
            .with_faster_quant(true)
            .with_metric(MetricType::InnerProduct);
        let index = IvfRabitqBuilder::new(config)
            .expect("Failed to create builder")
            .construct(&dataset.data, &dataset.centroids, &dataset.cluster_ids)
            .expect("Failed to construct index");
        assert!(index.rabitq_config().t_const.is_some());
        assert_eq!(index.ex_bits(), 6);
    }

    #[test]
    fn test_construct_rejects_invalid_input() {
        assert!(IvfRabitqBuilder::new(IvfRabitqConfig::new(0, 4, 3)).is_err());
        assert!(IvfRabitqBuilder::new(IvfRabitqConfig::new(64, 4, 10)).is_err());

        let dataset = SyntheticDataset::random(100, 64, 4, 33);
        let builder = IvfRabitqBuilder::new(IvfRabitqConfig::new(64, 4, 3)).expect("Failed to create builder");

        let mut cluster_ids = dataset.cluster_ids.clone();
        cluster_ids[10] = 4;
        let err = builder
            .construct(&dataset.data, &dataset.centroids, &cluster_ids)
            .expect_err("Out of range cluster id should fail");
        assert!(matches!(
            err.downcast_ref::<RabitqError>(),
            Some(RabitqError::ClusterIdOutOfRange { id: 4, num_clusters: 4 })
        ));

        assert!(builder
            .construct(&dataset.data[..dataset.data.len() - 1], &dataset.centroids, &dataset.cluster_ids)
            .is_err());
        assert!(builder
            .construct(&dataset.data, &dataset.centroids[..64], &dataset.cluster_ids)
            .is_err());
    }
}
