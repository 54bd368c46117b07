use std::collections::BinaryHeap;

use anyhow::Result;
use config::enums::{MetricType, ScanMode};
use config::ivf::IvfRabitqConfig;
use config::search_params::SearchParams;
use log::{debug, warn};
use quantization::error::RabitqError;
use quantization::estimator::{
    select_excode_ipfunc, split_batch_estdist, split_distance_boosting, split_single_estdist, ExIpFunc,
    SplitBatchQuery, SplitSingleQuery,
};
use quantization::fastscan::BATCH_SIZE;
use quantization::rabitq::config::RabitqConfig;
use quantization::rotator::Rotator;
use rayon::prelude::*;
use utils::distance::dot_product::DotProductDistanceCalculator;
use utils::distance::l2::L2DistanceCalculator;
use utils::{CalculateSquared, DistanceCalculator};

use crate::index::Searchable;
use crate::ivf::cluster::ClusterArena;
use crate::utils::{IdWithScore, SearchContext};

/// IVF index over RaBitQ split codes. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct IvfRabitq {
    config: IvfRabitqConfig,
    rotator: Rotator,
    rabitq_config: RabitqConfig,
    arena: ClusterArena,
    ip_func: ExIpFunc,
}

/// Bounded max-heap keeping the `k` smallest estimated distances.
struct TopK {
    k: usize,
    heap: BinaryHeap<IdWithScore>,
}

impl TopK {
    fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    /// Distance a candidate must beat to enter the result.
    fn threshold(&self) -> f32 {
        if self.heap.len() < self.k {
            return f32::INFINITY;
        }
        self.heap.peek().map_or(f32::INFINITY, |worst| worst.score)
    }

    fn push(&mut self, candidate: IdWithScore) {
        if self.heap.len() < self.k {
            self.heap.push(candidate);
        } else if let Some(max) = self.heap.peek() {
            if candidate < *max {
                self.heap.pop();
                self.heap.push(candidate);
            }
        }
    }

    fn into_sorted_vec(self) -> Vec<IdWithScore> {
        self.heap.into_sorted_vec()
    }
}

impl IvfRabitq {
    pub(crate) fn new(
        config: IvfRabitqConfig,
        rotator: Rotator,
        rabitq_config: RabitqConfig,
        arena: ClusterArena,
    ) -> Result<Self> {
        if rotator.dim() != config.num_features || rotator.padded_dim() != arena.padded_dim() {
            return Err(RabitqError::DimensionMismatch {
                expected: config.num_features,
                got: rotator.dim(),
            }
            .into());
        }
        if arena.num_clusters() != config.num_clusters || arena.ex_bits() != config.ex_bits() {
            return Err(RabitqError::InvalidConfig(format!(
                "index holds {} clusters with {} extended bits, config expects {} and {}",
                arena.num_clusters(),
                arena.ex_bits(),
                config.num_clusters,
                config.ex_bits()
            ))
            .into());
        }
        let ip_func = select_excode_ipfunc(config.ex_bits())?;
        Ok(Self {
            config,
            rotator,
            rabitq_config,
            arena,
            ip_func,
        })
    }

    pub fn config(&self) -> &IvfRabitqConfig {
        &self.config
    }

    pub fn rotator(&self) -> &Rotator {
        &self.rotator
    }

    pub fn rabitq_config(&self) -> &RabitqConfig {
        &self.rabitq_config
    }

    pub fn arena(&self) -> &ClusterArena {
        &self.arena
    }

    pub fn num_clusters(&self) -> usize {
        self.arena.num_clusters()
    }

    pub fn num_points(&self) -> usize {
        self.arena.num_points()
    }

    pub fn padded_dim(&self) -> usize {
        self.arena.padded_dim()
    }

    pub fn ex_bits(&self) -> usize {
        self.arena.ex_bits()
    }

    /// FastScan search. Results are sorted by ascending estimated distance.
    pub fn search(&self, query: &[f32], k: usize, n_probe: usize, use_hacc: bool) -> Result<Vec<IdWithScore>> {
        let params = SearchParams::new(k, n_probe).with_hacc(use_hacc);
        self.search_with_params(query, &params, &mut SearchContext::new())
    }

    pub fn search_with_params(
        &self,
        query: &[f32],
        params: &SearchParams,
        context: &mut SearchContext,
    ) -> Result<Vec<IdWithScore>> {
        if query.len() != self.config.num_features {
            return Err(RabitqError::DimensionMismatch {
                expected: self.config.num_features,
                got: query.len(),
            }
            .into());
        }
        if params.top_k == 0 || params.num_probes == 0 {
            return Ok(vec![]);
        }

        let rotated = self.rotator.rotate(query)?;
        let probes = self.nearest_clusters(&rotated, params.num_probes);
        let mut top_k = TopK::new(params.top_k);
        match params.scan_mode {
            ScanMode::FastScan => {
                let mut batch_query = SplitBatchQuery::new(
                    &rotated,
                    self.padded_dim(),
                    self.ex_bits(),
                    self.config.metric,
                    params.use_hacc,
                )?;
                for &cluster in &probes {
                    let (norm, ip) = self.query_centroid_terms(&rotated, cluster);
                    batch_query.set_g_add(norm, ip);
                    self.scan_cluster_fastscan(cluster, &batch_query, params.use_hacc, &mut top_k, context)?;
                }
            }
            ScanMode::Single => {
                let mut single_query =
                    SplitSingleQuery::new(&rotated, self.padded_dim(), self.ex_bits(), self.config.metric)?;
                for &cluster in &probes {
                    let (norm, ip) = self.query_centroid_terms(&rotated, cluster);
                    single_query.set_g_add(norm, ip);
                    self.scan_cluster_single(cluster, &single_query, &mut top_k, context);
                }
            }
        }
        context.num_clusters_probed += probes.len();
        debug!(
            "Probed {} clusters, scanned {} candidates, boosted {}, pruning ratio {:.3}",
            probes.len(),
            context.num_candidates_scanned,
            context.num_candidates_boosted,
            context.pruning_ratio()
        );
        Ok(top_k.into_sorted_vec())
    }

    /// Searches every query of a flattened `num_queries * num_features` buffer in parallel.
    pub fn search_batch(&self, queries: &[f32], params: &SearchParams) -> Result<Vec<Vec<IdWithScore>>> {
        let dim = self.config.num_features;
        if queries.len() % dim != 0 {
            return Err(RabitqError::DimensionMismatch {
                expected: dim,
                got: queries.len(),
            }
            .into());
        }
        queries
            .par_chunks_exact(dim)
            .map(|query| self.search_with_params(query, params, &mut SearchContext::new()))
            .collect()
    }

    /// Clusters to probe, closest first. `num_probes` is clamped to the number of clusters.
    pub fn nearest_clusters(&self, rotated_query: &[f32], num_probes: usize) -> Vec<usize> {
        let num_probes = num_probes.min(self.num_clusters());
        if num_probes == 0 {
            return vec![];
        }
        let mut distances: Vec<(usize, f32)> = (0..self.num_clusters())
            .map(|c| {
                let centroid = self.arena.centroid(c);
                let dist = match self.config.metric {
                    MetricType::L2 => L2DistanceCalculator::calculate_squared(rotated_query, centroid),
                    MetricType::InnerProduct => -DotProductDistanceCalculator::calculate(rotated_query, centroid),
                };
                (c, dist)
            })
            .collect();
        distances.select_nth_unstable_by(num_probes - 1, |a, b| a.1.total_cmp(&b.1));
        distances.truncate(num_probes);
        distances.sort_by(|a, b| a.1.total_cmp(&b.1));
        distances.into_iter().map(|(c, _)| c).collect()
    }

    /// `(|q - c|, <q, c>)` for the rotated query and centroid.
    fn query_centroid_terms(&self, rotated_query: &[f32], cluster: usize) -> (f32, f32) {
        let centroid = self.arena.centroid(cluster);
        let norm = L2DistanceCalculator::calculate_squared(rotated_query, centroid).sqrt();
        let ip = DotProductDistanceCalculator::calculate(rotated_query, centroid);
        (norm, ip)
    }

    fn scan_cluster_fastscan(
        &self,
        cluster: usize,
        query: &SplitBatchQuery,
        use_hacc: bool,
        top_k: &mut TopK,
        context: &mut SearchContext,
    ) -> Result<()> {
        let ids = self.arena.ids(cluster);
        let padded_dim = self.padded_dim();
        let ex_bits = self.ex_bits();
        for batch in 0..self.arena.num_batches(cluster) {
            let factors = self.arena.batch_factors(cluster, batch);
            let estimate = split_batch_estdist(self.arena.batch(cluster, batch), &factors, query, padded_dim, use_hacc)?;
            let start = batch * BATCH_SIZE;
            let count = BATCH_SIZE.min(ids.len() - start);
            for i in 0..count {
                context.num_candidates_scanned += 1;
                if estimate.low[i] >= top_k.threshold() {
                    context.num_candidates_pruned += 1;
                    continue;
                }
                let score = if ex_bits > 0 {
                    context.num_candidates_boosted += 1;
                    split_distance_boosting(
                        self.arena.ex_code(cluster, start + i),
                        self.ip_func,
                        query,
                        padded_dim,
                        ex_bits,
                        estimate.ip_x0_qr[i],
                    )
                } else {
                    estimate.est[i]
                };
                top_k.push(IdWithScore {
                    score,
                    id: ids[start + i],
                });
            }
        }
        Ok(())
    }

    fn scan_cluster_single(
        &self,
        cluster: usize,
        query: &SplitSingleQuery,
        top_k: &mut TopK,
        context: &mut SearchContext,
    ) {
        let padded_dim = self.padded_dim();
        let ex_bits = self.ex_bits();
        for (offset, &id) in self.arena.ids(cluster).iter().enumerate() {
            context.num_candidates_scanned += 1;
            let bin = self.arena.binary_code(cluster, offset);
            let estimate = split_single_estdist(bin.as_ref(), query, padded_dim);
            if estimate.low >= top_k.threshold() {
                context.num_candidates_pruned += 1;
                continue;
            }
            let score = if ex_bits > 0 {
                context.num_candidates_boosted += 1;
                split_distance_boosting(
                    self.arena.ex_code(cluster, offset),
                    self.ip_func,
                    query,
                    padded_dim,
                    ex_bits,
                    estimate.ip_x0_qr,
                )
            } else {
                estimate.est
            };
            top_k.push(IdWithScore { score, id });
        }
    }
}

impl Searchable for IvfRabitq {
    fn search(
        &self,
        query: &[f32],
        k: usize,
        num_probes: usize,
        context: &mut SearchContext,
    ) -> Option<Vec<IdWithScore>> {
        match self.search_with_params(query, &SearchParams::new(k, num_probes), context) {
            Ok(results) => Some(results),
            Err(e) => {
                warn!("Search failed: {:#}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;
    use utils::test_utils::{recall, SyntheticDataset};

    use super::*;
    use crate::ivf::builder::IvfRabitqBuilder;

    fn exact_distance(metric: MetricType) -> impl Fn(&[f32], &[f32]) -> f32 + Sync {
        move |a, b| match metric {
            MetricType::L2 => L2DistanceCalculator::calculate_squared(a, b),
            MetricType::InnerProduct => -DotProductDistanceCalculator::calculate(a, b),
        }
    }

    fn build(dataset: &SyntheticDataset, total_bits: usize, metric: MetricType) -> IvfRabitq {
        let config = IvfRabitqConfig::new(dataset.dimension, dataset.num_clusters, total_bits).with_metric(metric);
        IvfRabitqBuilder::new(config)
            .expect("Failed to create builder")
            .construct(&dataset.data, &dataset.centroids, &dataset.cluster_ids)
            .expect("Failed to construct index")
    }

    fn ids(results: &[IdWithScore]) -> Vec<u32> {
        results.iter().map(|r| r.id).collect()
    }

    #[test]
    fn test_recall_fastscan() {
        let _ = env_logger::try_init();
        let dataset = SyntheticDataset::random_with_queries(5000, 128, 128, 20, 42);
        let truth = dataset.ground_truth(100, exact_distance(MetricType::L2));
        for total_bits in 2..=9 {
            let index = build(&dataset, total_bits, MetricType::L2);
            for use_hacc in [true, false] {
                let found: Vec<Vec<u32>> = (0..dataset.num_queries())
                    .map(|i| {
                        ids(&index
                            .search(dataset.query(i), 100, 64, use_hacc)
                            .expect("Failed to search"))
                    })
                    .collect();
                let r = recall(&found, &truth);
                assert!(r > 0.9, "total_bits {} hacc {}: recall {}", total_bits, use_hacc, r);
            }
        }
    }

    #[test]
    fn test_recall_single_and_inner_product() {
        let dataset = SyntheticDataset::random_with_queries(2000, 128, 32, 10, 43);
        for metric in MetricType::iter() {
            let truth = dataset.ground_truth(50, exact_distance(metric));
            let index = build(&dataset, 5, metric);
            for scan_mode in ScanMode::iter() {
                let params = SearchParams::new(50, 32).with_scan_mode(scan_mode);
                let found: Vec<Vec<u32>> = index
                    .search_batch(&dataset.queries, &params)
                    .expect("Failed to search")
                    .iter()
                    .map(|r| ids(r))
                    .collect();
                let r = recall(&found, &truth);
                assert!(r > 0.9, "{:?} {:?}: recall {}", metric, scan_mode, r);
            }
        }
    }

    #[test]
    fn test_results_sorted_and_bounded() {
        let dataset = SyntheticDataset::random(500, 64, 8, 44);
        let index = build(&dataset, 3, MetricType::L2);
        let mut context = SearchContext::new();
        let results = index
            .search_with_params(dataset.query(0), &SearchParams::new(10, 100), &mut context)
            .expect("Failed to search");
        assert_eq!(results.len(), 10);
        assert!(results.windows(2).all(|w| w[0].score <= w[1].score));
        // Probes are clamped to the number of clusters.
        assert_eq!(context.num_clusters_probed, 8);
        assert_eq!(context.num_candidates_scanned, 500);
        assert!(context.num_candidates_pruned > 0);

        let everything = index.search(dataset.query(0), 1000, 8, true).expect("Failed to search");
        assert_eq!(everything.len(), 500);
        assert!(index.search(dataset.query(0), 0, 8, true).expect("Failed to search").is_empty());
        assert!(index.search(&[0.0; 10], 10, 8, true).is_err());
    }

    #[test]
    fn test_searchable() {
        let dataset = SyntheticDataset::random(300, 64, 4, 45);
        let index = build(&dataset, 4, MetricType::L2);
        let searchable: &dyn Searchable = &index;
        let mut context = SearchContext::new();
        let results = searchable
            .search(dataset.point(7), 1, 4, &mut context)
            .expect("Search should succeed");
        assert_eq!(results[0].id, 7);
        assert!(searchable.search(&[1.0; 3], 1, 4, &mut context).is_none());
    }
}
