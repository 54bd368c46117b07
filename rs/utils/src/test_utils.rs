use std::collections::HashSet;

use ndarray_rand::rand_distr::{Distribution, Normal, StandardNormal};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::distance::dot_product::DotProductDistanceCalculator;

// Generate a random vector with a given dimension
pub fn generate_random_vector(dimension: usize) -> Vec<f32> {
    let mut rng = rand::thread_rng();
    let mut vector = vec![];
    for _ in 0..dimension {
        vector.push(rng.gen::<f32>());
    }
    vector
}

/// Vector with i.i.d. standard normal entries.
pub fn generate_gaussian_vector<R: Rng>(dimension: usize, rng: &mut R) -> Vec<f32> {
    (0..dimension)
        .map(|_| {
            let x: f32 = StandardNormal.sample(&mut *rng);
            x
        })
        .collect()
}

pub fn normalize(vector: &mut [f32]) {
    let norm = DotProductDistanceCalculator::norm(vector);
    if norm > 0.0 {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Clustered dataset: centroids drawn from N(0, 2^2), every point is a centroid plus N(0, 0.3^2)
/// noise, and points, centroids and queries are all unit length. `cluster_ids[i]` is the
/// centroid point `i` was generated from.
pub struct SyntheticDataset {
    pub dimension: usize,
    pub num_points: usize,
    pub num_clusters: usize,
    pub data: Vec<f32>,
    pub centroids: Vec<f32>,
    pub cluster_ids: Vec<u32>,
    pub queries: Vec<f32>,
}

impl SyntheticDataset {
    pub fn random(num_points: usize, dimension: usize, num_clusters: usize, seed: u64) -> Self {
        let num_queries = std::cmp::max(1, num_points / 10);
        Self::random_with_queries(num_points, dimension, num_clusters, num_queries, seed)
    }

    pub fn random_with_queries(
        num_points: usize,
        dimension: usize,
        num_clusters: usize,
        num_queries: usize,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let num_clusters = num_clusters.max(1);

        let mut centroids = Vec::with_capacity(num_clusters * dimension);
        for _ in 0..num_clusters * dimension {
            let x: f32 = StandardNormal.sample(&mut rng);
            centroids.push(x * 2.0);
        }

        let noise = Normal::new(0.0f32, 0.3f32).expect("Failed to create normal distribution");
        let mut data = Vec::with_capacity(num_points * dimension);
        let mut cluster_ids = Vec::with_capacity(num_points);
        for _ in 0..num_points {
            let cluster_id = rng.gen_range(0..num_clusters);
            cluster_ids.push(cluster_id as u32);
            let centroid = &centroids[cluster_id * dimension..(cluster_id + 1) * dimension];
            let mut point: Vec<f32> = centroid.iter().map(|c| c + noise.sample(&mut rng)).collect();
            normalize(&mut point);
            data.extend_from_slice(&point);
        }

        centroids
            .chunks_exact_mut(dimension)
            .for_each(|centroid| normalize(centroid));

        let mut queries = Vec::with_capacity(num_queries * dimension);
        for _ in 0..num_queries {
            let mut query = generate_gaussian_vector(dimension, &mut rng);
            normalize(&mut query);
            queries.extend_from_slice(&query);
        }

        Self {
            dimension,
            num_points,
            num_clusters,
            data,
            centroids,
            cluster_ids,
            queries,
        }
    }

    pub fn num_queries(&self) -> usize {
        self.queries.len() / self.dimension
    }

    pub fn point(&self, i: usize) -> &[f32] {
        &self.data[i * self.dimension..(i + 1) * self.dimension]
    }

    pub fn query(&self, i: usize) -> &[f32] {
        &self.queries[i * self.dimension..(i + 1) * self.dimension]
    }

    /// Exact top-k ids of every query. `distance` is minimized.
    pub fn ground_truth<F>(&self, k: usize, distance: F) -> Vec<Vec<u32>>
    where
        F: Fn(&[f32], &[f32]) -> f32 + Sync,
    {
        (0..self.num_queries())
            .into_par_iter()
            .map(|i| brute_force_top_k(&self.data, self.dimension, self.query(i), k, &distance))
            .collect()
    }
}

/// Exact top-k ids (ascending by `distance`) over a flattened dataset.
pub fn brute_force_top_k<F>(data: &[f32], dimension: usize, query: &[f32], k: usize, distance: F) -> Vec<u32>
where
    F: Fn(&[f32], &[f32]) -> f32,
{
    let mut scored: Vec<(f32, u32)> = data
        .chunks_exact(dimension)
        .enumerate()
        .map(|(i, point)| (distance(point, query), i as u32))
        .collect();
    let k = k.min(scored.len());
    if k == 0 {
        return vec![];
    }
    scored.select_nth_unstable_by(k - 1, |a, b| a.0.total_cmp(&b.0));
    scored.truncate(k);
    scored.sort_by(|a, b| a.0.total_cmp(&b.0));
    scored.into_iter().map(|(_, id)| id).collect()
}

/// Mean over queries of |found ∩ truth| / |truth|.
pub fn recall(found: &[Vec<u32>], truth: &[Vec<u32>]) -> f32 {
    if truth.is_empty() {
        return 0.0;
    }
    let total: f32 = found
        .iter()
        .zip(truth.iter())
        .map(|(found, truth)| {
            if truth.is_empty() {
                return 0.0;
            }
            let truth: HashSet<&u32> = truth.iter().collect();
            let hits = found.iter().filter(|id| truth.contains(id)).count();
            hits as f32 / truth.len() as f32
        })
        .sum();
    total / truth.len() as f32
}
