use std::cmp::Ordering;

use ordered_float::OrderedFloat;

/// A point id with its estimated distance. Ordered by score, then id, so a `BinaryHeap` of these
/// is a max-heap on distance.
#[derive(Debug, Clone, Copy)]
pub struct IdWithScore {
    pub score: f32,
    pub id: u32,
}

impl PartialEq for IdWithScore {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IdWithScore {}

impl PartialOrd for IdWithScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IdWithScore {
    fn cmp(&self, other: &Self) -> Ordering {
        OrderedFloat(self.score)
            .cmp(&OrderedFloat(other.score))
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Per-query scan statistics.
#[derive(Debug, Default, Clone)]
pub struct SearchContext {
    pub num_clusters_probed: usize,
    pub num_candidates_scanned: usize,
    /// Candidates whose lower bound already exceeded the current k-th distance.
    pub num_candidates_pruned: usize,
    pub num_candidates_boosted: usize,
}

impl SearchContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pruning_ratio(&self) -> f32 {
        if self.num_candidates_scanned == 0 {
            return 0.0;
        }
        self.num_candidates_pruned as f32 / self.num_candidates_scanned as f32
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BinaryHeap;

    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn test_id_with_score_ordering() {
        let mut heap = BinaryHeap::new();
        heap.push(IdWithScore { score: 0.5, id: 1 });
        heap.push(IdWithScore { score: 2.0, id: 2 });
        heap.push(IdWithScore { score: -1.0, id: 3 });
        assert_eq!(heap.peek().map(|x| x.id), Some(2));

        let mut sorted = heap.into_vec();
        sorted.sort();
        assert_eq!(sorted.iter().map(|x| x.id).collect::<Vec<_>>(), vec![3, 1, 2]);
    }

    #[test]
    fn test_pruning_ratio() {
        let mut context = SearchContext::new();
        assert_eq!(context.pruning_ratio(), 0.0);
        context.num_candidates_scanned = 10;
        context.num_candidates_pruned = 4;
        assert_abs_diff_eq!(context.pruning_ratio(), 0.4, epsilon = 1e-6);
    }
}
