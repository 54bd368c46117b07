use crate::utils::{IdWithScore, SearchContext};

/// Main trait for index
pub trait Searchable {
    /// Search for the nearest neighbors of a query vector, probing `num_probes` clusters.
    fn search(
        &self,
        query: &[f32],
        k: usize,
        num_probes: usize,
        context: &mut SearchContext,
    ) -> Option<Vec<IdWithScore>>;
}
