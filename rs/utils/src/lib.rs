pub mod distance;
pub mod io;
pub mod mem;
pub mod test_utils;

/// Distance between two float vectors of equal length.
///
/// `accumulate` returns the raw reduction (sum of squared differences for L2,
/// sum of products for inner product); `outermost_op` turns it into the value
/// reported by `calculate`.
pub trait DistanceCalculator {
    fn calculate(a: &[f32], b: &[f32]) -> f32 {
        Self::outermost_op(Self::accumulate(a, b))
    }

    fn calculate_scalar(a: &[f32], b: &[f32]) -> f32 {
        Self::outermost_op(Self::accumulate_scalar(a, b))
    }

    fn accumulate(a: &[f32], b: &[f32]) -> f32;

    fn accumulate_scalar(a: &[f32], b: &[f32]) -> f32;

    fn outermost_op(x: f32) -> f32;
}

/// Trait for calculating the squared distance between two vectors. An optimization for when the true
/// L2 distance is not needed.
pub trait CalculateSquared {
    fn calculate_squared(a: &[f32], b: &[f32]) -> f32;
}
