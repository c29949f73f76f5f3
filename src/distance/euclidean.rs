use super::Distance;

/// Default ranking metric: sum of squared per-dimension differences. Not
/// square-rooted, matching the teacher crate's non-normalized `built_distance`
/// and the source's own squared-Euclidean scoring.
#[derive(Debug, Clone, Copy)]
pub enum SquaredEuclidean {}

impl Distance for SquaredEuclidean {
    fn name() -> &'static str {
        "squared-euclidean"
    }

    fn distance(p: &[f32], q: &[f32]) -> f32 {
        p.iter().zip(q).map(|(a, b)| (a - b) * (a - b)).sum()
    }
}
