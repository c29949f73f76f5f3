//! Distance metrics used to rank a leaf's points against a query.
//!
//! Tree routing never consults this trait: it is purely the ranking rule
//! [`crate::search`] applies to the leaves Phase 1/2 collect, mirroring the
//! teacher crate's pluggable per-metric trait but with a single plain
//! `(p, q) -> f32` method instead of one that also drives split-plane
//! construction.

pub use cosine::Cosine;
pub use euclidean::SquaredEuclidean;
pub use manhattan::Manhattan;

mod cosine;
mod euclidean;
mod manhattan;

/// A pairwise distance between two equal-length vectors.
pub trait Distance: Send + Sync {
    fn name() -> &'static str
    where
        Self: Sized;

    fn distance(p: &[f32], q: &[f32]) -> f32
    where
        Self: Sized;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn squared_euclidean_of_identical_points_is_zero() {
        assert_eq!(SquaredEuclidean::distance(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]), 0.0);
    }
}
