use super::Distance;

/// `1 - cosine similarity`, so smaller still means "closer" like the other
/// metrics.
#[derive(Debug, Clone, Copy)]
pub enum Cosine {}

impl Distance for Cosine {
    fn name() -> &'static str {
        "cosine"
    }

    fn distance(p: &[f32], q: &[f32]) -> f32 {
        let dot: f32 = p.iter().zip(q).map(|(a, b)| a * b).sum();
        let norm_p: f32 = p.iter().map(|a| a * a).sum::<f32>().sqrt();
        let norm_q: f32 = q.iter().map(|a| a * a).sum::<f32>().sqrt();
        if norm_p == 0.0 || norm_q == 0.0 {
            return 1.0;
        }
        1.0 - dot / (norm_p * norm_q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_direction_has_zero_distance() {
        let d = Cosine::distance(&[1.0, 0.0], &[2.0, 0.0]);
        assert!(d.abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_have_unit_distance() {
        let d = Cosine::distance(&[1.0, 0.0], &[0.0, 1.0]);
        assert!((d - 1.0).abs() < 1e-6);
    }
}
