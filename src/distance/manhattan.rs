use super::Distance;

#[derive(Debug, Clone, Copy)]
pub enum Manhattan {}

impl Distance for Manhattan {
    fn name() -> &'static str {
        "manhattan"
    }

    fn distance(p: &[f32], q: &[f32]) -> f32 {
        p.iter().zip(q).map(|(a, b)| (a - b).abs()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_hand_computed_value() {
        let d = Manhattan::distance(&[0.0, 0.0], &[3.0, 4.0]);
        assert_eq!(d, 7.0);
    }
}
