//! Random Fourier Features followed by a truncated, single-component SVD.
//!
//! This is the small numerical kernel every internal node runs once on its
//! `best_segment_dimensions` slice of the data to learn the scalar
//! projection it routes queries with.

use std::f32::consts::PI;

use nalgebra::DMatrix;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Fixed RBF scale used throughout (the source hardcodes `gamma = 1.0`).
const GAMMA: f32 = 1.0;

/// The learned pieces a node needs to project new points: the RFF weights,
/// the RFF bias, the RFF-transformed training data, the projected scalars,
/// and the first principal component.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub w: DMatrix<f32>,
    pub b: DMatrix<f32>,
    pub z: DMatrix<f32>,
    pub projected_data: DMatrix<f32>,
    pub components: DMatrix<f32>,
}

fn make_rng(seed: Option<u64>, node_counter: u64) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed ^ node_counter),
        None => StdRng::from_entropy(),
    }
}

/// Box-Muller standard normal sample, keeping this kernel within the
/// crate's existing dependency set instead of pulling in `rand_distr`.
fn standard_normal(rng: &mut StdRng) -> f32 {
    let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
    let u2: f32 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// Draws `W` (D' x F) from N(0, 2*gamma) and `b` (1 x F) from Uniform(0, 2pi).
fn draw_rff_parameters(rows: usize, cols: usize, rng: &mut StdRng) -> (DMatrix<f32>, DMatrix<f32>) {
    let scale = (2.0 * GAMMA).sqrt();
    let w = DMatrix::from_fn(rows, cols, |_, _| standard_normal(rng) * scale);

    let uniform = Uniform::new(0.0f32, 2.0 * PI);
    let b = DMatrix::from_fn(1, cols, |_, _| uniform.sample(rng));

    (w, b)
}

fn cosine_feature_map(data: &DMatrix<f32>, w: &DMatrix<f32>, b: &DMatrix<f32>) -> DMatrix<f32> {
    let n = data.nrows();
    let f = w.ncols();
    let scale = (2.0 / f as f32).sqrt();
    let raw = data * w;
    DMatrix::from_fn(n, f, |i, j| scale * (raw[(i, j)] + b[(0, j)]).cos())
}

/// Fits RFF (`n_features = 2 * data.ncols()`) and a single-component SVD on
/// `data` (n x D'). `seed`/`node_counter` control reproducibility (§9 open
/// question 4 in the spec): pass `None` for non-deterministic builds.
pub fn fit(data: &DMatrix<f32>, seed: Option<u64>, node_counter: u64) -> Projection {
    let n_features = data.ncols() * 2;
    let mut rng = make_rng(seed, node_counter);
    let (w, b) = draw_rff_parameters(data.ncols(), n_features, &mut rng);
    let z = cosine_feature_map(data, &w, &b);

    let svd = z.clone().svd(true, true);
    let u = svd.u.expect("svd computed with compute_u = true");
    let v_t = svd.v_t.expect("svd computed with compute_v = true");
    let singular_values = svd.singular_values;

    let components = v_t.rows(0, 1).into_owned();
    let projected_data = u.columns(0, 1).into_owned() * singular_values[0];

    Projection { w, b, z, projected_data, components }
}

/// Projects a single new point `x` (1 x D') onto an already-fitted kernel.
pub fn project(x: &DMatrix<f32>, w: &DMatrix<f32>, b: &DMatrix<f32>, components: &DMatrix<f32>) -> f32 {
    let z = cosine_feature_map(x, w, b);
    (z * components.transpose())[(0, 0)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_produces_expected_shapes() {
        let data = DMatrix::from_row_slice(4, 2, &[0.0, 0.0, 1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
        let projection = fit(&data, Some(42), 0);
        assert_eq!(projection.w.shape(), (2, 4));
        assert_eq!(projection.b.shape(), (1, 4));
        assert_eq!(projection.z.shape(), (4, 4));
        assert_eq!(projection.projected_data.shape(), (4, 1));
        assert_eq!(projection.components.shape(), (1, 4));
    }

    #[test]
    fn seeded_fit_is_reproducible() {
        let data = DMatrix::from_row_slice(3, 2, &[0.0, 0.0, 1.0, 1.0, 2.0, -1.0]);
        let a = fit(&data, Some(7), 3);
        let b = fit(&data, Some(7), 3);
        assert_eq!(a.w, b.w);
        assert_eq!(a.b, b.b);
        assert_eq!(a.components, b.components);
    }

    #[test]
    fn different_node_counters_change_the_draw() {
        let data = DMatrix::from_row_slice(3, 2, &[0.0, 0.0, 1.0, 1.0, 2.0, -1.0]);
        let a = fit(&data, Some(7), 0);
        let b = fit(&data, Some(7), 1);
        assert_ne!(a.w, b.w);
    }

    #[test]
    fn project_matches_the_training_row_projection() {
        let data = DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 1.0, 1.0]);
        let projection = fit(&data, Some(1), 0);
        let row0 = data.rows(0, 1).into_owned();
        let scalar = project(&row0, &projection.w, &projection.b, &projection.components);
        assert!((scalar - projection.projected_data[(0, 0)]).abs() < 1e-4);
    }
}
