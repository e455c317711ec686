//! Draws series from a model.

use ndarray::{Array1, Array2};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use ssf_linalg::semidefinite_root;

use crate::error::ModelError;
use crate::state_space::StateSpace;

/// Default variance given to diffuse initial effects when simulating.
pub const DEFAULT_DIFFUSE_VARIANCE: f64 = 100.0;

const ROOT_TOLERANCE: f64 = 1e-12;

/// Simulates observations from a model.
///
/// Diffuse effects are drawn with a large but finite variance.
#[derive(Debug, Clone)]
pub struct Simulator<'a, S: ?Sized> {
    model: &'a S,
    diffuse_variance: f64,
}

impl<'a, S: StateSpace + ?Sized> Simulator<'a, S> {
    /// Creates a simulator for `model`.
    pub fn new(model: &'a S) -> Self {
        Self {
            model,
            diffuse_variance: DEFAULT_DIFFUSE_VARIANCE,
        }
    }

    /// Overrides the variance of diffuse effects.
    pub fn with_diffuse_variance(mut self, variance: f64) -> Self {
        self.diffuse_variance = variance;
        self
    }

    /// Draws `n` observations.
    pub fn simulate<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Result<Vec<f64>, ModelError> {
        let model = self.model;
        model.validate()?;
        if !(self.diffuse_variance.is_finite() && self.diffuse_variance >= 0.0) {
            return Err(ModelError::InvalidVariance {
                what: "diffuse variance",
                value: self.diffuse_variance,
            });
        }

        let mut state = model.initial_mean();
        let p0 = semidefinite_root(&model.initial_covariance(), ROOT_TOLERANCE)?;
        state += &p0.dot(&normals(p0.ncols(), rng));
        let b = model.diffuse_constraints();
        state.scaled_add(
            self.diffuse_variance.sqrt(),
            &b.dot(&normals(b.ncols(), rng)),
        );

        let steady_root = if model.is_time_invariant() {
            Some(semidefinite_root(&model.noise_matrix(0), ROOT_TOLERANCE)?)
        } else {
            None
        };

        let mut out = Vec::with_capacity(n);
        for t in 0..n {
            if t > 0 {
                model.transition(t - 1, state.view_mut());
                let draw = match &steady_root {
                    Some(root) => noise_draw(root, rng),
                    None => {
                        let root = semidefinite_root(&model.noise_matrix(t - 1), ROOT_TOLERANCE)?;
                        noise_draw(&root, rng)
                    }
                };
                state += &draw;
            }
            let h = model.observation_variance(t);
            let e: f64 = StandardNormal.sample(&mut *rng);
            out.push(model.loading_dot(t, state.view()) + h.sqrt() * e);
        }
        Ok(out)
    }
}

fn normals<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Array1<f64> {
    (0..n)
        .map(|_| -> f64 { StandardNormal.sample(&mut *rng) })
        .collect()
}

fn noise_draw<R: Rng + ?Sized>(root: &Array2<f64>, rng: &mut R) -> Array1<f64> {
    root.dot(&normals(root.ncols(), rng))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Dynamics, Measurement, Model};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn seeded_simulation_is_reproducible() {
        let model = Model::local_level(1.0, 0.5).unwrap();
        let a = Simulator::new(&model)
            .simulate(50, &mut StdRng::seed_from_u64(7))
            .unwrap();
        let b = Simulator::new(&model)
            .simulate(50, &mut StdRng::seed_from_u64(7))
            .unwrap();
        assert_eq!(a.len(), 50);
        assert_eq!(a, b);
        assert!(a.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn noise_model_has_sample_variance_near_truth() {
        let model = Model::new(
            Dynamics::Noise { variance: 4.0 },
            Measurement::Single {
                position: 0,
                variance: 0.0,
            },
        )
        .unwrap();
        let y = Simulator::new(&model)
            .simulate(20_000, &mut StdRng::seed_from_u64(42))
            .unwrap();
        let n = y.len() as f64;
        let mean = y.iter().sum::<f64>() / n;
        let var = y.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        assert!((var - 4.0).abs() < 0.2, "sample variance {var}");
    }

    #[test]
    fn rejects_negative_diffuse_variance() {
        let model = Model::local_level(1.0, 1.0).unwrap();
        let err = Simulator::new(&model)
            .with_diffuse_variance(-1.0)
            .simulate(3, &mut StdRng::seed_from_u64(1))
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidVariance { .. }));
    }
}
