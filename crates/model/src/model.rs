//! A model assembled from a [`Dynamics`] and a [`Measurement`].

use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut1, ArrayViewMut2};
use tracing::debug;

use crate::dynamics::{Dynamics, MatrixDynamics};
use crate::error::ModelError;
use crate::measurement::Measurement;
use crate::state_space::StateSpace;

/// Univariate linear Gaussian state-space model.
#[derive(Debug, Clone)]
pub struct Model {
    dynamics: Dynamics,
    measurement: Measurement,
}

impl Model {
    /// Assembles and validates a model.
    pub fn new(dynamics: Dynamics, measurement: Measurement) -> Result<Self, ModelError> {
        let model = Self {
            dynamics,
            measurement,
        };
        StateSpace::validate(&model)?;
        Ok(model)
    }

    /// Random walk observed with noise.
    pub fn local_level(level_variance: f64, noise_variance: f64) -> Result<Self, ModelError> {
        Self::new(
            Dynamics::LocalLevel {
                variance: level_variance,
            },
            Measurement::Single {
                position: 0,
                variance: noise_variance,
            },
        )
    }

    /// Level plus slope observed with noise.
    pub fn local_linear_trend(
        level_variance: f64,
        slope_variance: f64,
        noise_variance: f64,
    ) -> Result<Self, ModelError> {
        Self::new(
            Dynamics::LocalLinearTrend {
                level_variance,
                slope_variance,
            },
            Measurement::Single {
                position: 0,
                variance: noise_variance,
            },
        )
    }

    /// State equation.
    pub fn dynamics(&self) -> &Dynamics {
        &self.dynamics
    }

    /// Observation equation.
    pub fn measurement(&self) -> &Measurement {
        &self.measurement
    }

    /// Materializes a time-invariant model as explicit matrices.
    ///
    /// The result applies dense products, which is usually faster for
    /// composite shapes filtered over long series.
    pub fn cached(&self) -> Result<Self, ModelError> {
        if !self.is_time_invariant() {
            return Err(ModelError::TimeVarying);
        }
        debug!(dim = self.state_dim(), "materializing time-invariant model");
        let dynamics = MatrixDynamics::new(self.transition_matrix(0), self.noise_matrix(0))
            .with_initial(self.initial_mean(), self.initial_covariance())
            .with_diffuse_constraints(self.diffuse_constraints());
        Self::new(
            Dynamics::Matrices(dynamics),
            Measurement::Loading {
                loading: self.loading_vector(0),
                variance: self.observation_variance(0),
            },
        )
    }
}

impl StateSpace for Model {
    fn state_dim(&self) -> usize {
        self.dynamics.state_dim()
    }

    fn is_time_invariant(&self) -> bool {
        self.dynamics.is_time_invariant() && self.measurement.is_time_invariant()
    }

    fn validate(&self) -> Result<(), ModelError> {
        if self.state_dim() == 0 {
            return Err(ModelError::InvalidStateDim);
        }
        self.dynamics.validate()?;
        self.measurement.validate(self.state_dim())
    }

    fn transition(&self, t: usize, x: ArrayViewMut1<'_, f64>) {
        self.dynamics.transition(t, x);
    }

    fn transition_transpose(&self, t: usize, x: ArrayViewMut1<'_, f64>) {
        self.dynamics.transition_transpose(t, x);
    }

    fn add_process_noise(&self, t: usize, p: ArrayViewMut2<'_, f64>) {
        self.dynamics.add_noise(t, p);
    }

    fn loading_dot(&self, t: usize, x: ArrayView1<'_, f64>) -> f64 {
        self.measurement.dot(t, x)
    }

    fn add_loading(&self, t: usize, x: ArrayViewMut1<'_, f64>, d: f64) {
        self.measurement.add(t, x, d);
    }

    fn observation_variance(&self, t: usize) -> f64 {
        self.measurement.variance(t)
    }

    fn initial_mean(&self) -> Array1<f64> {
        self.dynamics.initial_mean()
    }

    fn initial_covariance(&self) -> Array2<f64> {
        self.dynamics.initial_covariance()
    }

    fn diffuse_dim(&self) -> usize {
        self.dynamics.diffuse_dim()
    }

    fn diffuse_constraints(&self) -> Array2<f64> {
        self.dynamics.diffuse_constraints()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn seasonal_model() -> Model {
        Model::new(
            Dynamics::Blocks(vec![
                Dynamics::LocalLinearTrend {
                    level_variance: 1.0,
                    slope_variance: 0.1,
                },
                Dynamics::Seasonal {
                    period: 4,
                    variance: 0.5,
                },
            ]),
            Measurement::Selection {
                positions: vec![0, 2],
                variance: 2.0,
            },
        )
        .unwrap()
    }

    #[test]
    fn new_rejects_mismatched_measurement() {
        let err = Model::new(
            Dynamics::LocalLevel { variance: 1.0 },
            Measurement::Single {
                position: 1,
                variance: 1.0,
            },
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::PositionOutOfRange { .. }));
    }

    #[test]
    fn congruence_matches_dense_product() {
        let model = seasonal_model();
        let n = model.state_dim();
        let t = model.transition_matrix(0);
        let p = Array2::from_shape_fn((n, n), |(i, j)| {
            if i == j { 2.0 + i as f64 } else { 0.3 }
        });
        let mut q = p.clone();
        model.transition_congruence(0, q.view_mut());
        assert_abs_diff_eq!(q, t.dot(&p).dot(&t.t()), epsilon = 1e-12);
    }

    #[test]
    fn loading_congruence_matches_dense_product() {
        let model = seasonal_model();
        let z = model.loading_vector(0);
        assert_abs_diff_eq!(z, array![1.0, 0.0, 1.0, 0.0, 0.0]);
        let n = model.state_dim();
        let v = Array2::from_shape_fn((n, n), |(i, j)| 1.0 / (1.0 + (i + j) as f64));
        assert_abs_diff_eq!(
            model.loading_congruence(0, v.view()),
            z.dot(&v.dot(&z)),
            epsilon = 1e-12
        );
    }

    #[test]
    fn cached_model_is_equivalent() {
        let model = seasonal_model();
        let cached = model.cached().unwrap();
        assert!(matches!(cached.dynamics(), Dynamics::Matrices(_)));
        assert_abs_diff_eq!(cached.transition_matrix(3), model.transition_matrix(3));
        assert_abs_diff_eq!(cached.noise_matrix(0), model.noise_matrix(0));
        assert_abs_diff_eq!(cached.loading_vector(1), model.loading_vector(1));
        assert_eq!(cached.diffuse_dim(), 5);
        assert_abs_diff_eq!(cached.observation_variance(0), 2.0);
    }

    #[test]
    fn cached_rejects_time_varying() {
        let model = Model::new(
            Dynamics::Seasonal {
                period: 3,
                variance: 1.0,
            },
            Measurement::Circular {
                period: 3,
                start: 0,
            },
        )
        .unwrap();
        assert!(matches!(model.cached(), Err(ModelError::TimeVarying)));
    }

    #[test]
    fn reference_model_is_a_state_space() {
        fn dim<S: StateSpace>(s: S) -> usize {
            s.state_dim()
        }
        let model = Model::local_level(1.0, 1.0).unwrap();
        assert_eq!(dim(&model), 1);
        assert!(model.is_diffuse());
        assert_abs_diff_eq!(model.diffuse_covariance(), array![[1.0]]);
    }
}
