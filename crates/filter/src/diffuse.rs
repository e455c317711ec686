//! Exact diffuse initialization (two-covariance recursion).

use ndarray::Array1;
use ssf_linalg::{add_cross, add_xaxt, cholesky, clamp_diagonal, frobenius_norm};
use ssf_model::{SsfData, StateSpace};
use tracing::{debug, warn};

use crate::config::FilterConfig;
use crate::error::SsfError;
use crate::ordinary::{OrdinaryFilter, check_state};
use crate::sink::ResultsSink;
use crate::state::{DiffuseBlock, DiffuseInnovation, Phase, PredictionError, State};

/// State handed over to the ordinary filter.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffuseOutcome {
    /// Prediction for `end`; carries no diffuse part when `resolved`.
    pub state: State,
    /// First non-diffuse index (the diffuse-phase length).
    pub end: usize,
    /// `false` when the data ran out before `Pi` vanished.
    pub resolved: bool,
}

/// Runs the diffuse phase with separate finite (`P`) and diffuse (`Pi`)
/// covariances, both moved by the same transition.
///
/// An observation is a diffuse step when `|fi| > tol·‖Pi₀‖`. Diffuse steps
/// update the mean with `Mi/fi`, downdate `Pi` by `Mi·Miᵀ/fi` and update
/// `P` by `(f/fi²)·Mi·Miᵀ − (M·Miᵀ + Mi·Mᵀ)/fi`. Other observations use
/// the ordinary update on `P`. The phase ends, for good, at the first
/// prediction whose `Pi` has a Frobenius norm `<= tol·‖Pi₀‖`.
#[derive(Debug, Clone, Copy)]
pub struct DiffuseInitializer {
    ordinary: OrdinaryFilter,
    diffuse_tolerance: f64,
}

impl DiffuseInitializer {
    /// Creates an initializer using the tolerances of `config`.
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            ordinary: OrdinaryFilter::new(config),
            diffuse_tolerance: config.diffuse_tolerance(),
        }
    }

    /// Filters the diffuse phase of `data`.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | [`SsfError::ModelInvalid`] | the model fails validation |
    /// | [`SsfError::NumericalSingularity`] | the diffuse constraints are rank deficient |
    pub fn initialize<S, K>(
        &self,
        model: &S,
        data: &SsfData,
        sink: &mut K,
    ) -> Result<DiffuseOutcome, SsfError>
    where
        S: StateSpace + ?Sized,
        K: ResultsSink + ?Sized,
    {
        let mut state = State::diffuse(model);
        check_state(model, &state)?;
        let b = model.diffuse_constraints();
        if b.ncols() > 0 {
            cholesky(&b.t().dot(&b), self.diffuse_tolerance)?;
        }

        let initial_norm = pi_norm(&state);
        if initial_norm == 0.0 {
            state.diffuse = None;
            sink.close_diffuse(0);
            return Ok(DiffuseOutcome {
                state,
                end: 0,
                resolved: true,
            });
        }
        let threshold = self.diffuse_tolerance * initial_norm;
        let tol = self.ordinary.variance_tolerance();

        let mut t = 0;
        while t < data.len() && pi_norm(&state) > threshold {
            sink.save_state(t, &state, Phase::Forecast);
            let error = self.prediction_error(model, t, data.get(t), &state, threshold);
            sink.save_error(t, &error);
            self.update(&mut state, &error);
            sink.save_state(t, &state, Phase::Concurrent);
            state.predict(model, t, tol);
            t += 1;
        }

        let resolved = pi_norm(&state) <= threshold;
        if resolved {
            state.diffuse = None;
            debug!(end = t, "diffuse phase resolved");
        } else {
            warn!(
                end = t,
                remaining = pi_norm(&state),
                "data exhausted before the diffuse phase ended"
            );
        }
        sink.close_diffuse(t);
        Ok(DiffuseOutcome {
            state,
            end: t,
            resolved,
        })
    }

    fn prediction_error<S: StateSpace + ?Sized>(
        &self,
        model: &S,
        t: usize,
        y: Option<f64>,
        state: &State,
        threshold: f64,
    ) -> PredictionError {
        let mut error = self.ordinary.prediction_error(model, t, y, state);
        if let Some(pi) = state.diffuse_covariance() {
            let mut gain = Array1::zeros(state.dim());
            model.loading_product(t, pi.view(), gain.view_mut());
            let fi = model.loading_dot(t, gain.view());
            error.diffuse = Some(DiffuseInnovation::Covariance {
                variance: if fi.abs() > threshold { fi } else { 0.0 },
                gain,
            });
        }
        error
    }

    fn update(&self, state: &mut State, error: &PredictionError) {
        let fi = error.diffuse_variance();
        if fi == 0.0 {
            self.ordinary.update(state, error);
            return;
        }
        let (Some(e), Some(DiffuseInnovation::Covariance { gain: mi, .. })) =
            (error.residual, &error.diffuse)
        else {
            return;
        };
        let tol = self.ordinary.variance_tolerance();
        let f = error.variance;
        state.a.scaled_add(e / fi, mi);
        add_xaxt(&mut state.p, f / (fi * fi), mi);
        add_cross(&mut state.p, -1.0 / fi, &error.gain, mi);
        clamp_diagonal(&mut state.p, tol);
        if let Some(DiffuseBlock::Covariance(pi)) = &mut state.diffuse {
            add_xaxt(pi, -1.0 / fi, mi);
            clamp_diagonal(pi, tol);
        }
    }
}

impl Default for DiffuseInitializer {
    fn default() -> Self {
        Self::new(&FilterConfig::default())
    }
}

fn pi_norm(state: &State) -> f64 {
    state.diffuse_covariance().map_or(0.0, frobenius_norm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FilteringResults, StateStorage};
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};
    use ssf_model::{Dynamics, MatrixDynamics, Measurement, Model};

    #[test]
    fn local_level_needs_one_diffuse_step() {
        let model = Model::local_level(2.0, 1.0).unwrap();
        let data = SsfData::from(vec![10.0, f64::NAN, 12.0]);
        let mut concurrent = StateStorage::full(Phase::Concurrent);
        let outcome = DiffuseInitializer::default()
            .initialize(&model, &data, &mut concurrent)
            .unwrap();

        assert_eq!(outcome.end, 1);
        assert!(outcome.resolved);
        assert!(!outcome.state.is_diffuse());
        assert_abs_diff_eq!(concurrent.mean(0).unwrap()[0], 10.0, epsilon = 1e-12);
        assert_abs_diff_eq!(concurrent.covariance(0).unwrap()[(0, 0)], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(outcome.state.a[0], 10.0, epsilon = 1e-12);
        assert_abs_diff_eq!(outcome.state.p[(0, 0)], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn trend_resolves_within_state_dim_steps() {
        let model = Model::local_linear_trend(1.0, 0.1, 0.5).unwrap();
        let data = SsfData::from(vec![1.0, 2.0, 2.5, 4.0]);
        let mut results = (FilteringResults::new(), StateStorage::full(Phase::Concurrent));
        let outcome = DiffuseInitializer::default()
            .initialize(&model, &data, &mut results)
            .unwrap();
        assert_eq!(outcome.end, 2);
        assert_eq!(results.0.diffuse_end(), 2);
        for t in 0..2 {
            assert!(results.0.error(t).unwrap().is_diffuse_step());
        }
        // exact interpolation of the first two points: level 2, slope 1
        assert_abs_diff_eq!(outcome.state.a, array![3.0, 1.0], epsilon = 1e-10);
    }

    #[test]
    fn missing_values_delay_resolution() {
        let model = Model::local_level(1.0, 1.0).unwrap();
        let data = SsfData::new(vec![None, None, Some(3.0), Some(4.0)]);
        let outcome = DiffuseInitializer::default()
            .initialize(&model, &data, &mut ())
            .unwrap();
        assert_eq!(outcome.end, 3);
        assert_abs_diff_eq!(outcome.state.a[0], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn unresolved_when_data_runs_out() {
        let model = Model::local_linear_trend(1.0, 1.0, 1.0).unwrap();
        let data = SsfData::from(vec![5.0]);
        let outcome = DiffuseInitializer::default()
            .initialize(&model, &data, &mut ())
            .unwrap();
        assert_eq!(outcome.end, 1);
        assert!(!outcome.resolved);
        assert!(outcome.state.diffuse_covariance().is_some());
    }

    #[test]
    fn non_diffuse_model_ends_immediately() {
        let model = Model::new(
            Dynamics::Noise { variance: 1.0 },
            Measurement::Single {
                position: 0,
                variance: 1.0,
            },
        )
        .unwrap();
        let outcome = DiffuseInitializer::default()
            .initialize(&model, &SsfData::from(vec![1.0]), &mut ())
            .unwrap();
        assert_eq!(outcome.end, 0);
        assert!(outcome.resolved);
    }

    #[test]
    fn rank_deficient_constraints_fail() {
        let model = Model::new(
            Dynamics::Matrices(
                MatrixDynamics::new(Array2::eye(2), Array2::eye(2))
                    .with_diffuse_constraints(array![[1.0, 1.0], [1.0, 1.0]]),
            ),
            Measurement::Sum { variance: 1.0 },
        )
        .unwrap();
        let err = DiffuseInitializer::default()
            .initialize(&model, &SsfData::from(vec![1.0, 2.0]), &mut ())
            .unwrap_err();
        assert!(matches!(err, SsfError::NumericalSingularity(_)));
    }
}
