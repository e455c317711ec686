//! The predict/update recursion once no diffuse part remains.

use ndarray::Array1;
use ssf_linalg::{add_xaxt, clamp_diagonal};
use ssf_model::{ModelError, SsfData, StateSpace};

use crate::config::FilterConfig;
use crate::error::SsfError;
use crate::sink::ResultsSink;
use crate::state::{Phase, PredictionError, State};

/// Checks the model and the state shape before a recursion starts.
pub(crate) fn check_state<S: StateSpace + ?Sized>(model: &S, state: &State) -> Result<(), SsfError> {
    model.validate()?;
    let n = model.state_dim();
    if state.dim() != n || state.p.dim() != (n, n) {
        return Err(ModelError::DimensionMismatch {
            what: "filter state",
            expected: n,
            got: state.dim(),
        }
        .into());
    }
    Ok(())
}

/// Kalman filter without diffuse initialization.
///
/// At each `t`: save the forecast, compute the prediction error, update
/// when `y[t]` is present and `f > 0`, save the concurrent state, then
/// predict `t + 1`. A missing observation or a zero (or `NaN`) variance
/// skips the update.
#[derive(Debug, Clone, Copy)]
pub struct OrdinaryFilter {
    variance_tolerance: f64,
}

impl OrdinaryFilter {
    /// Creates a filter using the tolerances of `config`.
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            variance_tolerance: config.variance_tolerance(),
        }
    }

    /// Runs from `start` to the end of `data`.
    ///
    /// On return `state` holds the prediction for `data.len()`.
    pub fn process<S, K>(
        &self,
        model: &S,
        data: &SsfData,
        state: &mut State,
        start: usize,
        sink: &mut K,
    ) -> Result<(), SsfError>
    where
        S: StateSpace + ?Sized,
        K: ResultsSink + ?Sized,
    {
        self.process_range(model, data, state, start, data.len(), sink)
    }

    /// Runs over `start..end`; `state` must be the prediction for `start`.
    pub fn process_range<S, K>(
        &self,
        model: &S,
        data: &SsfData,
        state: &mut State,
        start: usize,
        end: usize,
        sink: &mut K,
    ) -> Result<(), SsfError>
    where
        S: StateSpace + ?Sized,
        K: ResultsSink + ?Sized,
    {
        check_state(model, state)?;
        for t in start..end {
            self.step(model, t, data.get(t), state, sink);
        }
        Ok(())
    }

    /// One full time step, prediction for `t + 1` included.
    pub(crate) fn step<S, K>(
        &self,
        model: &S,
        t: usize,
        y: Option<f64>,
        state: &mut State,
        sink: &mut K,
    ) where
        S: StateSpace + ?Sized,
        K: ResultsSink + ?Sized,
    {
        sink.save_state(t, state, Phase::Forecast);
        let error = self.prediction_error(model, t, y, state);
        sink.save_error(t, &error);
        self.update(state, &error);
        sink.save_state(t, state, Phase::Concurrent);
        state.predict(model, t, self.variance_tolerance);
    }

    /// `e = y − Z·a`, `M = P·Zᵀ`, `f = Z·M + H` (zero below tolerance).
    pub(crate) fn prediction_error<S: StateSpace + ?Sized>(
        &self,
        model: &S,
        t: usize,
        y: Option<f64>,
        state: &State,
    ) -> PredictionError {
        let mut gain = Array1::zeros(state.dim());
        model.loading_product(t, state.p.view(), gain.view_mut());
        let f = model.loading_dot(t, gain.view()) + model.observation_variance(t);
        PredictionError {
            residual: y.map(|y| y - model.loading_dot(t, state.a.view())),
            variance: self.clamp(f),
            gain,
            diffuse: None,
        }
    }

    /// `a += M·e/f`, `P −= M·Mᵀ/f`; nothing when missing or `f == 0`.
    pub(crate) fn update(&self, state: &mut State, error: &PredictionError) {
        let Some(e) = error.residual else {
            return;
        };
        let f = error.variance;
        if f <= 0.0 {
            return;
        }
        state.a.scaled_add(e / f, &error.gain);
        add_xaxt(&mut state.p, -1.0 / f, &error.gain);
        clamp_diagonal(&mut state.p, self.variance_tolerance);
    }

    /// Zeroes variances below tolerance, `NaN` included.
    pub(crate) fn clamp(&self, f: f64) -> f64 {
        if f >= self.variance_tolerance { f } else { 0.0 }
    }

    pub(crate) fn variance_tolerance(&self) -> f64 {
        self.variance_tolerance
    }
}

impl Default for OrdinaryFilter {
    fn default() -> Self {
        Self::new(&FilterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FilteringResults, StateStorage};
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};
    use ssf_model::{Dynamics, MatrixDynamics, Measurement, Model};

    fn random_walk() -> Model {
        Model::new(
            Dynamics::Matrices(
                MatrixDynamics::new(array![[1.0]], array![[1.0]])
                    .with_initial(array![0.0], array![[1.0]]),
            ),
            Measurement::Single {
                position: 0,
                variance: 1.0,
            },
        )
        .unwrap()
    }

    #[test]
    fn hand_computed_steps() {
        let model = random_walk();
        let data = SsfData::new(vec![Some(2.0), None]);
        let mut state = State::initial(&model);
        let mut concurrent = StateStorage::full(Phase::Concurrent);
        OrdinaryFilter::default()
            .process(&model, &data, &mut state, 0, &mut concurrent)
            .unwrap();

        // t = 0: f = 2, a = 1, P = 0.5
        assert_abs_diff_eq!(concurrent.mean(0).unwrap()[0], 1.0, epsilon = 1e-15);
        assert_abs_diff_eq!(concurrent.covariance(0).unwrap()[(0, 0)], 0.5, epsilon = 1e-15);
        // t = 1 missing: no update from the prediction (a = 1, P = 1.5)
        assert_abs_diff_eq!(concurrent.mean(1).unwrap()[0], 1.0, epsilon = 1e-15);
        assert_abs_diff_eq!(concurrent.covariance(1).unwrap()[(0, 0)], 1.5, epsilon = 1e-15);
        // final prediction for t = 2
        assert_abs_diff_eq!(state.p[(0, 0)], 2.5, epsilon = 1e-15);
    }

    #[test]
    fn missing_step_records_error_without_residual() {
        let model = random_walk();
        let data = SsfData::new(vec![None, Some(1.0)]);
        let mut state = State::initial(&model);
        let mut results = FilteringResults::new();
        OrdinaryFilter::default()
            .process(&model, &data, &mut state, 0, &mut results)
            .unwrap();
        assert!(results.error(0).unwrap().is_missing());
        assert_abs_diff_eq!(results.error(1).unwrap().variance, 3.0, epsilon = 1e-15);
    }

    #[test]
    fn zero_variance_skips_update() {
        let filter = OrdinaryFilter::default();
        let mut state = State::new(array![1.0], Array2::zeros((1, 1)));
        let error = PredictionError {
            residual: Some(5.0),
            variance: filter.clamp(f64::NAN),
            gain: array![0.0],
            diffuse: None,
        };
        assert_eq!(error.variance, 0.0);
        filter.update(&mut state, &error);
        assert_eq!(state.a[0], 1.0);
    }

    #[test]
    fn covariance_stays_symmetric() {
        let model = Model::local_linear_trend(0.5, 0.1, 1.0).unwrap();
        let mut state = State::new(array![0.0, 0.0], array![[4.0, 1.0], [1.0, 2.0]]);
        let data = SsfData::from(vec![1.0, 2.5, 2.9, 4.2, 5.1]);
        OrdinaryFilter::default()
            .process(&model, &data, &mut state, 0, &mut ())
            .unwrap();
        assert_eq!(state.p[(0, 1)], state.p[(1, 0)]);
        assert!(state.p[(0, 0)] > 0.0 && state.p[(1, 1)] > 0.0);
    }

    #[test]
    fn rejects_state_of_wrong_dimension() {
        let model = random_walk();
        let mut state = State::new(array![0.0, 0.0], Array2::zeros((2, 2)));
        let err = OrdinaryFilter::default()
            .process(&model, &SsfData::from(vec![1.0]), &mut state, 0, &mut ())
            .unwrap_err();
        assert!(matches!(err, SsfError::ModelInvalid(_)));
    }
}
