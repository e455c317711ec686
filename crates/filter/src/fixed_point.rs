//! Fixed-point smoothing by state augmentation.

use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut1, ArrayViewMut2, s};
use ssf_model::{ModelError, SsfData, StateSpace};

use crate::config::FilterConfig;
use crate::diffuse::DiffuseInitializer;
use crate::error::SsfError;
use crate::ordinary::OrdinaryFilter;
use crate::sink::ResultsSink;
use crate::state::{Phase, State};

/// Model of dimension `n + k` whose trailing block is a frozen copy of
/// `selection·a[index]`.
///
/// The leading block delegates to the inner model; the trailing block has
/// identity transition, no noise and no loading. Filtering it from
/// `index` onward makes the trailing block the fixed-point estimate.
#[derive(Debug, Clone)]
pub struct FixedPointModel<S> {
    inner: S,
    inner_dim: usize,
    initial_mean: Array1<f64>,
    initial_covariance: Array2<f64>,
}

impl<S: StateSpace> FixedPointModel<S> {
    /// Wraps `inner` started from `state` (the prediction at the fixed
    /// index). `selection` is `k × n`.
    pub fn new(inner: S, state: &State, selection: &Array2<f64>) -> Result<Self, ModelError> {
        let n = inner.state_dim();
        if selection.ncols() != n {
            return Err(ModelError::DimensionMismatch {
                what: "fixed-point selection",
                expected: n,
                got: selection.ncols(),
            });
        }
        let k = selection.nrows();
        let mut mean = Array1::zeros(n + k);
        mean.slice_mut(s![..n]).assign(&state.a);
        mean.slice_mut(s![n..]).assign(&selection.dot(&state.a));

        let mp = selection.dot(&state.p);
        let mut covariance = Array2::zeros((n + k, n + k));
        covariance.slice_mut(s![..n, ..n]).assign(&state.p);
        covariance.slice_mut(s![n.., ..n]).assign(&mp);
        covariance.slice_mut(s![..n, n..]).assign(&mp.t());
        covariance.slice_mut(s![n.., n..]).assign(&mp.dot(&selection.t()));
        Ok(Self {
            inner,
            inner_dim: n,
            initial_mean: mean,
            initial_covariance: covariance,
        })
    }

    /// Dimension of the wrapped model.
    pub fn inner_dim(&self) -> usize {
        self.inner_dim
    }
}

impl<S: StateSpace> StateSpace for FixedPointModel<S> {
    fn state_dim(&self) -> usize {
        self.initial_mean.len()
    }

    fn is_time_invariant(&self) -> bool {
        self.inner.is_time_invariant()
    }

    fn validate(&self) -> Result<(), ModelError> {
        self.inner.validate()
    }

    fn transition(&self, t: usize, mut x: ArrayViewMut1<'_, f64>) {
        self.inner.transition(t, x.slice_mut(s![..self.inner_dim]));
    }

    fn transition_transpose(&self, t: usize, mut x: ArrayViewMut1<'_, f64>) {
        self.inner
            .transition_transpose(t, x.slice_mut(s![..self.inner_dim]));
    }

    fn add_process_noise(&self, t: usize, mut p: ArrayViewMut2<'_, f64>) {
        let n = self.inner_dim;
        self.inner.add_process_noise(t, p.slice_mut(s![..n, ..n]));
    }

    fn loading_dot(&self, t: usize, x: ArrayView1<'_, f64>) -> f64 {
        self.inner.loading_dot(t, x.slice(s![..self.inner_dim]))
    }

    fn add_loading(&self, t: usize, mut x: ArrayViewMut1<'_, f64>, d: f64) {
        self.inner
            .add_loading(t, x.slice_mut(s![..self.inner_dim]), d);
    }

    fn observation_variance(&self, t: usize) -> f64 {
        self.inner.observation_variance(t)
    }

    fn initial_mean(&self) -> Array1<f64> {
        self.initial_mean.clone()
    }

    fn initial_covariance(&self) -> Array2<f64> {
        self.initial_covariance.clone()
    }

    fn diffuse_dim(&self) -> usize {
        0
    }

    fn diffuse_constraints(&self) -> Array2<f64> {
        Array2::zeros((self.state_dim(), 0))
    }
}

/// Successive estimates of `selection·a[index]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedPointEstimates {
    index: usize,
    means: Vec<Array1<f64>>,
    covariances: Vec<Array2<f64>>,
}

impl FixedPointEstimates {
    /// The fixed index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of estimates (`len − index + 1`).
    pub fn len(&self) -> usize {
        self.means.len()
    }

    /// `true` when no estimate is available.
    pub fn is_empty(&self) -> bool {
        self.means.is_empty()
    }

    /// Estimate given `y[0..index + j)`; `j = 0` is the prediction.
    pub fn mean(&self, j: usize) -> Option<&Array1<f64>> {
        self.means.get(j)
    }

    /// Covariance of [`FixedPointEstimates::mean`].
    pub fn covariance(&self, j: usize) -> Option<&Array2<f64>> {
        self.covariances.get(j)
    }

    /// Estimate given the whole series.
    pub fn smoothed(&self) -> Option<(&Array1<f64>, &Array2<f64>)> {
        self.means.last().zip(self.covariances.last())
    }
}

/// Trailing block of every forecast state.
struct TrailingBlock {
    offset: usize,
    means: Vec<Array1<f64>>,
    covariances: Vec<Array2<f64>>,
}

impl TrailingBlock {
    fn push(&mut self, state: &State) {
        let n = self.offset;
        self.means.push(state.a.slice(s![n..]).to_owned());
        self.covariances.push(state.p.slice(s![n.., n..]).to_owned());
    }
}

impl ResultsSink for TrailingBlock {
    fn save_state(&mut self, _t: usize, state: &State, phase: Phase) {
        if phase == Phase::Forecast {
            self.push(state);
        }
    }
}

/// Fixed-point smoother for one historical index.
#[derive(Debug, Clone, Copy)]
pub struct FixedPointSmoother {
    ordinary: OrdinaryFilter,
    initializer: DiffuseInitializer,
}

impl FixedPointSmoother {
    /// Creates a smoother using the tolerances of `config`.
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            ordinary: OrdinaryFilter::new(config),
            initializer: DiffuseInitializer::new(config),
        }
    }

    /// Estimates `selection·a[index]` (the full state when `selection` is
    /// `None`) forward from `index` to the end of `data`.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | [`SsfError::InvalidConfig`] | `index` is not a valid position in `data` |
    /// | [`SsfError::DiffuseNotResolved`] | the diffuse phase ends after `index` |
    /// | [`SsfError::ModelInvalid`] | invalid model or selection |
    /// | [`SsfError::NumericalSingularity`] | rank-deficient diffuse constraints |
    pub fn process<S: StateSpace + ?Sized>(
        &self,
        model: &S,
        data: &SsfData,
        index: usize,
        selection: Option<&Array2<f64>>,
    ) -> Result<FixedPointEstimates, SsfError> {
        if index >= data.len() {
            return Err(SsfError::InvalidConfig(format!(
                "fixed point {index} outside data of length {}",
                data.len()
            )));
        }
        let outcome = self.initializer.initialize(model, data, &mut ())?;
        if !outcome.resolved || outcome.end > index {
            return Err(SsfError::DiffuseNotResolved {
                end: outcome.end,
                position: index,
            });
        }
        let mut state = outcome.state;
        self.ordinary
            .process_range(model, data, &mut state, outcome.end, index, &mut ())?;

        let identity;
        let selection = match selection {
            Some(m) => m,
            None => {
                identity = Array2::eye(model.state_dim());
                &identity
            }
        };
        let augmented = FixedPointModel::new(model, &state, selection)?;
        let mut trailing = TrailingBlock {
            offset: augmented.inner_dim(),
            means: Vec::with_capacity(data.len() - index + 1),
            covariances: Vec::with_capacity(data.len() - index + 1),
        };
        let mut state = State::initial(&augmented);
        self.ordinary
            .process(&augmented, data, &mut state, index, &mut trailing)?;
        trailing.push(&state);
        Ok(FixedPointEstimates {
            index,
            means: trailing.means,
            covariances: trailing.covariances,
        })
    }
}

impl Default for FixedPointSmoother {
    fn default() -> Self {
        Self::new(&FilterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use ssf_model::Model;

    #[test]
    fn wrapper_freezes_trailing_block() {
        let model = Model::local_linear_trend(1.0, 1.0, 1.0).unwrap();
        let state = State::new(array![1.0, 2.0], array![[2.0, 0.5], [0.5, 1.0]]);
        let wrapped = FixedPointModel::new(&model, &state, &array![[1.0, 1.0]]).unwrap();
        assert_eq!(wrapped.state_dim(), 3);
        assert_abs_diff_eq!(wrapped.initial_mean(), array![1.0, 2.0, 3.0]);
        assert_abs_diff_eq!(
            wrapped.initial_covariance(),
            array![[2.0, 0.5, 2.5], [0.5, 1.0, 1.5], [2.5, 1.5, 4.0]]
        );

        let mut x = array![1.0, 2.0, 7.0];
        wrapped.transition(0, x.view_mut());
        assert_abs_diff_eq!(x, array![3.0, 2.0, 7.0]);
        assert_abs_diff_eq!(wrapped.loading_dot(0, x.view()), 3.0);

        let mut p = Array2::zeros((3, 3));
        wrapped.add_process_noise(0, p.view_mut());
        assert_abs_diff_eq!(p, array![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 0.0]]);
    }

    #[test]
    fn first_estimate_is_the_prediction() {
        let model = Model::local_level(2.0, 1.0).unwrap();
        let data = SsfData::from_nan_coded(&[10.0, f64::NAN, 12.0, 11.0, 13.0]);
        let estimates = FixedPointSmoother::default()
            .process(&model, &data, 1, None)
            .unwrap();
        assert_eq!(estimates.len(), 5);
        assert_abs_diff_eq!(estimates.mean(0).unwrap()[0], 10.0, epsilon = 1e-12);
        assert_abs_diff_eq!(estimates.covariance(0).unwrap()[(0, 0)], 3.0, epsilon = 1e-12);
        // y[1] is missing: nothing learnt about a[1]
        assert_abs_diff_eq!(estimates.mean(1).unwrap()[0], 10.0, epsilon = 1e-12);
        let (_, v) = estimates.smoothed().unwrap();
        assert!(v[(0, 0)] < 3.0);
    }

    #[test]
    fn index_inside_diffuse_phase_fails() {
        let model = Model::local_linear_trend(1.0, 1.0, 1.0).unwrap();
        let data = SsfData::from(vec![1.0, 2.0, 3.0, 4.0]);
        let err = FixedPointSmoother::default()
            .process(&model, &data, 1, None)
            .unwrap_err();
        assert!(matches!(err, SsfError::DiffuseNotResolved { end: 2, position: 1 }));
    }

    #[test]
    fn index_outside_data_fails() {
        let model = Model::local_level(1.0, 1.0).unwrap();
        let err = FixedPointSmoother::default()
            .process(&model, &SsfData::from(vec![1.0]), 1, None)
            .unwrap_err();
        assert!(matches!(err, SsfError::InvalidConfig(_)));
    }
}
