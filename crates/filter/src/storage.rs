//! In-memory sinks: state storage and stored filtering results.

use ndarray::{Array1, Array2};

use crate::sink::ResultsSink;
use crate::state::{Phase, PredictionError, State};

fn put<T>(slots: &mut Vec<Option<T>>, t: usize, value: T) {
    if slots.len() <= t {
        slots.resize_with(t + 1, || None);
    }
    slots[t] = Some(value);
}

/// Time-indexed means (and optionally covariances) for one phase.
#[derive(Debug, Clone, PartialEq)]
pub struct StateStorage {
    phase: Phase,
    full: bool,
    means: Vec<Option<Array1<f64>>>,
    covariances: Vec<Option<Array2<f64>>>,
}

impl StateStorage {
    /// Stores means and covariances of `phase`.
    pub fn full(phase: Phase) -> Self {
        Self {
            phase,
            full: true,
            means: Vec::new(),
            covariances: Vec::new(),
        }
    }

    /// Stores only the means of `phase`.
    pub fn light(phase: Phase) -> Self {
        Self {
            full: false,
            ..Self::full(phase)
        }
    }

    /// Phase recorded by this storage.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// `true` when covariances are stored.
    pub fn is_full(&self) -> bool {
        self.full
    }

    /// One past the highest stored index.
    pub fn len(&self) -> usize {
        self.means.len()
    }

    /// `true` when nothing was stored.
    pub fn is_empty(&self) -> bool {
        self.means.is_empty()
    }

    /// Mean at `t`.
    pub fn mean(&self, t: usize) -> Option<&Array1<f64>> {
        self.means.get(t).and_then(Option::as_ref)
    }

    /// Covariance at `t` (full storage only).
    pub fn covariance(&self, t: usize) -> Option<&Array2<f64>> {
        self.covariances.get(t).and_then(Option::as_ref)
    }

    /// Component `i` of every stored mean; `NaN` where nothing is stored.
    pub fn component(&self, i: usize) -> Vec<f64> {
        self.means
            .iter()
            .map(|m| m.as_ref().map_or(f64::NAN, |m| m[i]))
            .collect()
    }

    /// Variance of component `i`; `NaN` where nothing is stored.
    pub fn component_variance(&self, i: usize) -> Vec<f64> {
        (0..self.len())
            .map(|t| self.covariance(t).map_or(f64::NAN, |p| p[(i, i)]))
            .collect()
    }

    /// Multiplies every stored covariance by `factor` (e.g. the estimated
    /// scale `σ²` of a concentrated likelihood).
    pub fn rescale_variances(&mut self, factor: f64) {
        for p in self.covariances.iter_mut().flatten() {
            p.mapv_inplace(|v| v * factor);
        }
    }
}

impl ResultsSink for StateStorage {
    fn save_state(&mut self, t: usize, state: &State, phase: Phase) {
        if phase != self.phase {
            return;
        }
        put(&mut self.means, t, state.a.clone());
        if self.full {
            put(&mut self.covariances, t, state.p.clone());
        }
    }
}

/// [`StateStorage`] sampling every `interval`-th index.
///
/// Index `t` is kept when `t % interval == 0`, at slot `t / interval`.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialStorage {
    interval: usize,
    inner: StateStorage,
}

impl PartialStorage {
    /// Wraps `inner`; an interval of 0 is treated as 1.
    pub fn new(interval: usize, inner: StateStorage) -> Self {
        Self {
            interval: interval.max(1),
            inner,
        }
    }

    /// Sampling interval.
    pub fn interval(&self) -> usize {
        self.interval
    }

    /// Mean at time `t`, if `t` was sampled.
    pub fn mean(&self, t: usize) -> Option<&Array1<f64>> {
        if t % self.interval == 0 {
            self.inner.mean(t / self.interval)
        } else {
            None
        }
    }

    /// Covariance at time `t`, if `t` was sampled.
    pub fn covariance(&self, t: usize) -> Option<&Array2<f64>> {
        if t % self.interval == 0 {
            self.inner.covariance(t / self.interval)
        } else {
            None
        }
    }

    /// Underlying storage, indexed by slot.
    pub fn storage(&self) -> &StateStorage {
        &self.inner
    }
}

impl ResultsSink for PartialStorage {
    fn save_state(&mut self, t: usize, state: &State, phase: Phase) {
        if t % self.interval == 0 {
            self.inner.save_state(t / self.interval, state, phase);
        }
    }
}

/// Forecast states and prediction errors of a forward pass, as needed
/// by the smoother and the gain-replay filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilteringResults {
    forecasts: Vec<Option<State>>,
    errors: Vec<Option<PredictionError>>,
    diffuse_end: usize,
}

impl FilteringResults {
    /// Creates empty results.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored periods.
    pub fn len(&self) -> usize {
        self.errors.len().max(self.forecasts.len())
    }

    /// `true` when nothing was stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forecast state at `t` (with `Pi` during the diffuse phase).
    pub fn forecast(&self, t: usize) -> Option<&State> {
        self.forecasts.get(t).and_then(Option::as_ref)
    }

    /// Prediction error at `t`.
    pub fn error(&self, t: usize) -> Option<&PredictionError> {
        self.errors.get(t).and_then(Option::as_ref)
    }

    /// First non-diffuse index (0 for a non-diffuse run).
    pub fn diffuse_end(&self) -> usize {
        self.diffuse_end
    }

    /// Standardized residuals, `NaN` for missing or diffuse steps.
    pub fn standardized_residuals(&self) -> Vec<f64> {
        (0..self.len())
            .map(|t| {
                self.error(t)
                    .filter(|e| !e.is_diffuse_step())
                    .and_then(PredictionError::standardized)
                    .unwrap_or(f64::NAN)
            })
            .collect()
    }
}

impl ResultsSink for FilteringResults {
    fn save_state(&mut self, t: usize, state: &State, phase: Phase) {
        if phase == Phase::Forecast {
            put(&mut self.forecasts, t, state.clone());
        }
    }

    fn save_error(&mut self, t: usize, error: &PredictionError) {
        put(&mut self.errors, t, error.clone());
    }

    fn close_diffuse(&mut self, end: usize) {
        self.diffuse_end = end;
    }
}
