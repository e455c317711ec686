//! Backward smoothing recursions over stored filtering results.

use ndarray::{Array1, Array2};
use ssf_linalg::{add_cross, add_xaxt, clamp_diagonal, outer, symmetrize};
use ssf_model::StateSpace;

use crate::config::FilterConfig;
use crate::error::SsfError;
use crate::sink::ResultsSink;
use crate::state::{DiffuseInnovation, Phase, PredictionError, State};
use crate::storage::FilteringResults;

/// `m ← T(t)ᵀ·m·T(t)`, re-symmetrized.
pub(crate) fn transpose_congruence<S: StateSpace + ?Sized>(
    model: &S,
    t: usize,
    m: &mut Array2<f64>,
) {
    for col in m.columns_mut() {
        model.transition_transpose(t, col);
    }
    for row in m.rows_mut() {
        model.transition_transpose(t, row);
    }
    symmetrize(m);
}

/// Backward accumulators `r` and `N`, with the extra diffuse terms.
#[derive(Debug, Clone)]
struct Accumulators {
    r0: Array1<f64>,
    n0: Array2<f64>,
    r1: Array1<f64>,
    n1: Array2<f64>,
    n2: Array2<f64>,
}

impl Accumulators {
    fn new(dim: usize) -> Self {
        Self {
            r0: Array1::zeros(dim),
            n0: Array2::zeros((dim, dim)),
            r1: Array1::zeros(dim),
            n1: Array2::zeros((dim, dim)),
            n2: Array2::zeros((dim, dim)),
        }
    }
}

/// Fixed-interval smoother.
///
/// Runs backwards over a [`FilteringResults`] produced by the ordinary or
/// exact diffuse filter:
///
/// ```text
/// r[t-1] = Zᵀ·e/f + Lᵀ·r[t]          L = T − T·M·Z/f
/// N[t-1] = Zᵀ·Z/f + Lᵀ·N[t]·L
/// â[t]   = a[t] + P[t]·r[t-1]
/// V[t]   = P[t] − P[t]·N[t-1]·P[t]
/// ```
///
/// Diffuse steps carry the additional `r⁽¹⁾`, `N⁽¹⁾` and `N⁽²⁾` terms of the
/// exact initial smoother. Smoothed states are reported with
/// [`Phase::Smoothed`], so any sink (full or partial storage) can collect
/// them.
#[derive(Debug, Clone, Copy)]
pub struct Smoother {
    variance_tolerance: f64,
}

impl Smoother {
    /// Creates a smoother using the tolerances of `config`.
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            variance_tolerance: config.variance_tolerance(),
        }
    }

    /// Smooths every stored period, from the last one backwards.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | [`SsfError::ModelInvalid`] | the model fails validation |
    /// | [`SsfError::InvalidConfig`] | incomplete results, augmented results, or a state of the wrong size |
    pub fn process<S, K>(
        &self,
        model: &S,
        results: &FilteringResults,
        sink: &mut K,
    ) -> Result<(), SsfError>
    where
        S: StateSpace + ?Sized,
        K: ResultsSink + ?Sized,
    {
        model.validate()?;
        let dim = model.state_dim();
        let end = results.diffuse_end();
        let mut acc = Accumulators::new(dim);

        for t in (0..results.len()).rev() {
            let (Some(state), Some(error)) = (results.forecast(t), results.error(t)) else {
                return Err(SsfError::InvalidConfig(format!(
                    "no stored forecast at {t}"
                )));
            };
            if state.dim() != dim {
                return Err(SsfError::InvalidConfig(format!(
                    "stored state at {t} has dimension {}, expected {dim}",
                    state.dim()
                )));
            }
            if matches!(error.diffuse, Some(DiffuseInnovation::Constraints { .. })) {
                return Err(SsfError::InvalidConfig(
                    "augmented filtering results cannot be smoothed".into(),
                ));
            }
            let smoothed = if t >= end {
                self.ordinary_step(model, t, state, error, &mut acc)
            } else {
                let Some(pi) = state.diffuse_covariance() else {
                    return Err(SsfError::InvalidConfig(format!(
                        "no diffuse covariance stored at {t}"
                    )));
                };
                self.diffuse_step(model, t, state, pi, error, &mut acc)
            };
            sink.save_state(t, &smoothed, Phase::Smoothed);
        }
        Ok(())
    }

    fn ordinary_step<S: StateSpace + ?Sized>(
        &self,
        model: &S,
        t: usize,
        state: &State,
        error: &PredictionError,
        acc: &mut Accumulators,
    ) -> State {
        let r = &mut acc.r0;
        let n = &mut acc.n0;
        model.transition_transpose(t, r.view_mut());
        transpose_congruence(model, t, n);
        if let (Some(e), f) = (error.residual, error.variance) {
            if f > 0.0 {
                let m = &error.gain;
                let z = model.loading_vector(t);
                let c = (e - m.dot(&*r)) / f;
                model.add_loading(t, r.view_mut(), c);
                let w = n.dot(m);
                let mwm = m.dot(&w);
                add_cross(n, -1.0 / f, &z, &w);
                add_xaxt(n, (mwm + f) / (f * f), &z);
            }
        }

        let a = &state.a + &state.p.dot(&*r);
        let mut v = &state.p - &state.p.dot(&*n).dot(&state.p);
        symmetrize(&mut v);
        clamp_diagonal(&mut v, self.variance_tolerance);
        State::new(a, v)
    }

    fn diffuse_step<S: StateSpace + ?Sized>(
        &self,
        model: &S,
        t: usize,
        state: &State,
        pi: &Array2<f64>,
        error: &PredictionError,
        acc: &mut Accumulators,
    ) -> State {
        let tt = model.transition_matrix(t);
        let z = model.loading_vector(t);
        let zz = outer(&z, &z);
        let f = error.variance;
        let fi = error.diffuse_variance();
        let mi = match &error.diffuse {
            Some(DiffuseInnovation::Covariance { gain, .. }) => Some(gain),
            _ => None,
        };

        match (error.residual, mi) {
            (Some(e), Some(mi)) if fi != 0.0 => {
                let k0 = tt.dot(mi) / fi;
                let k1 = tt.dot(&(&error.gain / fi - mi * (f / (fi * fi))));
                let l0 = &tt - &outer(&k0, &z);
                let l1 = outer(&k1, &z).mapv(|v| -v);

                let r0 = l0.t().dot(&acc.r0);
                let r1 = &z * (e / fi) + l0.t().dot(&acc.r1) + l1.t().dot(&acc.r0);
                let n0 = l0.t().dot(&acc.n0).dot(&l0);
                let n1 = &zz / fi
                    + l0.t().dot(&acc.n1).dot(&l0)
                    + l1.t().dot(&acc.n0).dot(&l0);
                let n2 = &zz * (-f / (fi * fi))
                    + l0.t().dot(&acc.n2).dot(&l0)
                    + l0.t().dot(&acc.n1).dot(&l1)
                    + l1.t().dot(&acc.n1.t()).dot(&l0)
                    + l1.t().dot(&acc.n0).dot(&l1);
                *acc = Accumulators { r0, n0, r1, n1, n2 };
            }
            (Some(e), _) if f > 0.0 => {
                let k0 = tt.dot(&error.gain) / f;
                let l0 = &tt - &outer(&k0, &z);
                acc.r0 = &z * (e / f) + l0.t().dot(&acc.r0);
                acc.r1 = tt.t().dot(&acc.r1);
                acc.n0 = &zz / f + l0.t().dot(&acc.n0).dot(&l0);
                acc.n1 = tt.t().dot(&acc.n1).dot(&l0);
                acc.n2 = tt.t().dot(&acc.n2).dot(&tt);
            }
            _ => {
                acc.r0 = tt.t().dot(&acc.r0);
                acc.r1 = tt.t().dot(&acc.r1);
                acc.n0 = tt.t().dot(&acc.n0).dot(&tt);
                acc.n1 = tt.t().dot(&acc.n1).dot(&tt);
                acc.n2 = tt.t().dot(&acc.n2).dot(&tt);
            }
        }
        symmetrize(&mut acc.n0);
        symmetrize(&mut acc.n2);

        let p = &state.p;
        let a = &state.a + &p.dot(&acc.r0) + pi.dot(&acc.r1);
        let pin1p = pi.dot(&acc.n1).dot(p);
        let mut v = p
            - &p.dot(&acc.n0).dot(p)
            - &pin1p.t()
            - &pin1p
            - &pi.dot(&acc.n2).dot(pi);
        symmetrize(&mut v);
        clamp_diagonal(&mut v, self.variance_tolerance);
        State::new(a, v)
    }
}

impl Default for Smoother {
    fn default() -> Self {
        Self::new(&FilterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diffuse::DiffuseInitializer;
    use crate::ordinary::OrdinaryFilter;
    use crate::storage::{PartialStorage, StateStorage};
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use ssf_model::{Model, SsfData};

    fn filtered(model: &Model, data: &SsfData) -> FilteringResults {
        let mut results = FilteringResults::new();
        let outcome = DiffuseInitializer::default()
            .initialize(model, data, &mut results)
            .unwrap();
        let mut state = outcome.state;
        OrdinaryFilter::default()
            .process(model, data, &mut state, outcome.end, &mut results)
            .unwrap();
        results
    }

    #[test]
    fn single_diffuse_observation() {
        let model = Model::local_level(2.0, 1.0).unwrap();
        let data = SsfData::from(vec![10.0]);
        let mut smoothed = StateStorage::full(Phase::Smoothed);
        Smoother::default()
            .process(&model, &filtered(&model, &data), &mut smoothed)
            .unwrap();
        assert_abs_diff_eq!(smoothed.mean(0).unwrap()[0], 10.0, epsilon = 1e-12);
        assert_abs_diff_eq!(smoothed.covariance(0).unwrap()[(0, 0)], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn last_period_equals_filtered_state() {
        let model = Model::local_linear_trend(1.0, 0.2, 0.5).unwrap();
        let data = SsfData::from(vec![1.0, 2.5, 2.8, 4.1, 5.0, 6.3]);
        let results = filtered(&model, &data);
        let mut concurrent = StateStorage::full(Phase::Concurrent);
        let outcome = DiffuseInitializer::default()
            .initialize(&model, &data, &mut concurrent)
            .unwrap();
        let mut state = outcome.state;
        OrdinaryFilter::default()
            .process(&model, &data, &mut state, outcome.end, &mut concurrent)
            .unwrap();

        let mut smoothed = StateStorage::full(Phase::Smoothed);
        Smoother::default()
            .process(&model, &results, &mut smoothed)
            .unwrap();
        let last = data.len() - 1;
        assert_abs_diff_eq!(
            *smoothed.mean(last).unwrap(),
            *concurrent.mean(last).unwrap(),
            epsilon = 1e-10
        );
        assert_abs_diff_eq!(
            *smoothed.covariance(last).unwrap(),
            *concurrent.covariance(last).unwrap(),
            epsilon = 1e-10
        );
    }

    #[test]
    fn partial_storage_samples_every_other_period() {
        let model = Model::local_level(1.0, 1.0).unwrap();
        let data = SsfData::from(vec![1.0, 2.0, 3.0, 2.0, 1.0]);
        let results = filtered(&model, &data);
        let mut full = StateStorage::full(Phase::Smoothed);
        let mut partial = PartialStorage::new(2, StateStorage::light(Phase::Smoothed));
        Smoother::default()
            .process(&model, &results, &mut (&mut full, &mut partial))
            .unwrap();
        assert_eq!(partial.storage().len(), 3);
        assert_eq!(partial.mean(4), full.mean(4));
        assert!(partial.mean(3).is_none());
    }

    #[test]
    fn rejects_incomplete_results() {
        let model = Model::local_level(1.0, 1.0).unwrap();
        let mut results = FilteringResults::new();
        results.save_error(
            0,
            &PredictionError {
                residual: Some(1.0),
                variance: 1.0,
                gain: array![1.0],
                diffuse: None,
            },
        );
        let err = Smoother::default()
            .process(&model, &results, &mut ())
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid configuration: no stored forecast at 0");
    }

    #[test]
    fn transpose_congruence_matches_dense_product() {
        let model = Model::local_linear_trend(1.0, 1.0, 1.0).unwrap();
        let mut m = array![[1.0, 2.0], [2.0, 5.0]];
        transpose_congruence(&model, 0, &mut m);
        let t = model.transition_matrix(0);
        let expected = t.t().dot(&array![[1.0, 2.0], [2.0, 5.0]]).dot(&t);
        assert_abs_diff_eq!(m, expected, epsilon = 1e-12);
    }
}
