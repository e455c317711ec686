//! Chandrasekhar-type recursions for time-invariant models.

use ndarray::{Array1, Array2};
use ssf_linalg::{add_xaxt, frobenius_norm, ldl_pivoted};
use ssf_model::{SsfData, StateSpace};
use tracing::debug;

use crate::config::FilterConfig;
use crate::diffuse::DiffuseInitializer;
use crate::error::SsfError;
use crate::ordinary::check_state;
use crate::sink::ResultsSink;
use crate::state::{PredictionError, State};

/// Summary of a fast run.
#[derive(Debug, Clone, PartialEq)]
pub struct FastRun {
    /// First index using the frozen gain, if the recursion converged.
    pub steady_position: Option<usize>,
    /// Last gain `M/f`.
    pub gain: Array1<f64>,
    /// Last prediction variance `f`.
    pub variance: f64,
    /// First index handled by the fast recursion.
    pub diffuse_end: usize,
    /// Prediction of the state mean after the last observation.
    pub prediction: Array1<f64>,
}

/// Kalman filter propagating the covariance increments instead of `P`.
///
/// With `P[t+1] − P[t] = L·S·Lᵀ` and `g = (Z·L)ᵀ`:
///
/// ```text
/// f ← f + gᵀ·S·g
/// M ← M + L·S·g
/// L ← T·(L − M·gᵀ/f)        (previous M and f)
/// S ← S − S·g·gᵀ·S / f      (new f)
/// ```
///
/// Each step costs `O(n·r)` for an increment of rank `r` instead of the
/// `O(n²)` covariance recursion. Once `‖L‖²·max|S| <= ε·f₀` the gain is
/// frozen; for a rank-one increment this is the pair of conditions
/// `|Z·L| <= ε·f₀` and `‖L‖ < ε` up to scaling. Only prediction errors are
/// reported to the sink; the run keeps no covariance.
///
/// A prediction variance below tolerance carries no information: the step
/// is reported with `f = 0`, the mean is not updated and the terms divided
/// by `f` are dropped, as in the ordinary filter.
#[derive(Debug, Clone, Copy)]
pub struct FastFilter {
    initializer: DiffuseInitializer,
    epsilon: f64,
    variance_tolerance: f64,
}

impl FastFilter {
    /// Creates a filter using the settings of `config`.
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            initializer: DiffuseInitializer::new(config),
            epsilon: config.fast_epsilon(),
            variance_tolerance: config.variance_tolerance(),
        }
    }

    /// Filters `data`; a diffuse model first goes through the exact
    /// diffuse initializer, which reports to `sink` as usual.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | [`SsfError::FastFilterUnsupported`] | time-varying model or missing data |
    /// | [`SsfError::ModelInvalid`] | the model fails validation |
    /// | [`SsfError::NumericalSingularity`] | rank-deficient diffuse constraints or an unfactorable increment |
    pub fn process<S, K>(
        &self,
        model: &S,
        data: &SsfData,
        sink: &mut K,
    ) -> Result<FastRun, SsfError>
    where
        S: StateSpace + ?Sized,
        K: ResultsSink + ?Sized,
    {
        if !model.is_time_invariant() {
            return Err(SsfError::FastFilterUnsupported("time-varying model".into()));
        }
        if data.has_missing() {
            return Err(SsfError::FastFilterUnsupported("missing observations".into()));
        }

        let (state, start) = if model.is_diffuse() {
            let outcome = self.initializer.initialize(model, data, sink)?;
            (outcome.state, outcome.end)
        } else {
            let state = State::initial(model);
            check_state(model, &state)?;
            sink.close_diffuse(0);
            (state, 0)
        };
        let State { mut a, p, .. } = state;

        let mut m = Array1::zeros(a.len());
        model.loading_product(0, p.view(), m.view_mut());
        let mut f = self.clamp(model.loading_dot(0, m.view()) + model.observation_variance(0));
        if start >= data.len() {
            return Ok(FastRun {
                steady_position: None,
                gain: gain(&m, f),
                variance: f,
                diffuse_end: start,
                prediction: a,
            });
        }

        let (mut l, mut s) = self.increment(model, &p, &m, f)?;
        let mut threshold = self.epsilon * f;
        let mut steady_position = converged(&l, &s, threshold).then_some(start);

        for t in start..data.len() {
            let Some(y) = data.get(t) else {
                return Err(SsfError::FastFilterUnsupported(format!(
                    "missing observation at {t}"
                )));
            };
            let e = y - model.loading_dot(t, a.view());
            sink.save_error(
                t,
                &PredictionError {
                    residual: Some(e),
                    variance: f,
                    gain: m.clone(),
                    diffuse: None,
                },
            );
            if f > 0.0 {
                a.scaled_add(e / f, &m);
            }
            model.transition(t, a.view_mut());

            if steady_position.is_some() {
                continue;
            }
            let mut g = Array1::zeros(l.ncols());
            model.loading_product(t, l.view(), g.view_mut());
            let sg = s.dot(&g);
            let f_next = self.clamp(f + g.dot(&sg));
            let dm = l.dot(&sg);
            for (j, mut col) in l.columns_mut().into_iter().enumerate() {
                if f > 0.0 {
                    col.scaled_add(-g[j] / f, &m);
                }
                model.transition(t, col);
            }
            m += &dm;
            f = f_next;
            if f > 0.0 {
                add_xaxt(&mut s, -1.0 / f, &sg);
                if threshold <= 0.0 {
                    threshold = self.epsilon * f;
                }
            }
            if converged(&l, &s, threshold) {
                steady_position = Some(t + 1);
                debug!(position = t + 1, "fast filter reached steady state");
            }
        }

        Ok(FastRun {
            steady_position,
            gain: gain(&m, f),
            variance: f,
            diffuse_end: start,
            prediction: a,
        })
    }

    /// Zeroes variances below tolerance, `NaN` included.
    fn clamp(&self, f: f64) -> f64 {
        if f >= self.variance_tolerance { f } else { 0.0 }
    }

    /// Factors `ΔP = T·(P − M·Mᵀ/f)·Tᵀ + V − P`.
    fn increment<S: StateSpace + ?Sized>(
        &self,
        model: &S,
        p: &Array2<f64>,
        m: &Array1<f64>,
        f: f64,
    ) -> Result<(Array2<f64>, Array2<f64>), SsfError> {
        let mut next = p.clone();
        if f > 0.0 {
            add_xaxt(&mut next, -1.0 / f, m);
        }
        model.transition_congruence(0, next.view_mut());
        model.add_process_noise(0, next.view_mut());
        let delta = &next - p;
        let (l, d) = ldl_pivoted(&delta, self.epsilon)?.into_parts();
        Ok((l, Array2::from_diag(&d)))
    }
}

fn gain(m: &Array1<f64>, f: f64) -> Array1<f64> {
    if f > 0.0 { m / f } else { Array1::zeros(m.len()) }
}

/// `‖L‖²·max|S| <= threshold`.
///
/// Stands in for the scalar pair `|Z·L| <= ε·f₀`, `‖L‖ < ε` of the
/// rank-one recursion: for `ΔP = L·S·Lᵀ` of any rank, `‖L‖²·max|S|`
/// bounds every entry of `ΔP` and the change `Z·ΔP·Zᵀ` of `f`.
fn converged(l: &Array2<f64>, s: &Array2<f64>, threshold: f64) -> bool {
    let scale = s.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    frobenius_norm(l).powi(2) * scale <= threshold
}

impl Default for FastFilter {
    fn default() -> Self {
        Self::new(&FilterConfig::default())
    }
}
