//! Augmented Kalman filter: the diffuse effects are carried as extra
//! columns `B` instead of an infinite covariance.

use ndarray::{Array1, Array2};
use ssf_linalg::{Cholesky, LinalgError, add_xaxt, cholesky, clamp_diagonal, symmetrize};
use ssf_model::{ModelError, Regressors, SsfData, StateSpace};
use tracing::{debug, trace};

use crate::config::{FilterConfig, Scoring};
use crate::error::SsfError;
use crate::likelihood::Likelihood;
use crate::ordinary::{OrdinaryFilter, check_state};
use crate::sink::ResultsSink;
use crate::state::{DiffuseBlock, DiffuseInnovation, Phase, PredictionError, State};

/// Outcome of a collapse attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollapseDecision {
    /// The diffuse effects were folded into `(a, P)` at `at`.
    Collapsed {
        /// Time index of the collapse.
        at: usize,
    },
    /// Not enough information yet; the state was left untouched.
    NotYet,
}

/// Decides when the augmented filter may turn into an ordinary filter.
///
/// Called at the start of every step while the state still carries its
/// constraint block. On [`CollapseDecision::Collapsed`] the implementation
/// must already have folded the diffuse effects into `state.a` and
/// `state.p`; the filter then drops `B` for good.
pub trait Collapser {
    /// Attempts to collapse `state` before processing `t`.
    fn try_collapse(&mut self, _t: usize, _state: &mut State) -> CollapseDecision {
        CollapseDecision::NotYet
    }
}

impl Collapser for () {}

impl<C: Collapser + ?Sized> Collapser for &mut C {
    fn try_collapse(&mut self, t: usize, state: &mut State) -> CollapseDecision {
        (**self).try_collapse(t, state)
    }
}

/// The first member decides.
impl<A: Collapser, B> Collapser for (A, B) {
    fn try_collapse(&mut self, t: usize, state: &mut State) -> CollapseDecision {
        self.0.try_collapse(t, state)
    }
}

/// Summary of an augmented run.
#[derive(Debug, Clone, PartialEq)]
pub struct AugmentedRun {
    /// Number of diffuse effects (state constraints plus diffuse regressors).
    pub diffuse_dim: usize,
    /// Index at which the run collapsed, if it did.
    pub collapsed_at: Option<usize>,
    /// `X'X` of the unfiltered diffuse design `X[t] = Z·T^t·B + x[t]`.
    pub design_crossproduct: Array2<f64>,
}

/// Kalman filter augmented with the constraint block `B`.
///
/// For each observation the sensitivity `E = −(Z·B + x[t])` of the
/// residual to the diffuse effects is emitted with the prediction error,
/// and `B` is updated as `B ← B + M·E/f`. Diffuse regression effects enter
/// as zero columns of `B` with their row of regressors in `E`.
#[derive(Debug, Clone, Copy)]
pub struct AugmentedFilter {
    ordinary: OrdinaryFilter,
    collapsing: bool,
}

impl AugmentedFilter {
    /// Creates a filter using the tolerances and collapsing flag of `config`.
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            ordinary: OrdinaryFilter::new(config),
            collapsing: config.collapsing(),
        }
    }

    /// Filters `data`, optionally with diffuse `regressors`.
    ///
    /// Collapsing is only attempted without regressors, since the
    /// regression effects have no state to be folded into.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | [`SsfError::ModelInvalid`] | invalid model, or fewer regressor rows than observations |
    pub fn process<S, K>(
        &self,
        model: &S,
        data: &SsfData,
        regressors: Option<&Regressors>,
        sink: &mut K,
    ) -> Result<AugmentedRun, SsfError>
    where
        S: StateSpace + ?Sized,
        K: ResultsSink + Collapser + ?Sized,
    {
        if let Some(x) = regressors {
            if x.nobs() < data.len() {
                return Err(ModelError::InvalidRegressors(format!(
                    "{} rows for {} observations",
                    x.nobs(),
                    data.len()
                ))
                .into());
            }
        }
        let extra = regressors.map_or(0, Regressors::diffuse_count);
        let mut state = State::augmented(model, extra);
        check_state(model, &state)?;
        let mut design = state.constraints().cloned();
        let diffuse_dim = design.as_ref().map_or(0, Array2::ncols);
        let mut crossproduct = Array2::zeros((diffuse_dim, diffuse_dim));
        let allow_collapse = self.collapsing && extra == 0;
        let tol = self.ordinary.variance_tolerance();

        let mut collapsed_at = None;
        for t in 0..data.len() {
            let y = data.get(t);
            let x = regressors.map(|r| r.diffuse_row(t));
            if allow_collapse && state.is_diffuse() {
                if let CollapseDecision::Collapsed { at } = sink.try_collapse(t, &mut state) {
                    state.diffuse = None;
                    collapsed_at = Some(at);
                    debug!(at, "augmented filter collapsed");
                    sink.close_diffuse(t);
                }
            }

            if state.is_diffuse() {
                sink.save_state(t, &state, Phase::Forecast);
                let error = self.prediction_error(model, t, y, x.as_ref(), &state);
                sink.save_error(t, &error);
                self.update(&mut state, &error);
                sink.save_state(t, &state, Phase::Concurrent);
                state.predict(model, t, tol);
            } else {
                self.ordinary.step(model, t, y, &mut state, sink);
            }

            if let Some(w) = design.as_mut() {
                if y.is_some() {
                    let row = sensitivity(model, t, w, x.as_ref());
                    add_xaxt(&mut crossproduct, 1.0, &row);
                }
                model.transition_columns(t, w.view_mut());
            }
        }

        if collapsed_at.is_none() {
            sink.close_diffuse(if diffuse_dim == 0 { 0 } else { data.len() });
        }
        Ok(AugmentedRun {
            diffuse_dim,
            collapsed_at,
            design_crossproduct: crossproduct,
        })
    }

    fn prediction_error<S: StateSpace + ?Sized>(
        &self,
        model: &S,
        t: usize,
        y: Option<f64>,
        x: Option<&Array1<f64>>,
        state: &State,
    ) -> PredictionError {
        let mut error = self.ordinary.prediction_error(model, t, y, state);
        if let Some(b) = state.constraints() {
            let mut residuals = sensitivity(model, t, b, x);
            residuals.mapv_inplace(|v| -v);
            error.diffuse = Some(DiffuseInnovation::Constraints { residuals });
        }
        error
    }

    fn update(&self, state: &mut State, error: &PredictionError) {
        let (Some(e), Some(DiffuseInnovation::Constraints { residuals })) =
            (error.residual, &error.diffuse)
        else {
            return;
        };
        let f = error.variance;
        if f <= 0.0 {
            return;
        }
        state.a.scaled_add(e / f, &error.gain);
        if let Some(DiffuseBlock::Constraints(b)) = &mut state.diffuse {
            for (mut col, &ej) in b.columns_mut().into_iter().zip(residuals) {
                col.scaled_add(ej / f, &error.gain);
            }
        }
        add_xaxt(&mut state.p, -1.0 / f, &error.gain);
        clamp_diagonal(&mut state.p, self.ordinary.variance_tolerance());
    }
}

impl Default for AugmentedFilter {
    fn default() -> Self {
        Self::new(&FilterConfig::default())
    }
}

/// `Z·B + [0, x]`: the regressors fill the trailing columns.
fn sensitivity<S: StateSpace + ?Sized>(
    model: &S,
    t: usize,
    b: &Array2<f64>,
    x: Option<&Array1<f64>>,
) -> Array1<f64> {
    let mut row = Array1::zeros(b.ncols());
    model.loading_product(t, b.view(), row.view_mut());
    if let Some(x) = x {
        let offset = row.len() - x.len();
        for (r, v) in row.iter_mut().skip(offset).zip(x) {
            *r += v;
        }
    }
    row
}

#[derive(Debug, Clone, PartialEq)]
struct Collapse {
    effects: Array1<f64>,
    covariance: Array2<f64>,
    ssq_reduction: f64,
    log_determinant: f64,
}

impl Collapse {
    fn from_factor(chol: &Cholesky, q: &Array1<f64>) -> Self {
        let covariance = chol.inverse();
        let effects = covariance.dot(q).mapv(|v| -v);
        Self {
            ssq_reduction: -q.dot(&effects),
            log_determinant: chol.log_determinant(),
            effects,
            covariance,
        }
    }
}

/// Sink accumulating the augmented (de Jong) decomposition.
///
/// While the filter carries `B` it sums `Q = Σ E·Eᵀ/f` and
/// `q = Σ E·e/f` next to the usual `ssq` and `Σ log f`. The diffuse
/// effects are estimated as `δ = −Q⁻¹·q`, which removes `qᵀ·Q⁻¹·q` from
/// `ssq` and adds `log|Q|` to the likelihood.
///
/// As a [`Collapser`], it accepts once at least as many observations as
/// diffuse effects have been seen and `Q` is positive definite, folding
/// `a ← a + B·δ` and `P ← P + B·Q⁻¹·Bᵀ`.
#[derive(Debug, Clone, PartialEq)]
pub struct AugmentedDecomposition {
    store_residuals: bool,
    tolerance: f64,
    n: usize,
    ssq: f64,
    logdet: f64,
    q_matrix: Array2<f64>,
    q_vector: Array1<f64>,
    diffuse_observations: usize,
    residuals: Vec<f64>,
    collapse: Option<Collapse>,
}

impl AugmentedDecomposition {
    /// Creates an empty decomposition; `tolerance` is the Cholesky pivot
    /// tolerance used on `Q` and `X'X`.
    pub fn new(store_residuals: bool, tolerance: f64) -> Self {
        Self {
            store_residuals,
            tolerance,
            n: 0,
            ssq: 0.0,
            logdet: 0.0,
            q_matrix: Array2::zeros((0, 0)),
            q_vector: Array1::zeros(0),
            diffuse_observations: 0,
            residuals: Vec::new(),
            collapse: None,
        }
    }

    /// Creates a decomposition with the settings of `config`.
    pub fn from_config(config: &FilterConfig) -> Self {
        Self::new(config.store_residuals(), config.diffuse_tolerance())
    }

    /// `true` once the decomposition has collapsed the filter.
    pub fn is_collapsed(&self) -> bool {
        self.collapse.is_some()
    }

    /// Finalizes the likelihood of `run`.
    ///
    /// Marginal scoring subtracts `log|X'X|` of the unfiltered design.
    /// With fewer observations than diffuse effects the likelihood has no
    /// degrees of freedom and [`Likelihood::log_likelihood`] is `None`.
    ///
    /// # Errors
    ///
    /// | Variant | Trigger |
    /// |---------|---------|
    /// | [`SsfError::NumericalSingularity`] | `Q` (or `X'X` for marginal scoring) is not positive definite although enough observations were seen |
    pub fn likelihood(
        &self,
        run: &AugmentedRun,
        scoring: Scoring,
    ) -> Result<Likelihood, SsfError> {
        let d = run.diffuse_dim;
        if d == 0 {
            return Ok(Likelihood::from_sums(
                scoring,
                self.n,
                0,
                self.ssq,
                self.logdet,
                0.0,
                0.0,
                self.residuals.clone(),
            ));
        }
        if self.collapse.is_none() && self.diffuse_observations < d {
            debug!(
                seen = self.diffuse_observations,
                d, "too few observations for the diffuse effects"
            );
            return Ok(Likelihood::from_sums(
                scoring,
                self.n,
                d,
                self.ssq,
                self.logdet,
                0.0,
                0.0,
                self.residuals.clone(),
            ));
        }
        let collapse = match &self.collapse {
            Some(c) => c.clone(),
            None => {
                if self.q_matrix.nrows() != d {
                    return Err(LinalgError::DimensionMismatch {
                        expected: d,
                        got: self.q_matrix.nrows(),
                    }
                    .into());
                }
                Collapse::from_factor(&cholesky(&self.q_matrix, self.tolerance)?, &self.q_vector)
            }
        };
        let mcorr = match scoring {
            Scoring::Profile => 0.0,
            Scoring::Marginal => {
                cholesky(&run.design_crossproduct, self.tolerance)?.log_determinant()
            }
        };
        Ok(Likelihood::from_sums(
            scoring,
            self.n,
            d,
            (self.ssq - collapse.ssq_reduction).max(0.0),
            self.logdet,
            collapse.log_determinant,
            mcorr,
            self.residuals.clone(),
        )
        .with_diffuse_effects(collapse.effects, collapse.covariance))
    }

    fn accumulate(&mut self, e: f64, f: f64, sensitivity: &Array1<f64>) {
        let k = sensitivity.len();
        if self.q_matrix.nrows() != k {
            self.q_matrix = Array2::zeros((k, k));
            self.q_vector = Array1::zeros(k);
        }
        add_xaxt(&mut self.q_matrix, 1.0 / f, sensitivity);
        self.q_vector.scaled_add(e / f, sensitivity);
        self.diffuse_observations += 1;
    }
}

impl ResultsSink for AugmentedDecomposition {
    fn save_error(&mut self, _t: usize, error: &PredictionError) {
        let Some(e) = error.residual else {
            return;
        };
        let f = error.variance;
        if f <= 0.0 {
            return;
        }
        self.n += 1;
        self.ssq += e * e / f;
        self.logdet += f.ln();
        match &error.diffuse {
            Some(DiffuseInnovation::Constraints { residuals }) => self.accumulate(e, f, residuals),
            _ => {
                if self.store_residuals {
                    self.residuals.push(e / f.sqrt());
                }
            }
        }
    }
}

impl Collapser for AugmentedDecomposition {
    fn try_collapse(&mut self, t: usize, state: &mut State) -> CollapseDecision {
        let Some(b) = state.constraints() else {
            return CollapseDecision::NotYet;
        };
        let d = b.ncols();
        if self.diffuse_observations < d || self.q_matrix.nrows() != d {
            trace!(t, seen = self.diffuse_observations, "collapse declined");
            return CollapseDecision::NotYet;
        }
        let chol = match cholesky(&self.q_matrix, self.tolerance) {
            Ok(chol) => chol,
            Err(err) => {
                trace!(t, %err, "collapse declined");
                return CollapseDecision::NotYet;
            }
        };
        let collapse = Collapse::from_factor(&chol, &self.q_vector);
        let shift = b.dot(&collapse.effects);
        let spread = b.dot(&collapse.covariance).dot(&b.t());
        state.a += &shift;
        state.p += &spread;
        symmetrize(&mut state.p);
        self.collapse = Some(collapse);
        CollapseDecision::Collapsed { at: t }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::likelihood::PredictionErrorDecomposition;
    use crate::storage::StateStorage;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use ssf_model::Model;

    fn local_level() -> Model {
        Model::local_level(2.0, 1.0).unwrap()
    }

    fn series() -> SsfData {
        SsfData::from_nan_coded(&[10.0, f64::NAN, 12.0, 11.0, 13.0])
    }

    #[test]
    fn collapse_matches_exact_diffuse_state() {
        let model = local_level();
        let mut decomposition = AugmentedDecomposition::new(true, 1e-9);
        let mut forecasts = StateStorage::full(Phase::Forecast);
        let run = AugmentedFilter::default()
            .process(&model, &series(), None, &mut (&mut decomposition, &mut forecasts))
            .unwrap();
        assert_eq!(run.collapsed_at, Some(1));
        assert!(decomposition.is_collapsed());
        // prediction for t = 1 after folding δ = 10
        assert_abs_diff_eq!(forecasts.mean(1).unwrap()[0], 10.0, epsilon = 1e-12);
        assert_abs_diff_eq!(forecasts.covariance(1).unwrap()[(0, 0)], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn profile_matches_prediction_error_decomposition() {
        let model = local_level();
        let data = series();
        let config = FilterConfig::default();

        let mut decomposition = AugmentedDecomposition::from_config(&config);
        let run = AugmentedFilter::new(&config)
            .process(&model, &data, None, &mut decomposition)
            .unwrap();
        let augmented = decomposition.likelihood(&run, Scoring::Profile).unwrap();

        let mut ped = PredictionErrorDecomposition::new(true);
        let outcome = crate::diffuse::DiffuseInitializer::new(&config)
            .initialize(&model, &data, &mut ped)
            .unwrap();
        let mut state = outcome.state;
        OrdinaryFilter::new(&config)
            .process(&model, &data, &mut state, outcome.end, &mut ped)
            .unwrap();
        let exact = ped.likelihood();

        assert_eq!(augmented.degrees_of_freedom(), exact.degrees_of_freedom());
        assert_abs_diff_eq!(
            augmented.log_likelihood().unwrap(),
            exact.log_likelihood().unwrap(),
            epsilon = 1e-9
        );
        assert_eq!(augmented.residuals().len(), exact.residuals().len());
        for (a, b) in augmented.residuals().iter().zip(exact.residuals()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn uncollapsed_run_estimates_effects() {
        let model = local_level();
        let config = FilterConfig::default().with_collapsing(false);
        let mut decomposition = AugmentedDecomposition::from_config(&config);
        let run = AugmentedFilter::new(&config)
            .process(&model, &series(), None, &mut decomposition)
            .unwrap();
        assert_eq!(run.collapsed_at, None);
        let ll = decomposition.likelihood(&run, Scoring::Profile).unwrap();
        let (effects, covariance) = ll.diffuse_effects().unwrap();
        assert_eq!(effects.len(), 1);
        assert!(covariance[(0, 0)] > 0.0);
        // the initial level is pulled towards the first observations
        assert!(effects[0] > 9.0 && effects[0] < 13.0);
    }

    #[test]
    fn regressors_widen_the_constraint_block() {
        let model = Model::new(
            ssf_model::Dynamics::Noise { variance: 1.0 },
            ssf_model::Measurement::Single {
                position: 0,
                variance: 0.0,
            },
        )
        .unwrap();
        let x = array![[1.0], [2.0], [3.0], [4.0]];
        let regressors = Regressors::all_diffuse(x).unwrap();
        let data = SsfData::from(vec![2.1, 3.9, 6.2, 7.8]);
        let mut decomposition = AugmentedDecomposition::new(false, 1e-9);
        let run = AugmentedFilter::default()
            .process(&model, &data, Some(&regressors), &mut decomposition)
            .unwrap();
        assert_eq!(run.diffuse_dim, 1);
        assert_eq!(run.collapsed_at, None);
        assert_abs_diff_eq!(run.design_crossproduct[(0, 0)], 30.0, epsilon = 1e-12);

        let ll = decomposition.likelihood(&run, Scoring::Marginal).unwrap();
        let (beta, _) = ll.diffuse_effects().unwrap();
        // OLS slope of y on x through the origin
        let expected = (2.1 + 2.0 * 3.9 + 3.0 * 6.2 + 4.0 * 7.8) / 30.0;
        assert_abs_diff_eq!(beta[0], expected, epsilon = 1e-10);
        assert_abs_diff_eq!(ll.marginal_correction(), 30.0_f64.ln(), epsilon = 1e-10);
        assert_eq!(ll.degrees_of_freedom(), 3);
    }

    #[test]
    fn short_regressors_are_rejected() {
        let model = local_level();
        let regressors = Regressors::all_diffuse(array![[1.0]]).unwrap();
        let err = AugmentedFilter::default()
            .process(
                &model,
                &series(),
                Some(&regressors),
                &mut AugmentedDecomposition::new(false, 1e-9),
            )
            .unwrap_err();
        assert!(matches!(err, SsfError::ModelInvalid(ModelError::InvalidRegressors(_))));
    }

    #[test]
    fn unit_collapser_never_collapses() {
        let model = local_level();
        let run = AugmentedFilter::default()
            .process(&model, &series(), None, &mut ())
            .unwrap();
        assert_eq!(run.collapsed_at, None);
        assert_eq!(run.diffuse_dim, 1);
    }

    #[test]
    fn too_few_observations_leave_the_likelihood_undefined() {
        let model = Model::local_linear_trend(1.0, 0.1, 1.0).unwrap();
        let data = SsfData::from(vec![5.0]);
        let mut decomposition = AugmentedDecomposition::new(true, 1e-9);
        let run = AugmentedFilter::default()
            .process(&model, &data, None, &mut decomposition)
            .unwrap();
        for scoring in [Scoring::Profile, Scoring::Marginal] {
            let ll = decomposition.likelihood(&run, scoring).unwrap();
            assert_eq!(ll.n(), 1);
            assert_eq!(ll.d(), 2);
            assert_eq!(ll.degrees_of_freedom(), 0);
            assert_eq!(ll.log_likelihood(), None);
            assert!(ll.diffuse_effects().is_none());
        }
    }

    #[test]
    fn rank_deficient_constraints_still_fail() {
        let model = Model::new(
            ssf_model::Dynamics::Matrices(
                ssf_model::MatrixDynamics::new(ndarray::Array2::eye(2), ndarray::Array2::eye(2))
                    .with_diffuse_constraints(array![[1.0, 1.0], [1.0, 1.0]]),
            ),
            ssf_model::Measurement::Sum { variance: 1.0 },
        )
        .unwrap();
        let data = SsfData::from(vec![1.0, 2.0, 1.5, 3.0, 2.5]);
        let mut decomposition = AugmentedDecomposition::new(false, 1e-9);
        let result = AugmentedFilter::default()
            .process(&model, &data, None, &mut decomposition)
            .and_then(|run| decomposition.likelihood(&run, Scoring::Profile));
        assert!(matches!(result, Err(SsfError::NumericalSingularity(_))));
    }
}
