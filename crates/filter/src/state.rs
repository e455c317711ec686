//! Filter state and prediction-error records.

use ndarray::{Array1, Array2};
use ssf_linalg::clamp_diagonal;
use ssf_model::StateSpace;

/// Tag attached to every saved state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// One-step-ahead prediction `a[t|t-1]`.
    Forecast,
    /// After the update with `y[t]`.
    Concurrent,
    /// Conditional on the whole series.
    Smoothed,
}

/// Diffuse part of a state, while it lasts.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffuseBlock {
    /// Diffuse covariance `Pi` (exact diffuse initialization).
    Covariance(Array2<f64>),
    /// Constraint matrix `B` (augmented filter), one column per effect.
    Constraints(Array2<f64>),
}

/// Conditional mean and covariance of the state.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    /// Mean `a`.
    pub a: Array1<f64>,
    /// Covariance `P`, symmetric.
    pub p: Array2<f64>,
    /// Diffuse part, `None` once resolved.
    pub diffuse: Option<DiffuseBlock>,
}

impl State {
    /// Creates a state without diffuse part.
    pub fn new(a: Array1<f64>, p: Array2<f64>) -> Self {
        Self {
            a,
            p,
            diffuse: None,
        }
    }

    /// Initial state ignoring the diffuse directions.
    pub fn initial<S: StateSpace + ?Sized>(model: &S) -> Self {
        Self::new(model.initial_mean(), model.initial_covariance())
    }

    /// Initial state carrying `Pi = B·Bᵀ`.
    pub fn diffuse<S: StateSpace + ?Sized>(model: &S) -> Self {
        let mut state = Self::initial(model);
        if model.is_diffuse() {
            state.diffuse = Some(DiffuseBlock::Covariance(model.diffuse_covariance()));
        }
        state
    }

    /// Initial state carrying the constraint matrix `B`, widened by
    /// `extra` zero columns (diffuse regression effects).
    pub fn augmented<S: StateSpace + ?Sized>(model: &S, extra: usize) -> Self {
        let mut state = Self::initial(model);
        let b = model.diffuse_constraints();
        let (n, d) = b.dim();
        if d + extra > 0 {
            let mut wide = Array2::zeros((n, d + extra));
            wide.slice_mut(ndarray::s![.., ..d]).assign(&b);
            state.diffuse = Some(DiffuseBlock::Constraints(wide));
        }
        state
    }

    /// State dimension.
    pub fn dim(&self) -> usize {
        self.a.len()
    }

    /// `true` while a diffuse part is carried.
    pub fn is_diffuse(&self) -> bool {
        self.diffuse.is_some()
    }

    /// Diffuse covariance, when the state carries one.
    pub fn diffuse_covariance(&self) -> Option<&Array2<f64>> {
        match &self.diffuse {
            Some(DiffuseBlock::Covariance(pi)) => Some(pi),
            _ => None,
        }
    }

    /// Constraint matrix, when the state carries one.
    pub fn constraints(&self) -> Option<&Array2<f64>> {
        match &self.diffuse {
            Some(DiffuseBlock::Constraints(b)) => Some(b),
            _ => None,
        }
    }

    /// Moves the state from `t` to `t + 1`:
    /// `a ← T·a`, `P ← T·P·Tᵀ + V`, and `Pi ← T·Pi·Tᵀ` or `B ← T·B`.
    pub(crate) fn predict<S: StateSpace + ?Sized>(&mut self, model: &S, t: usize, tol: f64) {
        model.transition(t, self.a.view_mut());
        model.transition_congruence(t, self.p.view_mut());
        model.add_process_noise(t, self.p.view_mut());
        clamp_diagonal(&mut self.p, tol);
        match &mut self.diffuse {
            Some(DiffuseBlock::Covariance(pi)) => {
                model.transition_congruence(t, pi.view_mut());
                clamp_diagonal(pi, tol);
            }
            Some(DiffuseBlock::Constraints(b)) => model.transition_columns(t, b.view_mut()),
            None => {}
        }
    }
}

/// Diffuse part of a prediction error.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffuseInnovation {
    /// Exact diffuse step: `fi = Z·Pi·Zᵀ` and `Mi = Pi·Zᵀ`.
    Covariance {
        /// Diffuse variance `fi`, zero when negligible.
        variance: f64,
        /// Diffuse gain numerator `Mi`.
        gain: Array1<f64>,
    },
    /// Augmented step: `E = -(Z·B + x)`, one entry per diffuse effect.
    Constraints {
        /// Sensitivities of the residual to the diffuse effects.
        residuals: Array1<f64>,
    },
}

/// One-step-ahead prediction error at a given time.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionError {
    /// `y − Z·a`, `None` when the observation is missing.
    pub residual: Option<f64>,
    /// `f = Z·P·Zᵀ + H`, clamped to zero below tolerance.
    pub variance: f64,
    /// Gain numerator `M = P·Zᵀ`.
    pub gain: Array1<f64>,
    /// Diffuse analogues, during the diffuse phase.
    pub diffuse: Option<DiffuseInnovation>,
}

impl PredictionError {
    /// `true` when no observation was available.
    pub fn is_missing(&self) -> bool {
        self.residual.is_none()
    }

    /// `e/√f`, or `None` when missing or degenerate.
    pub fn standardized(&self) -> Option<f64> {
        match self.residual {
            Some(e) if self.variance > 0.0 => Some(e / self.variance.sqrt()),
            _ => None,
        }
    }

    /// Diffuse variance `fi`, or `0` outside exact diffuse steps.
    pub fn diffuse_variance(&self) -> f64 {
        match &self.diffuse {
            Some(DiffuseInnovation::Covariance { variance, .. }) => *variance,
            _ => 0.0,
        }
    }

    /// `true` for an observed exact diffuse step with non-zero `fi`.
    pub fn is_diffuse_step(&self) -> bool {
        !self.is_missing() && self.diffuse_variance() != 0.0
    }
}
