//! Gaussian log-likelihood from the prediction-error decomposition.

use std::f64::consts::PI;

use ndarray::{Array1, Array2};

use crate::config::Scoring;
use crate::sink::ResultsSink;
use crate::state::{DiffuseInnovation, PredictionError};

/// Raw sums of a prediction-error decomposition.
///
/// The log-likelihood is always derived from these sums, so combining,
/// rescaling and evaluation commute. With `m = n − d`:
///
/// ```text
/// ll = −½·(m·log 2π + m·(1 + log(ssq/m)) + logdet + dcorr − mcorr)
/// ```
///
/// `mcorr` is only used by [`Scoring::Marginal`].
#[derive(Debug, Clone, PartialEq)]
pub struct Likelihood {
    scoring: Scoring,
    n: usize,
    d: usize,
    ssq: f64,
    logdet: f64,
    dcorr: f64,
    mcorr: f64,
    residuals: Vec<f64>,
    diffuse_effects: Option<(Array1<f64>, Array2<f64>)>,
}

impl Likelihood {
    /// Empty accumulator for `scoring`.
    pub fn new(scoring: Scoring) -> Self {
        Self {
            scoring,
            n: 0,
            d: 0,
            ssq: 0.0,
            logdet: 0.0,
            dcorr: 0.0,
            mcorr: 0.0,
            residuals: Vec::new(),
            diffuse_effects: None,
        }
    }

    /// Builds a likelihood from its raw sums.
    #[allow(clippy::too_many_arguments)]
    pub fn from_sums(
        scoring: Scoring,
        n: usize,
        d: usize,
        ssq: f64,
        logdet: f64,
        dcorr: f64,
        mcorr: f64,
        residuals: Vec<f64>,
    ) -> Self {
        Self {
            scoring,
            n,
            d,
            ssq,
            logdet,
            dcorr,
            mcorr,
            residuals,
            diffuse_effects: None,
        }
    }

    pub(crate) fn with_diffuse_effects(mut self, effects: Array1<f64>, covariance: Array2<f64>) -> Self {
        self.diffuse_effects = Some((effects, covariance));
        self
    }

    /// Likelihood convention.
    pub fn scoring(&self) -> Scoring {
        self.scoring
    }

    /// Number of observations used, diffuse steps included.
    pub fn n(&self) -> usize {
        self.n
    }

    /// Number of diffuse constraints.
    pub fn d(&self) -> usize {
        self.d
    }

    /// Degrees of freedom `m = n − d`.
    pub fn degrees_of_freedom(&self) -> usize {
        self.n.saturating_sub(self.d)
    }

    /// Sum of squared standardized residuals.
    pub fn ssq(&self) -> f64 {
        self.ssq
    }

    /// `Σ log f` over the non-diffuse steps.
    pub fn log_determinant(&self) -> f64 {
        self.logdet
    }

    /// Diffuse correction.
    pub fn diffuse_correction(&self) -> f64 {
        self.dcorr
    }

    /// Marginal correction `log|X'X|`.
    pub fn marginal_correction(&self) -> f64 {
        self.mcorr
    }

    /// Standardized residuals (empty when not stored).
    pub fn residuals(&self) -> &[f64] {
        &self.residuals
    }

    /// GLS estimate of the diffuse effects and its unscaled covariance
    /// (augmented runs only).
    pub fn diffuse_effects(&self) -> Option<(&Array1<f64>, &Array2<f64>)> {
        self.diffuse_effects.as_ref().map(|(b, v)| (b, v))
    }

    fn corrections(&self) -> f64 {
        match self.scoring {
            Scoring::Profile => self.dcorr,
            Scoring::Marginal => self.dcorr - self.mcorr,
        }
    }

    /// Concentrated log-likelihood; `None` when `m = 0` or the result is
    /// not finite (e.g. a perfect fit).
    pub fn log_likelihood(&self) -> Option<f64> {
        let m = self.degrees_of_freedom();
        if m == 0 {
            return None;
        }
        let m = m as f64;
        let ll = -0.5
            * (m * (2.0 * PI).ln() + m * (1.0 + (self.ssq / m).ln()) + self.logdet + self.corrections());
        ll.is_finite().then_some(ll)
    }

    /// Scale estimate `σ² = ssq/m`.
    pub fn sigma2(&self) -> Option<f64> {
        match self.degrees_of_freedom() {
            0 => None,
            m => Some(self.ssq / m as f64),
        }
    }

    /// Standard error of the residuals `√σ²`.
    pub fn ser(&self) -> Option<f64> {
        self.sigma2().map(f64::sqrt)
    }

    /// `exp((logdet + corrections)/m)`, the factor minimized by
    /// `ssq·factor` in least-squares formulations.
    pub fn factor(&self) -> Option<f64> {
        match self.degrees_of_freedom() {
            0 => None,
            m => Some(((self.logdet + self.corrections()) / m as f64).exp()),
        }
    }

    /// Adds the sums of `other`, for segment-wise evaluation.
    ///
    /// The result is marginal if either part is. Diffuse-effect estimates
    /// do not survive a combination.
    pub fn combine(&self, other: &Likelihood) -> Likelihood {
        let scoring = if self.scoring == Scoring::Marginal || other.scoring == Scoring::Marginal {
            Scoring::Marginal
        } else {
            Scoring::Profile
        };
        let mut residuals = self.residuals.clone();
        residuals.extend_from_slice(&other.residuals);
        Likelihood {
            scoring,
            n: self.n + other.n,
            d: self.d + other.d,
            ssq: self.ssq + other.ssq,
            logdet: self.logdet + other.logdet,
            dcorr: self.dcorr + other.dcorr,
            mcorr: self.mcorr + other.mcorr,
            residuals,
            diffuse_effects: None,
        }
    }

    /// Adjusts for data pre-multiplied by `factor`: `ssq /= factor²`,
    /// which raises the log-likelihood by `m·log(factor)`.
    pub fn rescale(&mut self, factor: f64) {
        if factor == 1.0 {
            return;
        }
        self.ssq /= factor * factor;
        for r in &mut self.residuals {
            *r /= factor;
        }
    }
}

/// Sink accumulating the profile (diffuse) likelihood.
///
/// Exact diffuse steps add `log fi` to the diffuse correction and count as
/// a constraint; other observed steps with `f > 0` add `e²/f` and `log f`.
/// Memory is constant unless residuals are stored.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionErrorDecomposition {
    store_residuals: bool,
    n: usize,
    d: usize,
    ssq: f64,
    logdet: f64,
    dcorr: f64,
    residuals: Vec<f64>,
}

impl PredictionErrorDecomposition {
    /// Creates an empty decomposition.
    pub fn new(store_residuals: bool) -> Self {
        Self {
            store_residuals,
            n: 0,
            d: 0,
            ssq: 0.0,
            logdet: 0.0,
            dcorr: 0.0,
            residuals: Vec::new(),
        }
    }

    /// Current likelihood.
    pub fn likelihood(&self) -> Likelihood {
        Likelihood::from_sums(
            Scoring::Profile,
            self.n,
            self.d,
            self.ssq,
            self.logdet,
            self.dcorr,
            0.0,
            self.residuals.clone(),
        )
    }

    pub(crate) fn add_observation(&mut self, e: f64, f: f64) {
        self.n += 1;
        self.ssq += e * e / f;
        self.logdet += f.ln();
        if self.store_residuals {
            self.residuals.push(e / f.sqrt());
        }
    }
}

impl ResultsSink for PredictionErrorDecomposition {
    fn save_error(&mut self, _t: usize, error: &PredictionError) {
        let Some(e) = error.residual else {
            return;
        };
        if let Some(DiffuseInnovation::Covariance { variance: fi, .. }) = error.diffuse {
            if fi != 0.0 {
                self.n += 1;
                self.d += 1;
                self.dcorr += fi.ln();
                return;
            }
        }
        if error.variance > 0.0 {
            self.add_observation(e, error.variance);
        }
    }
}
