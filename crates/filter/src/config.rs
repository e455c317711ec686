//! Configuration for filtering runs.

use serde::Deserialize;
use ssf_model::{SsfData, StateSpace};

use crate::error::SsfError;

/// Algorithm used to handle the initial conditions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Chosen from the model and the data, see [`Strategy::select`].
    #[default]
    Auto,
    /// Plain Kalman filter; diffuse directions are ignored.
    Ordinary,
    /// Exact diffuse initialization with an explicit diffuse covariance.
    Diffuse,
    /// Constraint-augmented filter with optional collapsing.
    Augmented,
    /// Chandrasekhar recursions for time-invariant models.
    Fast,
}

impl Strategy {
    /// Resolves [`Strategy::Auto`]; any other strategy is returned as is.
    ///
    /// Marginal scoring needs the augmented filter. Without stored states,
    /// a time-invariant model on complete data runs the fast filter. Other
    /// diffuse models use the exact diffuse initializer.
    pub fn select<S: StateSpace + ?Sized>(
        self,
        model: &S,
        data: &SsfData,
        scoring: Scoring,
        needs_states: bool,
    ) -> Strategy {
        if self != Strategy::Auto {
            return self;
        }
        if scoring == Scoring::Marginal {
            Strategy::Augmented
        } else if !needs_states && model.is_time_invariant() && !data.has_missing() {
            Strategy::Fast
        } else if model.is_diffuse() {
            Strategy::Diffuse
        } else {
            Strategy::Ordinary
        }
    }
}

/// Likelihood convention.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scoring {
    /// Diffuse likelihood, concentrated in the scale.
    #[default]
    Profile,
    /// Marginal likelihood (adds the `log|X'X|` correction).
    Marginal,
}

/// Settings shared by the filters, the smoother and the likelihood.
///
/// # Example
///
/// ```
/// use ssf_filter::{FilterConfig, Scoring, Strategy};
///
/// let config = FilterConfig::new()
///     .with_strategy(Strategy::Augmented)
///     .with_scoring(Scoring::Marginal);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterConfig {
    #[serde(default)]
    strategy: Strategy,
    #[serde(default)]
    scoring: Scoring,
    #[serde(default = "default_true")]
    collapsing: bool,
    #[serde(default = "default_tolerance")]
    variance_tolerance: f64,
    #[serde(default = "default_tolerance")]
    diffuse_tolerance: f64,
    #[serde(default = "default_fast_epsilon")]
    fast_epsilon: f64,
    #[serde(default = "default_true")]
    store_residuals: bool,
}

fn default_true() -> bool {
    true
}
fn default_tolerance() -> f64 {
    1e-9
}
fn default_fast_epsilon() -> f64 {
    1e-10
}

impl FilterConfig {
    /// Creates the default configuration.
    ///
    /// Defaults: `Auto` strategy, `Profile` scoring, collapsing on,
    /// tolerances `1e-9`, fast epsilon `1e-10`, residuals stored.
    pub fn new() -> Self {
        Self {
            strategy: Strategy::Auto,
            scoring: Scoring::Profile,
            collapsing: true,
            variance_tolerance: default_tolerance(),
            diffuse_tolerance: default_tolerance(),
            fast_epsilon: default_fast_epsilon(),
            store_residuals: true,
        }
    }

    /// Sets the initialization strategy.
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the likelihood convention.
    pub fn with_scoring(mut self, scoring: Scoring) -> Self {
        self.scoring = scoring;
        self
    }

    /// Enables or disables collapsing in the augmented filter.
    pub fn with_collapsing(mut self, collapsing: bool) -> Self {
        self.collapsing = collapsing;
        self
    }

    /// Sets the threshold below which prediction variances are zero.
    pub fn with_variance_tolerance(mut self, tolerance: f64) -> Self {
        self.variance_tolerance = tolerance;
        self
    }

    /// Sets the relative tolerance of the diffuse phase.
    pub fn with_diffuse_tolerance(mut self, tolerance: f64) -> Self {
        self.diffuse_tolerance = tolerance;
        self
    }

    /// Sets the Chandrasekhar threshold.
    pub fn with_fast_epsilon(mut self, epsilon: f64) -> Self {
        self.fast_epsilon = epsilon;
        self
    }

    /// Keeps or drops the standardized residuals in the likelihood.
    pub fn with_store_residuals(mut self, store: bool) -> Self {
        self.store_residuals = store;
        self
    }

    /// Returns the initialization strategy.
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Returns the likelihood convention.
    pub fn scoring(&self) -> Scoring {
        self.scoring
    }

    /// Returns `true` when the augmented filter may collapse.
    pub fn collapsing(&self) -> bool {
        self.collapsing
    }

    /// Returns the prediction-variance threshold.
    pub fn variance_tolerance(&self) -> f64 {
        self.variance_tolerance
    }

    /// Returns the relative diffuse tolerance.
    pub fn diffuse_tolerance(&self) -> f64 {
        self.diffuse_tolerance
    }

    /// Returns the Chandrasekhar threshold.
    pub fn fast_epsilon(&self) -> f64 {
        self.fast_epsilon
    }

    /// Returns `true` when residuals are stored.
    pub fn store_residuals(&self) -> bool {
        self.store_residuals
    }

    /// Validates this configuration.
    ///
    /// Every tolerance must be finite and positive. Marginal scoring
    /// requires the augmented (or automatic) strategy.
    pub fn validate(&self) -> Result<(), SsfError> {
        for (name, value) in [
            ("variance_tolerance", self.variance_tolerance),
            ("diffuse_tolerance", self.diffuse_tolerance),
            ("fast_epsilon", self.fast_epsilon),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(SsfError::InvalidConfig(format!(
                    "{name} must be finite and positive, got {value}"
                )));
            }
        }
        if self.scoring == Scoring::Marginal
            && !matches!(self.strategy, Strategy::Auto | Strategy::Augmented)
        {
            return Err(SsfError::InvalidConfig(format!(
                "marginal scoring requires the augmented filter, got {:?}",
                self.strategy
            )));
        }
        Ok(())
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self::new()
    }
}
