//! Parameters-to-likelihood adapter for external optimizers.

use argmin::core::CostFunction;
use ssf_model::{ModelError, Regressors, SsfData, StateSpace};

use crate::config::FilterConfig;
use crate::error::SsfError;
use crate::likelihood::Likelihood;
use crate::toolkit;

/// Maps a parameter vector to the likelihood of a fixed series.
///
/// `builder` turns parameters into a model; every evaluation builds a
/// fresh model and filter, so nothing is retained between calls.
/// Implements [`CostFunction`] (negative log-likelihood) for `argmin`.
///
/// # Example
///
/// ```
/// use ssf_filter::{FilterConfig, LikelihoodFunction};
/// use ssf_model::{Model, SsfData};
///
/// let data = SsfData::from(vec![1.0, 1.4, 0.9, 1.7, 1.2, 1.6]);
/// let f = LikelihoodFunction::new(
///     |p: &[f64]| Model::local_level(p[0].exp(), 1.0),
///     data,
///     FilterConfig::default(),
/// );
/// assert!(f.objective(&[0.0]).is_finite());
/// ```
#[derive(Debug, Clone)]
pub struct LikelihoodFunction<F> {
    builder: F,
    data: SsfData,
    regressors: Option<Regressors>,
    config: FilterConfig,
}

impl<F, M> LikelihoodFunction<F>
where
    F: Fn(&[f64]) -> Result<M, ModelError>,
    M: StateSpace,
{
    /// Creates an adapter over `data`.
    pub fn new(builder: F, data: SsfData, config: FilterConfig) -> Self {
        Self {
            builder,
            data,
            regressors: None,
            config,
        }
    }

    /// Adds diffuse regression effects (evaluated with the augmented filter).
    pub fn with_regressors(mut self, regressors: Regressors) -> Self {
        self.regressors = Some(regressors);
        self
    }

    /// The observed series.
    pub fn data(&self) -> &SsfData {
        &self.data
    }

    /// Likelihood at `params`.
    ///
    /// # Errors
    ///
    /// Any error of the builder or of [`toolkit::likelihood`].
    pub fn evaluate(&self, params: &[f64]) -> Result<Likelihood, SsfError> {
        let model = (self.builder)(params)?;
        match &self.regressors {
            Some(x) => toolkit::augmented_likelihood(&model, &self.data, Some(x), &self.config),
            None => toolkit::likelihood(&model, &self.data, &self.config),
        }
    }

    /// Negative log-likelihood, or `f64::MAX` when it is undefined.
    pub fn objective(&self, params: &[f64]) -> f64 {
        match self.evaluate(params).map(|ll| ll.log_likelihood()) {
            Ok(Some(ll)) => -ll,
            _ => f64::MAX,
        }
    }

    /// Standardized residuals at `params`.
    ///
    /// # Errors
    ///
    /// See [`LikelihoodFunction::evaluate`].
    pub fn residuals(&self, params: &[f64]) -> Result<Vec<f64>, SsfError> {
        self.evaluate(params).map(|ll| ll.residuals().to_vec())
    }
}

impl<F, M> CostFunction for LikelihoodFunction<F>
where
    F: Fn(&[f64]) -> Result<M, ModelError>,
    M: StateSpace,
{
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        Ok(self.objective(params))
    }
}
