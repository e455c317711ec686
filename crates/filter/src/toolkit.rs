//! One-call entry points choosing the algorithm from the configuration.

use ndarray::Array2;
use ssf_model::{Regressors, SsfData, StateSpace};
use tracing::debug;

use crate::augmented::{AugmentedDecomposition, AugmentedFilter};
use crate::config::{FilterConfig, Strategy};
use crate::diffuse::DiffuseInitializer;
use crate::error::SsfError;
use crate::fast::FastFilter;
use crate::fixed_point::{FixedPointEstimates, FixedPointSmoother};
use crate::likelihood::{Likelihood, PredictionErrorDecomposition};
use crate::ordinary::OrdinaryFilter;
use crate::sink::ResultsSink;
use crate::smoother::Smoother;
use crate::state::{Phase, State};
use crate::storage::{FilteringResults, StateStorage};

fn check_input(data: &SsfData, config: &FilterConfig) -> Result<(), SsfError> {
    config.validate()?;
    if data.is_empty() {
        return Err(SsfError::EmptyData);
    }
    Ok(())
}

fn run<S, K>(
    model: &S,
    data: &SsfData,
    config: &FilterConfig,
    strategy: Strategy,
    sink: &mut K,
) -> Result<(), SsfError>
where
    S: StateSpace + ?Sized,
    K: ResultsSink + ?Sized,
{
    match strategy {
        Strategy::Auto | Strategy::Diffuse => {
            let outcome = DiffuseInitializer::new(config).initialize(model, data, sink)?;
            let mut state = outcome.state;
            OrdinaryFilter::new(config).process(model, data, &mut state, outcome.end, sink)
        }
        Strategy::Ordinary => {
            let mut state = State::initial(model);
            sink.close_diffuse(0);
            OrdinaryFilter::new(config).process(model, data, &mut state, 0, sink)
        }
        Strategy::Augmented => {
            let mut pair = (AugmentedDecomposition::from_config(config), sink);
            AugmentedFilter::new(config)
                .process(model, data, None, &mut pair)
                .map(|_| ())
        }
        Strategy::Fast => FastFilter::new(config).process(model, data, sink).map(|_| ()),
    }
}

/// Filters `data`, reporting to `sink`; returns the strategy used.
///
/// `Auto` picks the exact diffuse filter for diffuse models and the
/// ordinary filter otherwise (states are assumed to be needed).
/// The ordinary strategy ignores the diffuse constraints of the model.
///
/// # Errors
///
/// | Variant | Trigger |
/// |---------|---------|
/// | [`SsfError::EmptyData`] | `data` is empty |
/// | [`SsfError::InvalidConfig`] | `config` fails validation |
/// | any other | see the selected filter |
#[tracing::instrument(skip_all, fields(n = data.len()))]
pub fn filter<S, K>(
    model: &S,
    data: &SsfData,
    config: &FilterConfig,
    sink: &mut K,
) -> Result<Strategy, SsfError>
where
    S: StateSpace + ?Sized,
    K: ResultsSink + ?Sized,
{
    check_input(data, config)?;
    let strategy = config
        .strategy()
        .select(model, data, config.scoring(), true);
    debug!(?strategy, "strategy selected");
    run(model, data, config, strategy, sink)?;
    Ok(strategy)
}

/// Log-likelihood of `data`.
///
/// `Auto` runs the fast filter when the model is time-invariant and the
/// data complete, the augmented filter for marginal scoring, and the
/// exact diffuse filter otherwise.
///
/// # Errors
///
/// See [`filter`]; the augmented path adds those of
/// [`augmented_likelihood`].
#[tracing::instrument(skip_all, fields(n = data.len()))]
pub fn likelihood<S: StateSpace + ?Sized>(
    model: &S,
    data: &SsfData,
    config: &FilterConfig,
) -> Result<Likelihood, SsfError> {
    check_input(data, config)?;
    let strategy = config
        .strategy()
        .select(model, data, config.scoring(), false);
    debug!(?strategy, "strategy selected");
    if strategy == Strategy::Augmented {
        return augmented_likelihood(model, data, None, config);
    }
    let mut decomposition = PredictionErrorDecomposition::new(config.store_residuals());
    run(model, data, config, strategy, &mut decomposition)?;
    Ok(decomposition.likelihood())
}

/// Likelihood from the augmented filter, with optional diffuse regression
/// effects, scored as configured.
///
/// # Errors
///
/// | Variant | Trigger |
/// |---------|---------|
/// | [`SsfError::EmptyData`] | `data` is empty |
/// | [`SsfError::ModelInvalid`] | invalid model or too few regressor rows |
/// | [`SsfError::NumericalSingularity`] | the diffuse effects are not identified |
#[tracing::instrument(
    skip_all,
    fields(n = data.len(), regressors = regressors.map_or(0, Regressors::diffuse_count))
)]
pub fn augmented_likelihood<S: StateSpace + ?Sized>(
    model: &S,
    data: &SsfData,
    regressors: Option<&Regressors>,
    config: &FilterConfig,
) -> Result<Likelihood, SsfError> {
    check_input(data, config)?;
    let mut decomposition = AugmentedDecomposition::from_config(config);
    let run =
        AugmentedFilter::new(config).process(model, data, regressors, &mut decomposition)?;
    debug!(collapsed_at = ?run.collapsed_at, "augmented run finished");
    decomposition.likelihood(&run, config.scoring())
}

/// Smoothed states (means and covariances) of every period.
///
/// # Errors
///
/// | Variant | Trigger |
/// |---------|---------|
/// | [`SsfError::InvalidConfig`] | the strategy is augmented or fast, or marginal scoring |
/// | any other | see [`filter`] |
#[tracing::instrument(skip_all, fields(n = data.len()))]
pub fn smooth<S: StateSpace + ?Sized>(
    model: &S,
    data: &SsfData,
    config: &FilterConfig,
) -> Result<StateStorage, SsfError> {
    check_input(data, config)?;
    let strategy = config
        .strategy()
        .select(model, data, config.scoring(), true);
    if matches!(strategy, Strategy::Augmented | Strategy::Fast) {
        return Err(SsfError::InvalidConfig(format!(
            "smoothing requires the ordinary or diffuse filter, got {strategy:?}"
        )));
    }
    debug!(?strategy, "strategy selected");
    let mut results = FilteringResults::new();
    run(model, data, config, strategy, &mut results)?;
    let mut smoothed = StateStorage::full(Phase::Smoothed);
    Smoother::new(config).process(model, &results, &mut smoothed)?;
    Ok(smoothed)
}

/// Successive estimates of `selection·a[index]` (the full state when
/// `selection` is `None`).
///
/// # Errors
///
/// See [`FixedPointSmoother::process`].
#[tracing::instrument(skip_all, fields(n = data.len(), index = index))]
pub fn fixed_point<S: StateSpace + ?Sized>(
    model: &S,
    data: &SsfData,
    index: usize,
    selection: Option<&Array2<f64>>,
    config: &FilterConfig,
) -> Result<FixedPointEstimates, SsfError> {
    check_input(data, config)?;
    FixedPointSmoother::new(config).process(model, data, index, selection)
}
