//! Likelihood-adapter and configuration integration tests for ssf-filter.

use argmin::core::{CostFunction, Executor};
use argmin::solver::neldermead::NelderMead;
use rand::SeedableRng;
use rand::rngs::StdRng;
use ssf_filter::{FilterConfig, LikelihoodFunction, Scoring, Strategy, augmented_likelihood};
use ssf_model::{Model, Regressors, Simulator, SsfData};

fn local_level(params: &[f64]) -> Result<Model, ssf_model::ModelError> {
    Model::local_level(params[0].exp(), 1.0)
}

#[test]
fn nelder_mead_recovers_the_signal_to_noise_ratio() {
    let truth = Model::local_level(4.0, 1.0).unwrap();
    let mut rng = StdRng::seed_from_u64(2024);
    let data = SsfData::from(Simulator::new(&truth).simulate(600, &mut rng).unwrap());

    let cost = LikelihoodFunction::new(local_level, data, FilterConfig::default());
    let start = cost.cost(&vec![0.0]).unwrap();
    let solver = NelderMead::new(vec![vec![0.0], vec![1.0]])
        .with_sd_tolerance(1e-8)
        .unwrap();
    let result = Executor::new(cost, solver)
        .configure(|state| state.max_iters(200))
        .run()
        .unwrap();
    let state = result.state();
    let best = state.best_param.as_ref().unwrap();
    let ratio = best[0].exp();
    assert!(ratio > 2.0 && ratio < 8.0, "q/h = {ratio}");
    assert!(state.best_cost <= start);
}

#[test]
fn adapter_with_regressors_uses_the_augmented_filter() {
    let x = ndarray::Array2::from_shape_fn((8, 1), |(t, _)| if t >= 4 { 1.0 } else { 0.0 });
    let y = [1.0, 1.2, 0.9, 1.1, 4.0, 4.2, 3.9, 4.1];
    let config = FilterConfig::new().with_scoring(Scoring::Marginal);
    let f = LikelihoodFunction::new(local_level, SsfData::from(&y[..]), config.clone())
        .with_regressors(Regressors::all_diffuse(x.clone()).unwrap());

    let direct = augmented_likelihood(
        &local_level(&[-2.0]).unwrap(),
        &SsfData::from(&y[..]),
        Some(&Regressors::all_diffuse(x).unwrap()),
        &config,
    )
    .unwrap();
    let ll = f.evaluate(&[-2.0]).unwrap();
    assert_eq!(ll.d(), 2);
    assert_eq!(ll.log_likelihood(), direct.log_likelihood());
    let (effects, _) = ll.diffuse_effects().unwrap();
    // the level shift is captured by the regression effect
    assert!(effects[1] > 2.5 && effects[1] < 3.5, "shift = {}", effects[1]);
}

#[test]
fn config_from_toml() {
    let config: FilterConfig = toml::from_str(
        r#"
        strategy = "augmented"
        scoring = "marginal"
        collapsing = false
        diffuse_tolerance = 1e-8
        "#,
    )
    .unwrap();
    assert_eq!(config.strategy(), Strategy::Augmented);
    assert_eq!(config.scoring(), Scoring::Marginal);
    assert!(!config.collapsing());
    assert_eq!(config.diffuse_tolerance(), 1e-8);
    assert_eq!(config.variance_tolerance(), 1e-9);
    assert!(config.store_residuals());
    assert!(config.validate().is_ok());
}

#[test]
fn config_rejects_unknown_keys() {
    let result: Result<FilterConfig, _> = toml::from_str("strategy = \"fast\"\nspeed = 3\n");
    assert!(result.is_err());
}

#[test]
fn config_validation_catches_inconsistent_scoring() {
    let config: FilterConfig =
        toml::from_str("strategy = \"fast\"\nscoring = \"marginal\"\n").unwrap();
    let err = config.validate().unwrap_err();
    assert_eq!(
        err.to_string(),
        "invalid configuration: marginal scoring requires the augmented filter, got Fast"
    );
}
