//! # ssf-filter
//!
//! Kalman filtering, diffuse initialization, likelihood evaluation and
//! smoothing for the models of `ssf-model`.
//!
//! | Component | Role |
//! |-----------|------|
//! | [`OrdinaryFilter`] | predict/update recursion on `(a, P)` |
//! | [`DiffuseInitializer`] | exact diffuse phase with separate `P` and `Pi` |
//! | [`AugmentedFilter`] | diffuse effects carried as columns `B`, optional collapse |
//! | [`FastFilter`] | Chandrasekhar recursions for time-invariant models |
//! | [`Smoother`] | fixed-interval backward recursion (diffuse steps included) |
//! | [`FixedPointSmoother`] | estimates of one historical state by augmentation |
//! | [`LinearFilter`] | replays stored gains on other series |
//! | [`LikelihoodFunction`] | parameters → likelihood, an `argmin` cost function |
//!
//! Every recursion reports to a [`ResultsSink`]: storage of states
//! ([`StateStorage`], [`PartialStorage`], [`FilteringResults`]) or a
//! likelihood accumulator ([`PredictionErrorDecomposition`],
//! [`AugmentedDecomposition`]). Sinks compose as `(A, B)` pairs.
//!
//! ```
//! use ssf_filter::{FilterConfig, likelihood, smooth};
//! use ssf_model::{Model, SsfData};
//!
//! let model = Model::local_level(2.0, 1.0).unwrap();
//! let data = SsfData::from_nan_coded(&[10.0, f64::NAN, 12.0, 11.0, 13.0]);
//! let config = FilterConfig::default();
//!
//! let ll = likelihood(&model, &data, &config).unwrap();
//! assert_eq!(ll.d(), 1);
//!
//! let smoothed = smooth(&model, &data, &config).unwrap();
//! let level = smoothed.component(0);
//! assert!(level[1] > level[0] && level[1] < level[2]);
//! ```
//!
//! The libraries emit `tracing` events (strategy selection, end of the
//! diffuse phase, collapse, steady state) but never install a subscriber.

mod adapter;
mod augmented;
mod config;
mod diffuse;
mod error;
mod fast;
mod fixed_point;
mod likelihood;
mod linear_filter;
mod ordinary;
mod sink;
mod smoother;
mod state;
mod storage;
mod toolkit;

pub use adapter::LikelihoodFunction;
pub use augmented::{
    AugmentedDecomposition, AugmentedFilter, AugmentedRun, CollapseDecision, Collapser,
};
pub use config::{FilterConfig, Scoring, Strategy};
pub use diffuse::{DiffuseInitializer, DiffuseOutcome};
pub use error::SsfError;
pub use fast::{FastFilter, FastRun};
pub use fixed_point::{FixedPointEstimates, FixedPointModel, FixedPointSmoother};
pub use likelihood::{Likelihood, PredictionErrorDecomposition};
pub use linear_filter::LinearFilter;
pub use ordinary::OrdinaryFilter;
pub use sink::ResultsSink;
pub use smoother::Smoother;
pub use state::{DiffuseBlock, DiffuseInnovation, Phase, PredictionError, State};
pub use storage::{FilteringResults, PartialStorage, StateStorage};
pub use toolkit::{augmented_likelihood, filter, fixed_point, likelihood, smooth};
