//! # ssf-model
//!
//! Linear Gaussian state-space models with a univariate observation.
//!
//! A model is anything implementing [`StateSpace`]: a transition `T(t)`,
//! process noise `V(t)`, loading `Z(t)`, observation noise `H(t)` and an
//! initialization `(a0, P0, B)` whose columns of `B` span the diffuse
//! directions. The filters in `ssf-filter` only see that trait.
//!
//! [`Model`] combines one of the built-in [`Dynamics`] with one of the
//! built-in [`Measurement`] shapes:
//!
//! ```
//! use ssf_model::{Dynamics, Measurement, Model, StateSpace};
//!
//! let model = Model::new(
//!     Dynamics::Blocks(vec![
//!         Dynamics::LocalLinearTrend { level_variance: 1.0, slope_variance: 0.1 },
//!         Dynamics::Seasonal { period: 12, variance: 0.5 },
//!     ]),
//!     Measurement::Selection { positions: vec![0, 2], variance: 1.0 },
//! )
//! .unwrap();
//! assert_eq!(model.state_dim(), 13);
//! assert_eq!(model.diffuse_dim(), 13);
//! ```

mod data;
mod dynamics;
mod error;
mod measurement;
mod model;
mod simulate;
mod state_space;

pub use data::{Regressors, SsfData};
pub use dynamics::{CustomDynamics, Dynamics, MatrixDynamics, MatrixFn};
pub use error::ModelError;
pub use measurement::{CustomMeasurement, Measurement, ScalarFn, VectorFn};
pub use model::Model;
pub use simulate::{DEFAULT_DIFFUSE_VARIANCE, Simulator};
pub use state_space::StateSpace;
