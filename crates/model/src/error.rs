//! Error types for the ssf-model crate.

use ssf_linalg::LinalgError;

/// Error type for model construction, validation and simulation.
///
/// Every structural defect of a model is reported here, before any
/// recursion touches the data.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ModelError {
    /// Returned when the state dimension is zero.
    #[error("state dimension must be positive")]
    InvalidStateDim,

    /// Returned when a model component has the wrong shape.
    #[error("{what}: expected dimension {expected}, got {got}")]
    DimensionMismatch {
        /// Component whose shape is wrong.
        what: &'static str,
        /// Dimension implied by the state.
        expected: usize,
        /// Dimension found.
        got: usize,
    },

    /// Returned when a variance is negative or non-finite.
    #[error("{what} must be finite and non-negative, got {value}")]
    InvalidVariance {
        /// Which variance.
        what: &'static str,
        /// Offending value.
        value: f64,
    },

    /// Returned when a measurement selects a state position that does not exist.
    #[error("state position {position} out of range for dimension {dim}")]
    PositionOutOfRange {
        /// Requested position.
        position: usize,
        /// State dimension.
        dim: usize,
    },

    /// Returned when a periodic component has a period below 2.
    #[error("period must be at least 2, got {period}")]
    InvalidPeriod {
        /// Offending period.
        period: usize,
    },

    /// Returned when a time-invariant representation is requested from a
    /// time-varying model.
    #[error("model is time-varying")]
    TimeVarying,

    /// Returned when a regression design is malformed.
    #[error("invalid regressors: {0}")]
    InvalidRegressors(String),

    /// Propagated from a factorization.
    #[error(transparent)]
    Linalg(#[from] LinalgError),
}
