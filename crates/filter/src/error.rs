//! Error types for the ssf-filter crate.

use ssf_linalg::LinalgError;
use ssf_model::ModelError;

/// Error type for filtering, smoothing and likelihood evaluation.
///
/// A missing observation is never an error (the update is skipped), and a
/// replay window longer than the stored results is reported through an
/// `Option` rather than through this type.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SsfError {
    /// The model failed its structural validity check.
    #[error(transparent)]
    ModelInvalid(#[from] ModelError),

    /// A factorization met a matrix that is not positive definite beyond
    /// tolerance (rank-deficient diffuse constraints, unidentified effects).
    #[error("numerical singularity: {0}")]
    NumericalSingularity(#[from] LinalgError),

    /// A configuration value is out of range or inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The fast filter cannot process this model or data.
    #[error("fast filter unsupported: {0}")]
    FastFilterUnsupported(String),

    /// The diffuse phase is still open at a position where it must be over.
    #[error("diffuse phase ends at {end}, after position {position}")]
    DiffuseNotResolved {
        /// First non-diffuse index.
        end: usize,
        /// Position that required a resolved state.
        position: usize,
    },

    /// The observation series is empty.
    #[error("input data is empty")]
    EmptyData,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_model_invalid_is_transparent() {
        let err: SsfError = ModelError::InvalidStateDim.into();
        assert_eq!(err.to_string(), "state dimension must be positive");
    }

    #[test]
    fn error_numerical_singularity() {
        let err: SsfError = LinalgError::NotPositiveDefinite { pivot: 2 }.into();
        assert_eq!(
            err.to_string(),
            "numerical singularity: matrix is not positive definite (pivot 2)"
        );
    }

    #[test]
    fn error_invalid_config() {
        let err = SsfError::InvalidConfig("fast_epsilon must be positive".into());
        assert_eq!(
            err.to_string(),
            "invalid configuration: fast_epsilon must be positive"
        );
    }

    #[test]
    fn error_fast_filter_unsupported() {
        let err = SsfError::FastFilterUnsupported("missing observations".into());
        assert_eq!(
            err.to_string(),
            "fast filter unsupported: missing observations"
        );
    }

    #[test]
    fn error_diffuse_not_resolved() {
        let err = SsfError::DiffuseNotResolved {
            end: 4,
            position: 2,
        };
        assert_eq!(err.to_string(), "diffuse phase ends at 4, after position 2");
    }

    #[test]
    fn error_empty_data() {
        assert_eq!(SsfError::EmptyData.to_string(), "input data is empty");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SsfError>();
    }

    #[test]
    fn error_implements_std_error() {
        fn assert_error<T: std::error::Error>() {}
        assert_error::<SsfError>();
    }
}
