//! Error types for the ssf-linalg crate.

/// Error type for the factorizations in this crate.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LinalgError {
    /// Returned when a square matrix is required.
    #[error("matrix is not square ({rows}x{cols})")]
    NotSquare {
        /// Number of rows.
        rows: usize,
        /// Number of columns.
        cols: usize,
    },

    /// Returned when a Cholesky pivot falls below the tolerance.
    #[error("matrix is not positive definite (pivot {pivot})")]
    NotPositiveDefinite {
        /// Index of the failing pivot.
        pivot: usize,
    },

    /// Returned when a diagonal-pivoted LDLᵀ meets a zero diagonal with a
    /// non-zero off-diagonal block.
    #[error("symmetric matrix requires a 2x2 pivot at {pivot}")]
    IndefinitePivot {
        /// Index of the failing pivot.
        pivot: usize,
    },

    /// Returned when a square root is requested for an indefinite matrix.
    #[error("matrix is not positive semidefinite (pivot {pivot}, value {value})")]
    NotSemidefinite {
        /// Index of the failing pivot.
        pivot: usize,
        /// Offending diagonal value.
        value: f64,
    },

    /// Returned when operand dimensions do not agree.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Expected length.
        expected: usize,
        /// Actual length.
        got: usize,
    },
}
