//! # ssf-linalg
//!
//! Small dense linear-algebra helpers used by the state-space filters.
//!
//! Everything here works on [`ndarray`] views and stays allocation-light:
//! the filters call these routines once per time step, on matrices whose
//! dimension is the state dimension (rarely more than a few dozen).
//!
//! | Routine | Purpose |
//! |---------|---------|
//! | [`symmetrize`] | Restores exact symmetry after a congruence transform |
//! | [`clamp_diagonal`] | Zeroes tiny negative variances |
//! | [`add_xaxt`] | Symmetric rank-1 update `P += α·x·xᵀ` |
//! | [`add_cross`] | Symmetric rank-2 update `P += α·(x·yᵀ + y·xᵀ)` |
//! | [`cholesky`] | Lower Cholesky factor with a pivot tolerance |
//! | [`ldl_pivoted`] | Rank-revealing `L·D·Lᵀ` of a symmetric (indefinite) matrix |

mod cholesky;
mod error;
mod ldl;
mod symmetric;

pub use cholesky::{
    Cholesky, cholesky, inverse_from_cholesky, lower_solve_in_place, upper_solve_in_place,
};
pub use error::LinalgError;
pub use ldl::{LdlFactor, ldl_pivoted, semidefinite_root};
pub use symmetric::{
    add_cross, add_xaxt, clamp_diagonal, frobenius_norm, is_symmetric, outer, quadratic_form,
    symmetrize,
};
