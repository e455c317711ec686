//! The capability every state-space model exposes to the filters.
//!
//! ```text
//! a[t+1] = T(t)·a[t] + η[t],     η[t] ~ N(0, V(t))
//! y[t]   = Z(t)·a[t] + ε[t],     ε[t] ~ N(0, H(t))
//! a[0]   = a0 + B·δ + u,         u ~ N(0, P0),  δ diffuse
//! ```
//!
//! All operations are indexed by the time `t` and act in place. The
//! provided methods derive every congruence and product from
//! [`StateSpace::transition`] and [`StateSpace::loading_dot`], so an
//! implementation cannot apply different matrices in its forward and
//! transposed forms unless it overrides them.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2};
use ssf_linalg::symmetrize;

use crate::error::ModelError;

/// Linear Gaussian state-space model, univariate in the observation.
pub trait StateSpace {
    /// Dimension of the state vector.
    fn state_dim(&self) -> usize;

    /// `true` when `T`, `V`, `Z` and `H` do not depend on `t`.
    fn is_time_invariant(&self) -> bool;

    /// Structural validity check, run before any recursion starts.
    fn validate(&self) -> Result<(), ModelError> {
        if self.state_dim() == 0 {
            return Err(ModelError::InvalidStateDim);
        }
        Ok(())
    }

    /// `x ← T(t)·x`.
    fn transition(&self, t: usize, x: ArrayViewMut1<'_, f64>);

    /// `x ← T(t)ᵀ·x`.
    fn transition_transpose(&self, t: usize, x: ArrayViewMut1<'_, f64>);

    /// `m ← T(t)·m`, column by column.
    fn transition_columns(&self, t: usize, mut m: ArrayViewMut2<'_, f64>) {
        for col in m.columns_mut() {
            self.transition(t, col);
        }
    }

    /// `p ← T(t)·p·T(t)ᵀ`, re-symmetrized.
    fn transition_congruence(&self, t: usize, mut p: ArrayViewMut2<'_, f64>) {
        for col in p.columns_mut() {
            self.transition(t, col);
        }
        for row in p.rows_mut() {
            self.transition(t, row);
        }
        symmetrize(&mut p);
    }

    /// `p ← p + V(t)`.
    fn add_process_noise(&self, t: usize, p: ArrayViewMut2<'_, f64>);

    /// `Z(t)·x`.
    fn loading_dot(&self, t: usize, x: ArrayView1<'_, f64>) -> f64;

    /// `x ← x + d·Z(t)ᵀ`.
    fn add_loading(&self, t: usize, x: ArrayViewMut1<'_, f64>, d: f64);

    /// `out ← Z(t)·m` (one entry per column of `m`).
    ///
    /// For a symmetric `m` this is also `(m·Z(t)ᵀ)ᵀ`, the gain numerator.
    fn loading_product(&self, t: usize, m: ArrayView2<'_, f64>, mut out: ArrayViewMut1<'_, f64>) {
        for (j, col) in m.columns().into_iter().enumerate() {
            out[j] = self.loading_dot(t, col);
        }
    }

    /// `Z(t)·v·Z(t)ᵀ`.
    fn loading_congruence(&self, t: usize, v: ArrayView2<'_, f64>) -> f64 {
        let mut zv = Array1::<f64>::zeros(v.ncols());
        self.loading_product(t, v, zv.view_mut());
        self.loading_dot(t, zv.view())
    }

    /// Observation-noise variance `H(t)`.
    fn observation_variance(&self, t: usize) -> f64;

    /// Initial mean `a0`.
    fn initial_mean(&self) -> Array1<f64>;

    /// Initial (finite) covariance `P0`.
    fn initial_covariance(&self) -> Array2<f64>;

    /// Number of diffuse initial effects.
    fn diffuse_dim(&self) -> usize;

    /// `true` when some initial directions have infinite variance.
    fn is_diffuse(&self) -> bool {
        self.diffuse_dim() > 0
    }

    /// Diffuse constraint matrix `B` (`state_dim × diffuse_dim`).
    fn diffuse_constraints(&self) -> Array2<f64>;

    /// Diffuse covariance `Pi = B·Bᵀ`.
    fn diffuse_covariance(&self) -> Array2<f64> {
        let b = self.diffuse_constraints();
        b.dot(&b.t())
    }

    /// Dense `T(t)`, assembled column by column.
    fn transition_matrix(&self, t: usize) -> Array2<f64> {
        let mut m = Array2::<f64>::eye(self.state_dim());
        self.transition_columns(t, m.view_mut());
        m
    }

    /// Dense `V(t)`.
    fn noise_matrix(&self, t: usize) -> Array2<f64> {
        let n = self.state_dim();
        let mut v = Array2::<f64>::zeros((n, n));
        self.add_process_noise(t, v.view_mut());
        v
    }

    /// Dense `Z(t)ᵀ`.
    fn loading_vector(&self, t: usize) -> Array1<f64> {
        let mut z = Array1::<f64>::zeros(self.state_dim());
        self.add_loading(t, z.view_mut(), 1.0);
        z
    }
}

impl<S: StateSpace + ?Sized> StateSpace for &S {
    fn state_dim(&self) -> usize {
        (**self).state_dim()
    }
    fn is_time_invariant(&self) -> bool {
        (**self).is_time_invariant()
    }
    fn validate(&self) -> Result<(), ModelError> {
        (**self).validate()
    }
    fn transition(&self, t: usize, x: ArrayViewMut1<'_, f64>) {
        (**self).transition(t, x)
    }
    fn transition_transpose(&self, t: usize, x: ArrayViewMut1<'_, f64>) {
        (**self).transition_transpose(t, x)
    }
    fn transition_columns(&self, t: usize, m: ArrayViewMut2<'_, f64>) {
        (**self).transition_columns(t, m)
    }
    fn transition_congruence(&self, t: usize, p: ArrayViewMut2<'_, f64>) {
        (**self).transition_congruence(t, p)
    }
    fn add_process_noise(&self, t: usize, p: ArrayViewMut2<'_, f64>) {
        (**self).add_process_noise(t, p)
    }
    fn loading_dot(&self, t: usize, x: ArrayView1<'_, f64>) -> f64 {
        (**self).loading_dot(t, x)
    }
    fn add_loading(&self, t: usize, x: ArrayViewMut1<'_, f64>, d: f64) {
        (**self).add_loading(t, x, d)
    }
    fn loading_product(&self, t: usize, m: ArrayView2<'_, f64>, out: ArrayViewMut1<'_, f64>) {
        (**self).loading_product(t, m, out)
    }
    fn loading_congruence(&self, t: usize, v: ArrayView2<'_, f64>) -> f64 {
        (**self).loading_congruence(t, v)
    }
    fn observation_variance(&self, t: usize) -> f64 {
        (**self).observation_variance(t)
    }
    fn initial_mean(&self) -> Array1<f64> {
        (**self).initial_mean()
    }
    fn initial_covariance(&self) -> Array2<f64> {
        (**self).initial_covariance()
    }
    fn diffuse_dim(&self) -> usize {
        (**self).diffuse_dim()
    }
    fn diffuse_constraints(&self) -> Array2<f64> {
        (**self).diffuse_constraints()
    }
}
