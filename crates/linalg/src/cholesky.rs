//! Cholesky factorization `A = L·Lᵀ` and the solves built on it.

use ndarray::{Array1, Array2, ArrayBase, Data, DataMut, Ix1, Ix2};

use crate::error::LinalgError;

/// Lower-triangular Cholesky factor of a symmetric positive-definite matrix.
#[derive(Clone, Debug)]
pub struct Cholesky {
    l: Array2<f64>,
}

impl Cholesky {
    /// The lower-triangular factor `L`.
    pub fn lower(&self) -> &Array2<f64> {
        &self.l
    }

    /// Dimension of the factored matrix.
    pub fn dim(&self) -> usize {
        self.l.nrows()
    }

    /// `log|A| = 2·Σ log lᵢᵢ`.
    pub fn log_determinant(&self) -> f64 {
        2.0 * self.l.diag().iter().map(|v| v.ln()).sum::<f64>()
    }

    /// Solves `A·x = b`.
    pub fn solve<S: Data<Elem = f64>>(
        &self,
        b: &ArrayBase<S, Ix1>,
    ) -> Result<Array1<f64>, LinalgError> {
        if b.len() != self.dim() {
            return Err(LinalgError::DimensionMismatch {
                expected: self.dim(),
                got: b.len(),
            });
        }
        let mut x = b.to_owned();
        lower_solve_in_place(&self.l, &mut x);
        upper_solve_in_place(&self.l, &mut x);
        Ok(x)
    }

    /// `A⁻¹`.
    pub fn inverse(&self) -> Array2<f64> {
        inverse_from_cholesky(&self.l)
    }
}

/// Factors a symmetric positive-definite matrix.
///
/// Only the lower triangle of `a` is read. A pivot `<= tol · max|aᵢᵢ|`
/// is treated as a loss of definiteness.
///
/// # Errors
///
/// | Variant | Trigger |
/// |---------|---------|
/// | [`LinalgError::NotSquare`] | `a` is not square |
/// | [`LinalgError::NotPositiveDefinite`] | a pivot falls below the tolerance |
pub fn cholesky<S: Data<Elem = f64>>(
    a: &ArrayBase<S, Ix2>,
    tol: f64,
) -> Result<Cholesky, LinalgError> {
    let (rows, cols) = a.dim();
    if rows != cols {
        return Err(LinalgError::NotSquare { rows, cols });
    }
    let n = rows;
    let scale = a.diag().iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    let threshold = tol * scale.max(f64::MIN_POSITIVE);
    let mut l = Array2::<f64>::zeros((n, n));
    for j in 0..n {
        let mut d = a[[j, j]];
        for k in 0..j {
            d -= l[[j, k]] * l[[j, k]];
        }
        if !(d > threshold) {
            return Err(LinalgError::NotPositiveDefinite { pivot: j });
        }
        let djj = d.sqrt();
        l[[j, j]] = djj;
        for i in (j + 1)..n {
            let mut s = a[[i, j]];
            for k in 0..j {
                s -= l[[i, k]] * l[[j, k]];
            }
            l[[i, j]] = s / djj;
        }
    }
    Ok(Cholesky { l })
}

/// Solves `L·y = x` in place (forward substitution).
pub fn lower_solve_in_place<S, T>(l: &ArrayBase<S, Ix2>, x: &mut ArrayBase<T, Ix1>)
where
    S: Data<Elem = f64>,
    T: DataMut<Elem = f64>,
{
    let n = x.len();
    for i in 0..n {
        let mut s = x[i];
        for k in 0..i {
            s -= l[[i, k]] * x[k];
        }
        x[i] = s / l[[i, i]];
    }
}

/// Solves `Lᵀ·y = x` in place (backward substitution).
pub fn upper_solve_in_place<S, T>(l: &ArrayBase<S, Ix2>, x: &mut ArrayBase<T, Ix1>)
where
    S: Data<Elem = f64>,
    T: DataMut<Elem = f64>,
{
    let n = x.len();
    for i in (0..n).rev() {
        let mut s = x[i];
        for k in (i + 1)..n {
            s -= l[[k, i]] * x[k];
        }
        x[i] = s / l[[i, i]];
    }
}

/// `(L·Lᵀ)⁻¹` from the lower factor.
pub fn inverse_from_cholesky<S: Data<Elem = f64>>(l: &ArrayBase<S, Ix2>) -> Array2<f64> {
    let n = l.nrows();
    let mut inv = Array2::<f64>::zeros((n, n));
    for j in 0..n {
        let mut e = Array1::<f64>::zeros(n);
        e[j] = 1.0;
        lower_solve_in_place(l, &mut e);
        upper_solve_in_place(l, &mut e);
        inv.column_mut(j).assign(&e);
    }
    crate::symmetrize(&mut inv);
    inv
}
