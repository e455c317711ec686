//! Rank-revealing `L·D·Lᵀ` factorization with diagonal pivoting.
//!
//! Used to express low-rank covariance increments `ΔP = L·S·Lᵀ` (possibly
//! indefinite) and square roots of semidefinite covariances.

use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix2};

use crate::error::LinalgError;

/// Result of [`ldl_pivoted`]: `A ≈ L·diag(d)·Lᵀ` with `L` of shape `n × rank`.
#[derive(Clone, Debug)]
pub struct LdlFactor {
    l: Array2<f64>,
    d: Array1<f64>,
}

impl LdlFactor {
    /// The `n × rank` factor.
    pub fn l(&self) -> &Array2<f64> {
        &self.l
    }

    /// The `rank` diagonal entries (any sign).
    pub fn d(&self) -> &Array1<f64> {
        &self.d
    }

    /// Numerical rank.
    pub fn rank(&self) -> usize {
        self.d.len()
    }

    /// Consumes the factor, returning `(L, d)`.
    pub fn into_parts(self) -> (Array2<f64>, Array1<f64>) {
        (self.l, self.d)
    }
}

/// Factors a symmetric matrix as `L·diag(d)·Lᵀ`, pivoting on the largest
/// remaining diagonal entry and stopping once every remaining entry is
/// below `tol · max|aᵢⱼ|`.
///
/// # Errors
///
/// | Variant | Trigger |
/// |---------|---------|
/// | [`LinalgError::NotSquare`] | `a` is not square |
/// | [`LinalgError::IndefinitePivot`] | the remaining block has a negligible diagonal but significant off-diagonal entries |
pub fn ldl_pivoted<S: Data<Elem = f64>>(
    a: &ArrayBase<S, Ix2>,
    tol: f64,
) -> Result<LdlFactor, LinalgError> {
    let (rows, cols) = a.dim();
    if rows != cols {
        return Err(LinalgError::NotSquare { rows, cols });
    }
    let n = rows;
    let scale = a.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    let threshold = tol * scale;
    let mut work = a.to_owned();
    let mut used = vec![false; n];
    let mut columns: Vec<Array1<f64>> = Vec::new();
    let mut diag: Vec<f64> = Vec::new();

    if scale == 0.0 {
        return Ok(LdlFactor {
            l: Array2::zeros((n, 0)),
            d: Array1::zeros(0),
        });
    }

    for _ in 0..n {
        let pivot = (0..n)
            .filter(|&i| !used[i])
            .max_by(|&i, &j| {
                work[[i, i]]
                    .abs()
                    .partial_cmp(&work[[j, j]].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        let Some(p) = pivot else { break };
        let dp = work[[p, p]];
        if dp.abs() <= threshold {
            let residual = (0..n)
                .filter(|&i| !used[i])
                .flat_map(|i| (0..n).filter(|&j| !used[j]).map(move |j| (i, j)))
                .fold(0.0_f64, |acc, (i, j)| acc.max(work[[i, j]].abs()));
            if residual > threshold {
                return Err(LinalgError::IndefinitePivot { pivot: p });
            }
            break;
        }
        used[p] = true;
        let col = work.column(p).mapv(|v| v / dp);
        for i in 0..n {
            for j in 0..n {
                work[[i, j]] -= dp * col[i] * col[j];
            }
        }
        columns.push(col);
        diag.push(dp);
    }

    let rank = columns.len();
    let mut l = Array2::<f64>::zeros((n, rank));
    for (k, col) in columns.iter().enumerate() {
        l.column_mut(k).assign(col);
    }
    Ok(LdlFactor {
        l,
        d: Array1::from(diag),
    })
}

/// Returns `R` (`n × rank`) with `A ≈ R·Rᵀ` for a positive-semidefinite `A`.
///
/// # Errors
///
/// | Variant | Trigger |
/// |---------|---------|
/// | [`LinalgError::NotSquare`] | `a` is not square |
/// | [`LinalgError::NotSemidefinite`] | a pivot is significantly negative |
/// | [`LinalgError::IndefinitePivot`] | see [`ldl_pivoted`] |
pub fn semidefinite_root<S: Data<Elem = f64>>(
    a: &ArrayBase<S, Ix2>,
    tol: f64,
) -> Result<Array2<f64>, LinalgError> {
    let factor = ldl_pivoted(a, tol)?;
    let scale = a.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    let (mut l, d) = factor.into_parts();
    for (k, mut col) in l.axis_iter_mut(Axis(1)).enumerate() {
        if d[k] < -tol * scale {
            return Err(LinalgError::NotSemidefinite {
                pivot: k,
                value: d[k],
            });
        }
        col.mapv_inplace(|v| v * d[k].max(0.0).sqrt());
    }
    Ok(l)
}
