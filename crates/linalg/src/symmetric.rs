//! Helpers for symmetric covariance matrices.

use ndarray::{Array2, ArrayBase, Data, DataMut, Ix1, Ix2};

/// Replaces `p` by `(p + pᵀ) / 2`.
pub fn symmetrize<S: DataMut<Elem = f64>>(p: &mut ArrayBase<S, Ix2>) {
    let n = p.nrows().min(p.ncols());
    for i in 0..n {
        for j in 0..i {
            let v = 0.5 * (p[[i, j]] + p[[j, i]]);
            p[[i, j]] = v;
            p[[j, i]] = v;
        }
    }
}

/// Sets diagonal entries in `(-tol, 0)` to zero.
///
/// Entries more negative than `-tol` are left untouched so that genuine
/// failures stay visible downstream.
pub fn clamp_diagonal<S: DataMut<Elem = f64>>(p: &mut ArrayBase<S, Ix2>, tol: f64) {
    let n = p.nrows().min(p.ncols());
    for i in 0..n {
        let d = p[[i, i]];
        if d < 0.0 && d > -tol {
            p[[i, i]] = 0.0;
        }
    }
}

/// Symmetric rank-1 update `p += alpha · x · xᵀ`.
pub fn add_xaxt<S, T>(p: &mut ArrayBase<S, Ix2>, alpha: f64, x: &ArrayBase<T, Ix1>)
where
    S: DataMut<Elem = f64>,
    T: Data<Elem = f64>,
{
    if alpha == 0.0 {
        return;
    }
    let n = x.len();
    for i in 0..n {
        let xi = alpha * x[i];
        if xi == 0.0 {
            continue;
        }
        for j in 0..=i {
            let v = xi * x[j];
            p[[i, j]] += v;
            if i != j {
                p[[j, i]] += v;
            }
        }
    }
}

/// Symmetric rank-2 update `p += alpha · (x · yᵀ + y · xᵀ)`.
pub fn add_cross<S, T, U>(
    p: &mut ArrayBase<S, Ix2>,
    alpha: f64,
    x: &ArrayBase<T, Ix1>,
    y: &ArrayBase<U, Ix1>,
)
where
    S: DataMut<Elem = f64>,
    T: Data<Elem = f64>,
    U: Data<Elem = f64>,
{
    let n = x.len();
    for i in 0..n {
        for j in 0..=i {
            let v = alpha * (x[i] * y[j] + y[i] * x[j]);
            p[[i, j]] += v;
            if i != j {
                p[[j, i]] += v;
            }
        }
    }
}

/// Outer product `x · yᵀ`.
pub fn outer<S, T>(x: &ArrayBase<S, Ix1>, y: &ArrayBase<T, Ix1>) -> Array2<f64>
where
    S: Data<Elem = f64>,
    T: Data<Elem = f64>,
{
    Array2::from_shape_fn((x.len(), y.len()), |(i, j)| x[i] * y[j])
}

/// Quadratic form `xᵀ · m · x`.
pub fn quadratic_form<S, T>(m: &ArrayBase<S, Ix2>, x: &ArrayBase<T, Ix1>) -> f64
where
    S: Data<Elem = f64>,
    T: Data<Elem = f64>,
{
    x.dot(&m.dot(x))
}

/// Frobenius norm `sqrt(Σ mᵢⱼ²)`.
pub fn frobenius_norm<S: Data<Elem = f64>>(m: &ArrayBase<S, Ix2>) -> f64 {
    m.iter().map(|v| v * v).sum::<f64>().sqrt()
}

/// Returns `true` if `|mᵢⱼ − mⱼᵢ| <= tol` for all entries of a square matrix.
pub fn is_symmetric<S: Data<Elem = f64>>(m: &ArrayBase<S, Ix2>, tol: f64) -> bool {
    if m.nrows() != m.ncols() {
        return false;
    }
    let n = m.nrows();
    (0..n).all(|i| (0..i).all(|j| (m[[i, j]] - m[[j, i]]).abs() <= tol))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2};

    #[test]
    fn symmetrize_averages_off_diagonal() {
        let mut p = arr2(&[[1.0, 2.0], [4.0, 3.0]]);
        symmetrize(&mut p);
        assert_abs_diff_eq!(p[[0, 1]], 3.0, epsilon = 1e-15);
        assert_abs_diff_eq!(p[[1, 0]], 3.0, epsilon = 1e-15);
        assert_abs_diff_eq!(p[[0, 0]], 1.0, epsilon = 1e-15);
    }

    #[test]
    fn symmetrize_view() {
        let mut p = arr2(&[[1.0, 0.0, 9.0], [2.0, 1.0, 9.0], [9.0, 9.0, 9.0]]);
        symmetrize(&mut p.slice_mut(ndarray::s![0..2, 0..2]));
        assert_abs_diff_eq!(p[[0, 1]], 1.0, epsilon = 1e-15);
        assert_abs_diff_eq!(p[[1, 0]], 1.0, epsilon = 1e-15);
        assert_abs_diff_eq!(p[[0, 2]], 9.0, epsilon = 1e-15);
    }

    #[test]
    fn clamp_small_negative_only() {
        let mut p = arr2(&[[-1e-12, 0.0], [0.0, -1.0]]);
        clamp_diagonal(&mut p, 1e-9);
        assert_eq!(p[[0, 0]], 0.0);
        assert_eq!(p[[1, 1]], -1.0);
    }

    #[test]
    fn rank_one_update() {
        let mut p = arr2(&[[1.0, 0.0], [0.0, 1.0]]);
        add_xaxt(&mut p, -0.5, &arr1(&[2.0, 1.0]));
        assert_abs_diff_eq!(p[[0, 0]], -1.0, epsilon = 1e-15);
        assert_abs_diff_eq!(p[[0, 1]], -1.0, epsilon = 1e-15);
        assert_abs_diff_eq!(p[[1, 0]], -1.0, epsilon = 1e-15);
        assert_abs_diff_eq!(p[[1, 1]], 0.5, epsilon = 1e-15);
    }

    #[test]
    fn rank_two_cross_update() {
        let mut p = Array2::<f64>::zeros((2, 2));
        add_cross(&mut p, 0.5, &arr1(&[1.0, 0.0]), &arr1(&[2.0, 3.0]));
        assert_eq!(p, arr2(&[[2.0, 1.5], [1.5, 0.0]]));
    }

    #[test]
    fn outer_and_quadratic_form() {
        let x = arr1(&[1.0, 2.0]);
        let m = outer(&x, &x);
        assert_eq!(m, arr2(&[[1.0, 2.0], [2.0, 4.0]]));
        assert_abs_diff_eq!(quadratic_form(&m, &x), 25.0, epsilon = 1e-12);
    }

    #[test]
    fn frobenius() {
        let m = arr2(&[[3.0, 0.0], [0.0, 4.0]]);
        assert_abs_diff_eq!(frobenius_norm(&m), 5.0, epsilon = 1e-15);
    }

    #[test]
    fn symmetry_check() {
        assert!(is_symmetric(&arr2(&[[1.0, 2.0], [2.0, 1.0]]), 0.0));
        assert!(!is_symmetric(&arr2(&[[1.0, 2.0], [2.1, 1.0]]), 1e-3));
        assert!(!is_symmetric(&Array2::<f64>::zeros((2, 3)), 1.0));
    }
}
