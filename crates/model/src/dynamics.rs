//! State dynamics: transition, process noise and initialization.

use std::fmt;
use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayViewMut1, ArrayViewMut2, s};

use crate::error::ModelError;

/// Time-indexed matrix generator used by the custom shapes.
pub type MatrixFn = Arc<dyn Fn(usize) -> Array2<f64> + Send + Sync>;

/// Explicit time-invariant matrices.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixDynamics {
    transition: Array2<f64>,
    noise: Array2<f64>,
    initial_mean: Array1<f64>,
    initial_covariance: Array2<f64>,
    diffuse_constraints: Array2<f64>,
}

impl MatrixDynamics {
    /// Creates dynamics with transition `T` and noise covariance `V`,
    /// started at zero with zero variance.
    pub fn new(transition: Array2<f64>, noise: Array2<f64>) -> Self {
        let n = transition.nrows();
        Self {
            transition,
            noise,
            initial_mean: Array1::zeros(n),
            initial_covariance: Array2::zeros((n, n)),
            diffuse_constraints: Array2::zeros((n, 0)),
        }
    }

    /// Sets the initial mean and finite covariance.
    pub fn with_initial(mut self, mean: Array1<f64>, covariance: Array2<f64>) -> Self {
        self.initial_mean = mean;
        self.initial_covariance = covariance;
        self
    }

    /// Sets the diffuse constraint matrix `B`.
    pub fn with_diffuse_constraints(mut self, constraints: Array2<f64>) -> Self {
        self.diffuse_constraints = constraints;
        self
    }

    /// Makes every state direction diffuse (`B = I`, `P0 = 0`).
    pub fn fully_diffuse(self) -> Self {
        let n = self.transition.nrows();
        self.with_initial(Array1::zeros(n), Array2::zeros((n, n)))
            .with_diffuse_constraints(Array2::eye(n))
    }

    /// Transition matrix `T`.
    pub fn transition(&self) -> &Array2<f64> {
        &self.transition
    }

    /// Process-noise covariance `V`.
    pub fn noise(&self) -> &Array2<f64> {
        &self.noise
    }
}

/// Dynamics given by closures of time.
#[derive(Clone)]
pub struct CustomDynamics {
    dim: usize,
    time_invariant: bool,
    transition: MatrixFn,
    noise: MatrixFn,
    initial_mean: Array1<f64>,
    initial_covariance: Array2<f64>,
    diffuse_constraints: Array2<f64>,
}

impl CustomDynamics {
    /// Creates time-varying dynamics of dimension `dim`.
    pub fn new<F, G>(dim: usize, transition: F, noise: G) -> Self
    where
        F: Fn(usize) -> Array2<f64> + Send + Sync + 'static,
        G: Fn(usize) -> Array2<f64> + Send + Sync + 'static,
    {
        Self {
            dim,
            time_invariant: false,
            transition: Arc::new(transition),
            noise: Arc::new(noise),
            initial_mean: Array1::zeros(dim),
            initial_covariance: Array2::zeros((dim, dim)),
            diffuse_constraints: Array2::zeros((dim, 0)),
        }
    }

    /// Declares that the closures ignore `t`.
    pub fn with_time_invariant(mut self, time_invariant: bool) -> Self {
        self.time_invariant = time_invariant;
        self
    }

    /// Sets the initial mean and finite covariance.
    pub fn with_initial(mut self, mean: Array1<f64>, covariance: Array2<f64>) -> Self {
        self.initial_mean = mean;
        self.initial_covariance = covariance;
        self
    }

    /// Sets the diffuse constraint matrix `B`.
    pub fn with_diffuse_constraints(mut self, constraints: Array2<f64>) -> Self {
        self.diffuse_constraints = constraints;
        self
    }
}

impl fmt::Debug for CustomDynamics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomDynamics")
            .field("dim", &self.dim)
            .field("time_invariant", &self.time_invariant)
            .field("diffuse_dim", &self.diffuse_constraints.ncols())
            .finish_non_exhaustive()
    }
}

/// The state equation of a model.
#[derive(Debug, Clone)]
pub enum Dynamics {
    /// Explicit matrices.
    Matrices(MatrixDynamics),
    /// Random walk `a[t+1] = a[t] + η`, diffuse start.
    LocalLevel {
        /// Level innovation variance.
        variance: f64,
    },
    /// Level plus slope, both diffuse.
    LocalLinearTrend {
        /// Level innovation variance.
        level_variance: f64,
        /// Slope innovation variance.
        slope_variance: f64,
    },
    /// Dummy seasonal of dimension `period - 1`, diffuse start.
    Seasonal {
        /// Number of seasons.
        period: usize,
        /// Innovation variance of the leading seasonal.
        variance: f64,
    },
    /// Serially independent noise, `T = 0`, stationary start.
    Noise {
        /// Noise variance.
        variance: f64,
    },
    /// Block-diagonal composition.
    Blocks(Vec<Dynamics>),
    /// Closure-driven dynamics.
    Custom(CustomDynamics),
}

fn check_variance(what: &'static str, value: f64) -> Result<(), ModelError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ModelError::InvalidVariance { what, value })
    }
}

fn check_shape(
    what: &'static str,
    shape: (usize, usize),
    expected: (usize, usize),
) -> Result<(), ModelError> {
    if shape.0 != expected.0 {
        return Err(ModelError::DimensionMismatch {
            what,
            expected: expected.0,
            got: shape.0,
        });
    }
    if shape.1 != expected.1 {
        return Err(ModelError::DimensionMismatch {
            what,
            expected: expected.1,
            got: shape.1,
        });
    }
    Ok(())
}

fn check_initial(
    dim: usize,
    mean: &Array1<f64>,
    covariance: &Array2<f64>,
    constraints: &Array2<f64>,
) -> Result<(), ModelError> {
    if mean.len() != dim {
        return Err(ModelError::DimensionMismatch {
            what: "initial mean",
            expected: dim,
            got: mean.len(),
        });
    }
    check_shape("initial covariance", covariance.dim(), (dim, dim))?;
    if constraints.nrows() != dim {
        return Err(ModelError::DimensionMismatch {
            what: "diffuse constraints",
            expected: dim,
            got: constraints.nrows(),
        });
    }
    for i in 0..dim {
        check_variance("initial variance", covariance[(i, i)])?;
    }
    Ok(())
}

impl Dynamics {
    /// Dimension of the state block.
    pub fn state_dim(&self) -> usize {
        match self {
            Self::Matrices(m) => m.transition.nrows(),
            Self::LocalLevel { .. } | Self::Noise { .. } => 1,
            Self::LocalLinearTrend { .. } => 2,
            Self::Seasonal { period, .. } => period.saturating_sub(1),
            Self::Blocks(blocks) => blocks.iter().map(Self::state_dim).sum(),
            Self::Custom(c) => c.dim,
        }
    }

    /// `true` unless a custom block depends on time.
    pub fn is_time_invariant(&self) -> bool {
        match self {
            Self::Blocks(blocks) => blocks.iter().all(Self::is_time_invariant),
            Self::Custom(c) => c.time_invariant,
            _ => true,
        }
    }

    /// Checks shapes and variances.
    pub fn validate(&self) -> Result<(), ModelError> {
        match self {
            Self::Matrices(m) => {
                let n = m.transition.nrows();
                if n == 0 {
                    return Err(ModelError::InvalidStateDim);
                }
                check_shape("transition", m.transition.dim(), (n, n))?;
                check_shape("process noise", m.noise.dim(), (n, n))?;
                for i in 0..n {
                    check_variance("process noise variance", m.noise[(i, i)])?;
                }
                check_initial(
                    n,
                    &m.initial_mean,
                    &m.initial_covariance,
                    &m.diffuse_constraints,
                )
            }
            Self::LocalLevel { variance } | Self::Noise { variance } => {
                check_variance("process noise variance", *variance)
            }
            Self::LocalLinearTrend {
                level_variance,
                slope_variance,
            } => {
                check_variance("level variance", *level_variance)?;
                check_variance("slope variance", *slope_variance)
            }
            Self::Seasonal { period, variance } => {
                if *period < 2 {
                    return Err(ModelError::InvalidPeriod { period: *period });
                }
                check_variance("seasonal variance", *variance)
            }
            Self::Blocks(blocks) => {
                if blocks.is_empty() {
                    return Err(ModelError::InvalidStateDim);
                }
                blocks.iter().try_for_each(Self::validate)
            }
            Self::Custom(c) => {
                if c.dim == 0 {
                    return Err(ModelError::InvalidStateDim);
                }
                check_shape("transition", (c.transition)(0).dim(), (c.dim, c.dim))?;
                check_shape("process noise", (c.noise)(0).dim(), (c.dim, c.dim))?;
                check_initial(
                    c.dim,
                    &c.initial_mean,
                    &c.initial_covariance,
                    &c.diffuse_constraints,
                )
            }
        }
    }

    /// `x ← T(t)·x`.
    pub fn transition(&self, t: usize, mut x: ArrayViewMut1<'_, f64>) {
        match self {
            Self::Matrices(m) => {
                let y = m.transition.dot(&x);
                x.assign(&y);
            }
            Self::LocalLevel { .. } => {}
            Self::LocalLinearTrend { .. } => x[0] += x[1],
            Self::Seasonal { .. } => {
                let n = x.len();
                let lead = -x.sum();
                for i in (1..n).rev() {
                    x[i] = x[i - 1];
                }
                x[0] = lead;
            }
            Self::Noise { .. } => x.fill(0.0),
            Self::Blocks(blocks) => {
                let mut start = 0;
                for block in blocks {
                    let end = start + block.state_dim();
                    block.transition(t, x.slice_mut(s![start..end]));
                    start = end;
                }
            }
            Self::Custom(c) => {
                let y = (c.transition)(t).dot(&x);
                x.assign(&y);
            }
        }
    }

    /// `x ← T(t)ᵀ·x`.
    pub fn transition_transpose(&self, t: usize, mut x: ArrayViewMut1<'_, f64>) {
        match self {
            Self::Matrices(m) => {
                let y = m.transition.t().dot(&x);
                x.assign(&y);
            }
            Self::LocalLevel { .. } => {}
            Self::LocalLinearTrend { .. } => x[1] += x[0],
            Self::Seasonal { .. } => {
                let n = x.len();
                let lead = x[0];
                for j in 0..n - 1 {
                    x[j] = x[j + 1] - lead;
                }
                x[n - 1] = -lead;
            }
            Self::Noise { .. } => x.fill(0.0),
            Self::Blocks(blocks) => {
                let mut start = 0;
                for block in blocks {
                    let end = start + block.state_dim();
                    block.transition_transpose(t, x.slice_mut(s![start..end]));
                    start = end;
                }
            }
            Self::Custom(c) => {
                let y = (c.transition)(t).t().dot(&x);
                x.assign(&y);
            }
        }
    }

    /// `p ← p + V(t)`.
    pub fn add_noise(&self, t: usize, mut p: ArrayViewMut2<'_, f64>) {
        match self {
            Self::Matrices(m) => p += &m.noise,
            Self::LocalLevel { variance } | Self::Noise { variance } => p[(0, 0)] += variance,
            Self::LocalLinearTrend {
                level_variance,
                slope_variance,
            } => {
                p[(0, 0)] += level_variance;
                p[(1, 1)] += slope_variance;
            }
            Self::Seasonal { variance, .. } => p[(0, 0)] += variance,
            Self::Blocks(blocks) => {
                let mut start = 0;
                for block in blocks {
                    let end = start + block.state_dim();
                    block.add_noise(t, p.slice_mut(s![start..end, start..end]));
                    start = end;
                }
            }
            Self::Custom(c) => p += &(c.noise)(t),
        }
    }

    /// Initial mean `a0`.
    pub fn initial_mean(&self) -> Array1<f64> {
        match self {
            Self::Matrices(m) => m.initial_mean.clone(),
            Self::Blocks(blocks) => {
                let parts: Vec<f64> = blocks
                    .iter()
                    .flat_map(|b| b.initial_mean().to_vec())
                    .collect();
                Array1::from(parts)
            }
            Self::Custom(c) => c.initial_mean.clone(),
            _ => Array1::zeros(self.state_dim()),
        }
    }

    /// Initial finite covariance `P0`.
    pub fn initial_covariance(&self) -> Array2<f64> {
        match self {
            Self::Matrices(m) => m.initial_covariance.clone(),
            Self::Noise { variance } => Array2::from_elem((1, 1), *variance),
            Self::Blocks(blocks) => {
                let n = self.state_dim();
                let mut p = Array2::zeros((n, n));
                let mut start = 0;
                for block in blocks {
                    let end = start + block.state_dim();
                    p.slice_mut(s![start..end, start..end])
                        .assign(&block.initial_covariance());
                    start = end;
                }
                p
            }
            Self::Custom(c) => c.initial_covariance.clone(),
            _ => {
                let n = self.state_dim();
                Array2::zeros((n, n))
            }
        }
    }

    /// Number of diffuse initial effects.
    pub fn diffuse_dim(&self) -> usize {
        match self {
            Self::Matrices(m) => m.diffuse_constraints.ncols(),
            Self::Noise { .. } => 0,
            Self::Blocks(blocks) => blocks.iter().map(Self::diffuse_dim).sum(),
            Self::Custom(c) => c.diffuse_constraints.ncols(),
            _ => self.state_dim(),
        }
    }

    /// Diffuse constraint matrix `B`.
    pub fn diffuse_constraints(&self) -> Array2<f64> {
        match self {
            Self::Matrices(m) => m.diffuse_constraints.clone(),
            Self::Noise { .. } => Array2::zeros((1, 0)),
            Self::Blocks(blocks) => {
                let mut b = Array2::zeros((self.state_dim(), self.diffuse_dim()));
                let (mut row, mut col) = (0, 0);
                for block in blocks {
                    let (n, d) = (block.state_dim(), block.diffuse_dim());
                    b.slice_mut(s![row..row + n, col..col + d])
                        .assign(&block.diffuse_constraints());
                    row += n;
                    col += d;
                }
                b
            }
            Self::Custom(c) => c.diffuse_constraints.clone(),
            _ => Array2::eye(self.state_dim()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, array};

    fn dense_transition(d: &Dynamics) -> Array2<f64> {
        let n = d.state_dim();
        let mut m = Array2::<f64>::eye(n);
        for col in m.columns_mut() {
            d.transition(0, col);
        }
        m
    }

    #[test]
    fn seasonal_transition_matches_dummy_form() {
        let d = Dynamics::Seasonal {
            period: 4,
            variance: 1.0,
        };
        let t = dense_transition(&d);
        let expected = array![[-1.0, -1.0, -1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        assert_abs_diff_eq!(t, expected, epsilon = 1e-15);
    }

    #[test]
    fn transpose_agrees_with_dense_transition() {
        let dynamics = [
            Dynamics::Seasonal {
                period: 5,
                variance: 1.0,
            },
            Dynamics::LocalLinearTrend {
                level_variance: 1.0,
                slope_variance: 0.5,
            },
            Dynamics::Blocks(vec![
                Dynamics::LocalLevel { variance: 1.0 },
                Dynamics::Seasonal {
                    period: 3,
                    variance: 2.0,
                },
                Dynamics::Noise { variance: 1.0 },
            ]),
        ];
        for d in &dynamics {
            let t = dense_transition(d);
            let x = Array1::from_iter((0..d.state_dim()).map(|i| 1.0 + i as f64 * 0.7));
            let mut y = x.clone();
            d.transition_transpose(0, y.view_mut());
            assert_abs_diff_eq!(y, t.t().dot(&x), epsilon = 1e-12);
        }
    }

    #[test]
    fn blocks_assemble_block_diagonal() {
        let d = Dynamics::Blocks(vec![
            Dynamics::LocalLinearTrend {
                level_variance: 1.0,
                slope_variance: 2.0,
            },
            Dynamics::Noise { variance: 3.0 },
        ]);
        assert_eq!(d.state_dim(), 3);
        assert_eq!(d.diffuse_dim(), 2);

        let mut v = Array2::zeros((3, 3));
        d.add_noise(0, v.view_mut());
        assert_abs_diff_eq!(
            v,
            array![[1.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 3.0]],
            epsilon = 1e-15
        );
        assert_abs_diff_eq!(
            d.initial_covariance(),
            array![[0.0, 0.0, 0.0], [0.0, 0.0, 0.0], [0.0, 0.0, 3.0]],
            epsilon = 1e-15
        );
        assert_abs_diff_eq!(
            d.diffuse_constraints(),
            array![[1.0, 0.0], [0.0, 1.0], [0.0, 0.0]],
            epsilon = 1e-15
        );
    }

    #[test]
    fn matrices_fully_diffuse() {
        let d = MatrixDynamics::new(array![[0.5]], array![[1.0]]).fully_diffuse();
        let d = Dynamics::Matrices(d);
        assert!(d.validate().is_ok());
        assert_eq!(d.diffuse_dim(), 1);
    }

    #[test]
    fn validate_rejects_bad_shapes() {
        let d = Dynamics::Matrices(MatrixDynamics::new(array![[1.0, 0.0]], array![[1.0]]));
        assert!(matches!(
            d.validate(),
            Err(ModelError::DimensionMismatch { what: "transition", .. })
        ));

        let d = Dynamics::Seasonal {
            period: 1,
            variance: 1.0,
        };
        assert!(matches!(
            d.validate(),
            Err(ModelError::InvalidPeriod { period: 1 })
        ));

        let d = Dynamics::LocalLevel { variance: -1.0 };
        assert!(matches!(d.validate(), Err(ModelError::InvalidVariance { .. })));

        assert!(matches!(
            Dynamics::Blocks(Vec::new()).validate(),
            Err(ModelError::InvalidStateDim)
        ));
    }

    #[test]
    fn custom_dynamics_follow_closures() {
        let d = Dynamics::Custom(CustomDynamics::new(
            1,
            |t| Array2::from_elem((1, 1), if t % 2 == 0 { 0.5 } else { 2.0 }),
            |_| Array2::from_elem((1, 1), 1.0),
        ));
        assert!(!d.is_time_invariant());
        let mut x = array![4.0];
        d.transition(0, x.view_mut());
        assert_abs_diff_eq!(x[0], 2.0);
        d.transition(1, x.view_mut());
        assert_abs_diff_eq!(x[0], 4.0);
        assert!(format!("{d:?}").contains("CustomDynamics"));
    }
}
