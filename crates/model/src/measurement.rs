//! Observation equation: loading `Z(t)` and noise variance `H(t)`.

use std::fmt;
use std::sync::Arc;

use ndarray::{Array1, ArrayView1, ArrayViewMut1, s};

use crate::error::ModelError;

/// Time-indexed loading generator.
pub type VectorFn = Arc<dyn Fn(usize) -> Array1<f64> + Send + Sync>;

/// Time-indexed variance generator.
pub type ScalarFn = Arc<dyn Fn(usize) -> f64 + Send + Sync>;

/// Measurement given by closures of time.
#[derive(Clone)]
pub struct CustomMeasurement {
    time_invariant: bool,
    loading: VectorFn,
    variance: ScalarFn,
}

impl CustomMeasurement {
    /// Creates a time-varying measurement.
    pub fn new<F, G>(loading: F, variance: G) -> Self
    where
        F: Fn(usize) -> Array1<f64> + Send + Sync + 'static,
        G: Fn(usize) -> f64 + Send + Sync + 'static,
    {
        Self {
            time_invariant: false,
            loading: Arc::new(loading),
            variance: Arc::new(variance),
        }
    }

    /// Declares that the closures ignore `t`.
    pub fn with_time_invariant(mut self, time_invariant: bool) -> Self {
        self.time_invariant = time_invariant;
        self
    }
}

impl fmt::Debug for CustomMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomMeasurement")
            .field("time_invariant", &self.time_invariant)
            .finish_non_exhaustive()
    }
}

/// The observation equation of a model.
#[derive(Debug, Clone)]
pub enum Measurement {
    /// Explicit loading vector.
    Loading {
        /// `Z`, one entry per state.
        loading: Array1<f64>,
        /// Observation-noise variance.
        variance: f64,
    },
    /// Observes a single state.
    Single {
        /// Observed state position.
        position: usize,
        /// Observation-noise variance.
        variance: f64,
    },
    /// Observes the sum of all states.
    Sum {
        /// Observation-noise variance.
        variance: f64,
    },
    /// Observes the sum of the first `count` states.
    PartialSum {
        /// Number of leading states.
        count: usize,
        /// Observation-noise variance.
        variance: f64,
    },
    /// Observes the sum of selected states.
    Selection {
        /// Selected positions.
        positions: Vec<usize>,
        /// Observation-noise variance.
        variance: f64,
    },
    /// Periodic selector over a dummy seasonal of dimension `period - 1`.
    ///
    /// At season `s = (start + t) % period` the loading is `e_s`, except
    /// in the last season where it is `-1` everywhere (the seasonals sum
    /// to zero over a period).
    Circular {
        /// Number of seasons.
        period: usize,
        /// Season of the first observation.
        start: usize,
    },
    /// Periodic selector: observes state `(start + t) % period`.
    Cyclical {
        /// Number of seasons.
        period: usize,
        /// Season of the first observation.
        start: usize,
    },
    /// Block-wise loading over consecutive state blocks, summed.
    ///
    /// Each entry pairs a block dimension with the measurement of that
    /// block, in the order of [`Dynamics::Blocks`](crate::Dynamics::Blocks).
    /// The observation variance is the sum of the block variances.
    Blocks(Vec<(usize, Measurement)>),
    /// Closure-driven measurement.
    Custom(CustomMeasurement),
}

/// Active seasonal position at time `t`.
fn season(period: usize, start: usize, t: usize) -> usize {
    (start + t) % period
}

impl Measurement {
    /// `false` for the periodic selectors and time-varying custom loadings.
    pub fn is_time_invariant(&self) -> bool {
        match self {
            Self::Circular { .. } | Self::Cyclical { .. } => false,
            Self::Blocks(blocks) => blocks.iter().all(|(_, m)| m.is_time_invariant()),
            Self::Custom(c) => c.time_invariant,
            _ => true,
        }
    }

    /// Checks the measurement against a state of dimension `dim`.
    pub fn validate(&self, dim: usize) -> Result<(), ModelError> {
        let check_position = |position: usize| {
            if position < dim {
                Ok(())
            } else {
                Err(ModelError::PositionOutOfRange { position, dim })
            }
        };
        let variance = match self {
            Self::Loading { loading, variance } => {
                if loading.len() != dim {
                    return Err(ModelError::DimensionMismatch {
                        what: "loading",
                        expected: dim,
                        got: loading.len(),
                    });
                }
                *variance
            }
            Self::Single { position, variance } => {
                check_position(*position)?;
                *variance
            }
            Self::Sum { variance } => *variance,
            Self::PartialSum { count, variance } => {
                if *count == 0 || *count > dim {
                    return Err(ModelError::DimensionMismatch {
                        what: "partial sum",
                        expected: dim,
                        got: *count,
                    });
                }
                *variance
            }
            Self::Selection {
                positions,
                variance,
            } => {
                positions.iter().copied().try_for_each(check_position)?;
                *variance
            }
            Self::Circular { period, .. } => {
                if *period < 2 {
                    return Err(ModelError::InvalidPeriod { period: *period });
                }
                if period - 1 != dim {
                    return Err(ModelError::DimensionMismatch {
                        what: "circular measurement",
                        expected: dim,
                        got: period - 1,
                    });
                }
                0.0
            }
            Self::Cyclical { period, .. } => {
                if *period < 2 {
                    return Err(ModelError::InvalidPeriod { period: *period });
                }
                check_position(period - 1)?;
                0.0
            }
            Self::Blocks(blocks) => {
                let total: usize = blocks.iter().map(|(n, _)| n).sum();
                if blocks.is_empty() || total != dim {
                    return Err(ModelError::DimensionMismatch {
                        what: "measurement blocks",
                        expected: dim,
                        got: total,
                    });
                }
                for (n, m) in blocks {
                    m.validate(*n)?;
                }
                0.0
            }
            Self::Custom(c) => {
                let z = (c.loading)(0);
                if z.len() != dim {
                    return Err(ModelError::DimensionMismatch {
                        what: "loading",
                        expected: dim,
                        got: z.len(),
                    });
                }
                (c.variance)(0)
            }
        };
        if variance.is_finite() && variance >= 0.0 {
            Ok(())
        } else {
            Err(ModelError::InvalidVariance {
                what: "observation variance",
                value: variance,
            })
        }
    }

    /// `Z(t)·x`.
    pub fn dot(&self, t: usize, x: ArrayView1<'_, f64>) -> f64 {
        match self {
            Self::Loading { loading, .. } => loading.dot(&x),
            Self::Single { position, .. } => x[*position],
            Self::Sum { .. } => x.sum(),
            Self::PartialSum { count, .. } => x.slice(s![..*count]).sum(),
            Self::Selection { positions, .. } => positions.iter().map(|&i| x[i]).sum(),
            Self::Circular { period, start } => {
                let pos = season(*period, *start, t);
                if pos == period - 1 { -x.sum() } else { x[pos] }
            }
            Self::Cyclical { period, start } => x[season(*period, *start, t)],
            Self::Blocks(blocks) => {
                let mut start = 0;
                let mut sum = 0.0;
                for (n, m) in blocks {
                    sum += m.dot(t, x.slice(s![start..start + n]));
                    start += n;
                }
                sum
            }
            Self::Custom(c) => (c.loading)(t).dot(&x),
        }
    }

    /// `x ← x + d·Z(t)ᵀ`.
    pub fn add(&self, t: usize, mut x: ArrayViewMut1<'_, f64>, d: f64) {
        match self {
            Self::Loading { loading, .. } => x.scaled_add(d, loading),
            Self::Single { position, .. } => x[*position] += d,
            Self::Sum { .. } => x += d,
            Self::PartialSum { count, .. } => {
                let mut head = x.slice_mut(s![..*count]);
                head += d;
            }
            Self::Selection { positions, .. } => {
                for &i in positions {
                    x[i] += d;
                }
            }
            Self::Circular { period, start } => {
                let pos = season(*period, *start, t);
                if pos == period - 1 {
                    x -= d;
                } else {
                    x[pos] += d;
                }
            }
            Self::Cyclical { period, start } => x[season(*period, *start, t)] += d,
            Self::Blocks(blocks) => {
                let mut start = 0;
                for (n, m) in blocks {
                    m.add(t, x.slice_mut(s![start..start + n]), d);
                    start += n;
                }
            }
            Self::Custom(c) => x.scaled_add(d, &(c.loading)(t)),
        }
    }

    /// Observation-noise variance `H(t)`.
    pub fn variance(&self, t: usize) -> f64 {
        match self {
            Self::Loading { variance, .. }
            | Self::Single { variance, .. }
            | Self::Sum { variance }
            | Self::PartialSum { variance, .. }
            | Self::Selection { variance, .. } => *variance,
            Self::Circular { .. } | Self::Cyclical { .. } => 0.0,
            Self::Blocks(blocks) => blocks.iter().map(|(_, m)| m.variance(t)).sum(),
            Self::Custom(c) => (c.variance)(t),
        }
    }
}
