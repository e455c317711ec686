//! Observation series and regression designs.

use ndarray::{Array1, Array2};

use crate::error::ModelError;

/// Univariate series with explicit missing values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SsfData {
    values: Vec<Option<f64>>,
}

impl SsfData {
    /// Creates a series from optional observations.
    pub fn new(values: Vec<Option<f64>>) -> Self {
        Self { values }
    }

    /// Creates a series where every non-finite value is missing.
    pub fn from_nan_coded(values: &[f64]) -> Self {
        Self {
            values: values
                .iter()
                .map(|&v| v.is_finite().then_some(v))
                .collect(),
        }
    }

    /// Number of periods, missing ones included.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// `true` when the series has no periods.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Observation at `t`; `None` when missing or past the end.
    pub fn get(&self, t: usize) -> Option<f64> {
        self.values.get(t).copied().flatten()
    }

    /// `true` when period `t` is missing or past the end.
    pub fn is_missing(&self, t: usize) -> bool {
        self.get(t).is_none()
    }

    /// `true` when at least one period is missing.
    pub fn has_missing(&self) -> bool {
        self.values.iter().any(Option::is_none)
    }

    /// Number of non-missing periods.
    pub fn observed_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    /// Raw values.
    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    /// Copy of the series with period `t` replaced.
    pub fn with_value(&self, t: usize, value: Option<f64>) -> Self {
        let mut values = self.values.clone();
        if let Some(slot) = values.get_mut(t) {
            *slot = value;
        }
        Self { values }
    }
}

impl From<Vec<Option<f64>>> for SsfData {
    fn from(values: Vec<Option<f64>>) -> Self {
        Self::new(values)
    }
}

impl From<&[f64]> for SsfData {
    fn from(values: &[f64]) -> Self {
        Self::from_nan_coded(values)
    }
}

impl From<Vec<f64>> for SsfData {
    fn from(values: Vec<f64>) -> Self {
        Self::from_nan_coded(&values)
    }
}

/// Regression design whose diffuse columns enter the augmented filter.
///
/// Row `t` of `x` holds the regressors of period `t`. Only the columns
/// listed in `diffuse` carry unknown (diffuse) coefficients; the filters
/// consume those columns and ignore the others.
#[derive(Debug, Clone, PartialEq)]
pub struct Regressors {
    x: Array2<f64>,
    diffuse: Vec<usize>,
}

impl Regressors {
    /// Creates a design. Every listed column must exist, appear once and
    /// hold finite values.
    pub fn new(x: Array2<f64>, diffuse: Vec<usize>) -> Result<Self, ModelError> {
        let k = x.ncols();
        for (i, &col) in diffuse.iter().enumerate() {
            if col >= k {
                return Err(ModelError::InvalidRegressors(format!(
                    "column {col} out of range for {k} regressors"
                )));
            }
            if diffuse[..i].contains(&col) {
                return Err(ModelError::InvalidRegressors(format!(
                    "column {col} listed twice"
                )));
            }
            if x.column(col).iter().any(|v| !v.is_finite()) {
                return Err(ModelError::InvalidRegressors(format!(
                    "column {col} contains non-finite values"
                )));
            }
        }
        Ok(Self { x, diffuse })
    }

    /// Design where every column is diffuse.
    pub fn all_diffuse(x: Array2<f64>) -> Result<Self, ModelError> {
        let k = x.ncols();
        Self::new(x, (0..k).collect())
    }

    /// Number of rows.
    pub fn nobs(&self) -> usize {
        self.x.nrows()
    }

    /// Number of diffuse columns.
    pub fn diffuse_count(&self) -> usize {
        self.diffuse.len()
    }

    /// Full design matrix.
    pub fn design(&self) -> &Array2<f64> {
        &self.x
    }

    /// Diffuse regressors of period `t`.
    pub fn diffuse_row(&self, t: usize) -> Array1<f64> {
        let row = self.x.row(t);
        self.diffuse.iter().map(|&j| row[j]).collect()
    }
}
