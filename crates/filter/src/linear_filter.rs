//! Replays stored Kalman gains on other series.

use ndarray::{Array1, Array2};
use ssf_model::StateSpace;

use crate::state::DiffuseInnovation;
use crate::storage::FilteringResults;

/// Applies the gains of a completed forward pass to another series.
///
/// Starting from a zero state, each observed step computes
/// `e = x − Z·a`, updates `a` with the stored gain (`Mi/fi` on diffuse
/// steps, `M/f` otherwise) and moves it with `T`. The output is the
/// innovation sequence the original filter would have produced on `x`,
/// which whitens regression variables for GLS.
///
/// Steps missing in the original series, diffuse steps and steps with a
/// zero prediction variance carry no innovation: they come out as `NaN`
/// from [`LinearFilter::filter`] and are dropped by
/// [`LinearFilter::transform`].
#[derive(Debug)]
pub struct LinearFilter<'a, S: ?Sized> {
    model: &'a S,
    results: &'a FilteringResults,
    normalized: bool,
}

impl<'a, S: StateSpace + ?Sized> LinearFilter<'a, S> {
    /// Replays the gains of `results`, which must come from `model`.
    pub fn new(model: &'a S, results: &'a FilteringResults) -> Self {
        Self {
            model,
            results,
            normalized: true,
        }
    }

    /// Divides innovations by `√f` (the default).
    pub fn with_normalized(mut self, normalized: bool) -> Self {
        self.normalized = normalized;
        self
    }

    /// Number of innovations [`LinearFilter::transform`] returns for the
    /// first `len` periods, or `None` beyond the stored results.
    pub fn output_len(&self, len: usize) -> Option<usize> {
        if len > self.results.len() {
            return None;
        }
        let count = (0..len)
            .filter_map(|t| self.results.error(t))
            .filter(|e| !e.is_missing() && !e.is_diffuse_step() && e.variance > 0.0)
            .count();
        Some(count)
    }

    /// One innovation per period, `NaN` where there is none.
    ///
    /// Returns `None` when `x` is longer than the stored results or when
    /// the results come from the augmented filter.
    pub fn filter(&self, x: &[f64]) -> Option<Vec<f64>> {
        if x.len() > self.results.len() {
            return None;
        }
        let mut a = Array1::zeros(self.model.state_dim());
        let mut out = Vec::with_capacity(x.len());
        for (t, &xt) in x.iter().enumerate() {
            let error = self.results.error(t)?;
            let mut value = f64::NAN;
            if !error.is_missing() {
                let e = xt - self.model.loading_dot(t, a.view());
                match &error.diffuse {
                    Some(DiffuseInnovation::Constraints { .. }) => return None,
                    Some(DiffuseInnovation::Covariance { variance: fi, gain }) if *fi != 0.0 => {
                        a.scaled_add(e / fi, gain);
                    }
                    _ => {
                        let f = error.variance;
                        if f > 0.0 {
                            a.scaled_add(e / f, &error.gain);
                            value = if self.normalized { e / f.sqrt() } else { e };
                        }
                    }
                }
            }
            self.model.transition(t, a.view_mut());
            out.push(value);
        }
        Some(out)
    }

    /// Innovations of the informative periods only.
    pub fn transform(&self, x: &[f64]) -> Option<Vec<f64>> {
        self.filter(x)
            .map(|v| v.into_iter().filter(|e| !e.is_nan()).collect())
    }

    /// [`LinearFilter::transform`] applied to every column of `x`
    /// (rows are periods).
    pub fn transform_columns(&self, x: &Array2<f64>) -> Option<Array2<f64>> {
        let columns = x
            .columns()
            .into_iter()
            .map(|c| self.transform(&c.to_vec()))
            .collect::<Option<Vec<_>>>()?;
        let rows = columns.first().map_or(0, Vec::len);
        Some(Array2::from_shape_fn((rows, columns.len()), |(i, j)| {
            columns[j][i]
        }))
    }
}
