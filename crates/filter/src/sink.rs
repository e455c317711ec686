//! The callback every forward and backward pass reports to.

use crate::state::{Phase, PredictionError, State};

/// Receives per-step snapshots from the filters and smoothers.
///
/// Every method has an empty default, so a sink only implements what it
/// records. `()` discards everything; `&mut S` forwards; `(A, B)` feeds
/// both members in order.
pub trait ResultsSink {
    /// Called with the state at `t`, tagged with its phase.
    fn save_state(&mut self, _t: usize, _state: &State, _phase: Phase) {}

    /// Called with the prediction error at `t` (missing ones included).
    fn save_error(&mut self, _t: usize, _error: &PredictionError) {}

    /// Called once when the diffuse phase ends; `end` is the first
    /// non-diffuse index.
    fn close_diffuse(&mut self, _end: usize) {}
}

impl ResultsSink for () {}

impl<S: ResultsSink + ?Sized> ResultsSink for &mut S {
    fn save_state(&mut self, t: usize, state: &State, phase: Phase) {
        (**self).save_state(t, state, phase);
    }

    fn save_error(&mut self, t: usize, error: &PredictionError) {
        (**self).save_error(t, error);
    }

    fn close_diffuse(&mut self, end: usize) {
        (**self).close_diffuse(end);
    }
}

impl<A: ResultsSink, B: ResultsSink> ResultsSink for (A, B) {
    fn save_state(&mut self, t: usize, state: &State, phase: Phase) {
        self.0.save_state(t, state, phase);
        self.1.save_state(t, state, phase);
    }

    fn save_error(&mut self, t: usize, error: &PredictionError) {
        self.0.save_error(t, error);
        self.1.save_error(t, error);
    }

    fn close_diffuse(&mut self, end: usize) {
        self.0.close_diffuse(end);
        self.1.close_diffuse(end);
    }
}
