//! Step observers: ordered callbacks invoked at fixed phases of the time
//! loop.

use nalgebra::DVector;

/// Read-only view of the step under consideration.
#[derive(Debug)]
pub struct StepView<'a> {
    /// Time of the point being accepted / evaluated.
    pub time: f64,
    /// Step size taken to reach it.
    pub delta: f64,
    /// Integration order in effect.
    pub order: usize,
    /// Converged solution at the point.
    pub solution: &'a DVector<f64>,
}

/// Observer attached to the engine.
///
/// Observers are invoked in registration order at each phase and cannot
/// reorder themselves during invocation.
pub trait StepObserver {
    /// Called after a step passes the truncation-error test, before the
    /// history ring shifts.
    fn before_accept(&mut self, _view: &StepView<'_>) {}

    /// Called after the history ring has shifted.
    fn after_accept(&mut self, _view: &StepView<'_>) {}

    /// Node-truncation hook: called during evaluation with the
    /// LTE-proposed next step. An observer may lower (never raise) the
    /// proposal by writing through `delta_max`.
    fn on_truncate(&mut self, _view: &StepView<'_>, _delta_max: &mut f64) {}
}
