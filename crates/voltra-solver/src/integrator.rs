//! The variable-order, variable-step integration engine.
//!
//! Drives simulated time from `tstart` to `tstop`. Each candidate step is
//! *probed* (time advanced, coefficients recomputed, solution predicted),
//! solved by the Newton controller, then *evaluated* against the local
//! truncation error of every tracked dynamic state. Accepted steps shift
//! the history ring and may raise the order; rejected steps shrink the
//! step and retry. Breakpoints (source edges, the final time) are always
//! landed on exactly and reset the method to order 1.

use nalgebra::DVector;

use crate::breakpoints::Breakpoints;
use crate::coeffs::Coefficients;
use crate::config::{Method, Options, TimeConfig};
use crate::error::{Error, Result};
use crate::history::History;
use crate::observer::{StepObserver, StepView};
use crate::state::{LteTolerances, StateArena, StateHandle};

/// Accept threshold: a step passes when the LTE-permitted step exceeds
/// 90% of the step actually taken.
const ACCEPT_RATIO: f64 = 0.9;
/// A tentatively raised order is kept when it buys more than 5% of step.
const ORDER_KEEP_RATIO: f64 = 1.05;
/// Step divisor applied when Newton fails to converge.
const NONCONV_CUT: f64 = 8.0;

/// The integration engine.
#[derive(Debug)]
pub struct Integrator {
    method: Method,
    max_order: usize,
    order: usize,
    history: History,
    arena: StateArena,
    coeffs: Coefficients,
    prediction: DVector<f64>,
    breakpoints: Breakpoints,
    /// Step size in force before breakpoint snapping shortened it.
    saved_delta: f64,
    /// Set when the probed step has been snapped to land on a breakpoint.
    break_target: Option<f64>,
    /// Accepted points so far, counting the initial condition.
    accepted: usize,
    tstart: f64,
    tstop: f64,
    tmax: f64,
    delta_min: f64,
    expansion: f64,
    lte_tol: LteTolerances,
}

impl Integrator {
    /// Create an engine for the given method and maximum order.
    pub fn new(method: Method, max_order: usize) -> Result<Self> {
        if max_order < 1 || max_order > method.order_limit() {
            return Err(Error::Misconfigured(format!(
                "max_order {} out of range [1, {}] for {:?}",
                max_order,
                method.order_limit(),
                method
            )));
        }
        let coeffs = Coefficients::compute(method, 1, 0, &[1.0, 1.0])
            .expect("order-1 coefficients are well-defined");
        Ok(Self {
            method,
            max_order,
            order: 1,
            history: History::new(0, 0),
            arena: StateArena::new(max_order + 2),
            coeffs,
            prediction: DVector::zeros(0),
            breakpoints: Breakpoints::new(0.0),
            saved_delta: 0.0,
            break_target: None,
            accepted: 0,
            tstart: 0.0,
            tstop: 0.0,
            tmax: 0.0,
            delta_min: 0.0,
            expansion: 2.0,
            lte_tol: LteTolerances {
                trtol: 7.0,
                reltol: 1e-3,
                abstol: 1e-12,
                chgtol: 1e-14,
                delta_min: 0.0,
            },
        })
    }

    /// Allocate the history ring and prediction vector, seed the breakpoint
    /// set with the start and stop times, and latch the tolerances.
    pub fn setup(&mut self, size: usize, time: &TimeConfig, opts: &Options) {
        let depth = self.max_order + 2;
        self.history = History::new(depth, size);
        self.arena = StateArena::new(depth);
        self.prediction = DVector::zeros(size);
        self.breakpoints = Breakpoints::new(50.0 * time.delta_min);
        self.breakpoints.set(time.tstart);
        self.breakpoints.set(time.tstop);
        self.tstart = time.tstart;
        self.tstop = time.tstop;
        self.tmax = time.tmax;
        self.delta_min = time.delta_min;
        self.expansion = opts.expansion;
        self.lte_tol = LteTolerances {
            trtol: opts.trtol,
            reltol: opts.reltol,
            abstol: opts.abstol,
            chgtol: opts.chgtol,
            delta_min: time.delta_min,
        };
        self.order = 1;
        self.accepted = 0;
        self.saved_delta = time.tmax;
        self.break_target = None;
    }

    /// Reset for transient entry: order 1, every history delta at the
    /// maximum step. The seeded initial point counts as accepted.
    pub fn initialize(&mut self) {
        self.order = 1;
        self.accepted = 1;
        self.saved_delta = self.tmax;
        self.break_target = None;
        for i in 0..self.history.depth() {
            self.history.state_mut(i).delta = self.tmax;
        }
    }

    /// Release all per-run allocations.
    pub fn unsetup(&mut self) {
        self.history = History::new(0, 0);
        self.prediction = DVector::zeros(0);
        self.arena.release();
        self.breakpoints.release();
        self.accepted = 0;
    }

    /// Create a dynamic state slot; tracked slots join the LTE poll set.
    pub fn create_derivative(&mut self, track: bool) -> StateHandle {
        self.arena.create(track)
    }

    /// Time of the point currently being computed.
    pub fn time(&self) -> f64 {
        self.history.current().time
    }

    /// Candidate step of the point currently being computed.
    pub fn delta(&self) -> f64 {
        self.history.current().delta
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Accepted points so far, counting the initial condition.
    pub fn accepted(&self) -> usize {
        self.accepted
    }

    pub fn delta_min(&self) -> f64 {
        self.delta_min
    }

    pub fn breakpoints(&self) -> &Breakpoints {
        &self.breakpoints
    }

    pub fn breakpoints_mut(&mut self) -> &mut Breakpoints {
        &mut self.breakpoints
    }

    pub fn prediction(&self) -> &DVector<f64> {
        &self.prediction
    }

    pub(crate) fn history(&self) -> &History {
        &self.history
    }

    pub(crate) fn history_mut(&mut self) -> &mut History {
        &mut self.history
    }

    pub(crate) fn arena_mut(&mut self) -> &mut StateArena {
        &mut self.arena
    }

    /// Split borrows for the device load context.
    pub(crate) fn load_parts(
        &mut self,
    ) -> (&Coefficients, &DVector<f64>, &mut StateArena, &mut Breakpoints) {
        (
            &self.coeffs,
            &self.prediction,
            &mut self.arena,
            &mut self.breakpoints,
        )
    }

    /// Clamp a proposed step and apply breakpoint snapping.
    ///
    /// Starting a step at a breakpoint (including the very first step)
    /// forces order 1 and the post-breakpoint small-step rule, then
    /// consumes the breakpoint. A step that would cross the next breakpoint
    /// is shortened to land on it exactly.
    pub fn continue_step(&mut self, delta: &mut f64) {
        *delta = delta.min(self.tmax);
        let t = self.history.state(1).time;
        let eps = self.breakpoints.resolution().max(self.delta_min);

        let Some(b) = self.breakpoints.first() else {
            self.break_target = None;
            return;
        };

        if b - t <= eps {
            // Starting at (or indistinguishably close to) a breakpoint.
            self.order = 1;
            let gap = self
                .breakpoints
                .second()
                .map(|b2| b2 - b)
                .unwrap_or(f64::INFINITY);
            *delta = delta.min(0.1 * self.saved_delta.min(gap));
            if t == self.tstart {
                *delta *= 0.1;
            }
            *delta = delta.max(2.0 * self.delta_min);
            self.breakpoints.pop_first();
            self.break_target = None;
            log::debug!(
                "breakpoint at t = {:.6e} s: order -> 1, delta = {:.3e} s",
                b,
                *delta
            );
        } else if t + *delta >= b {
            self.saved_delta = *delta;
            *delta = b - t;
            self.break_target = Some(b);
        } else {
            self.break_target = None;
        }
    }

    /// Advance the current point to `state[1].time + delta`, recompute the
    /// coefficients for the current order and delta sequence, and write the
    /// polynomial prediction into the prediction vector.
    pub fn probe(&mut self, delta: f64) -> Result<()> {
        let t1 = self.history.state(1).time;
        let time = match self.break_target {
            Some(b) => b,
            None => t1 + delta,
        };
        {
            let cur = self.history.current_mut();
            cur.time = time;
            cur.delta = delta;
        }

        let deltas = self.history.deltas();
        let pred_order = self.order.min(self.accepted.saturating_sub(1));
        self.coeffs = Coefficients::compute(self.method, self.order, pred_order, &deltas)?;

        self.prediction.fill(0.0);
        for (j, c) in self.coeffs.predictor().iter().enumerate() {
            self.prediction
                .axpy(*c, &self.history.state(j + 1).solution, 1.0);
        }
        Ok(())
    }

    /// Apply the LTE acceptance rule to the converged point in `state[0]`.
    ///
    /// Returns `(true, δ_next)` on accept and `(false, δ_next)` on reject;
    /// `δ_next` never exceeds `expansion` times the step just taken.
    pub fn evaluate(&mut self, observers: &mut [Box<dyn StepObserver>]) -> (bool, f64) {
        let delta_cur = self.history.current().delta;

        // The first point after the operating point has no meaningful
        // history to difference against.
        if self.accepted <= 1 {
            return (true, delta_cur * self.expansion);
        }

        let deltas = self.history.deltas();
        let lte_order = self.order.min(self.accepted - 1).min(self.max_order);
        let mut delta_new = self.poll_truncation(lte_order, &deltas);

        // Node-truncation hook: observers may lower the proposal.
        {
            let cur = self.history.current();
            let view = StepView {
                time: cur.time,
                delta: delta_cur,
                order: self.order,
                solution: &cur.solution,
            };
            for obs in observers.iter_mut() {
                let mut proposal = delta_new;
                obs.on_truncate(&view, &mut proposal);
                if proposal < delta_new {
                    delta_new = proposal;
                }
            }
        }

        if delta_new > ACCEPT_RATIO * delta_cur {
            if self.order < self.max_order && self.accepted >= self.order + 2 {
                let trial = self.poll_truncation(self.order + 1, &deltas);
                if trial > ORDER_KEEP_RATIO * delta_new {
                    log::debug!(
                        "t = {:.6e} s: order {} -> {} (delta {:.3e} -> {:.3e})",
                        self.history.current().time,
                        self.order,
                        self.order + 1,
                        delta_new,
                        trial
                    );
                    self.order += 1;
                    delta_new = trial;
                }
            }
            (true, delta_new.min(self.expansion * delta_cur))
        } else {
            log::debug!(
                "t = {:.6e} s: step rejected, delta {:.3e} -> {:.3e}",
                self.history.current().time,
                delta_cur,
                delta_new
            );
            (false, delta_new)
        }
    }

    /// Smallest LTE-permitted step over all tracked states at the given
    /// order.
    fn poll_truncation(&self, order: usize, deltas: &[f64]) -> f64 {
        let mut delta_max = f64::MAX;
        for h in self.arena.tracked_handles() {
            delta_max =
                delta_max.min(self.arena.truncate(h, self.method, order, deltas, &self.lte_tol));
        }
        delta_max
    }

    /// Commit the point in `state[0]`: shift the history ring and the state
    /// arena, clear strictly-passed breakpoints.
    ///
    /// A breakpoint that was hit exactly stays in the set; the next
    /// [`continue_step`](Integrator::continue_step) consumes it after
    /// applying the order-1 reset and the post-breakpoint step rule.
    pub fn accept(&mut self, observers: &mut [Box<dyn StepObserver>]) {
        {
            let cur = self.history.current();
            let view = StepView {
                time: cur.time,
                delta: cur.delta,
                order: self.order,
                solution: &cur.solution,
            };
            for obs in observers.iter_mut() {
                obs.before_accept(&view);
            }
        }

        self.history.shift();
        self.arena.shift();
        self.accepted += 1;
        let t = self.history.state(1).time;
        self.breakpoints.clear_passed(t);
        self.break_target = None;

        {
            let acc = self.history.state(1);
            let view = StepView {
                time: acc.time,
                delta: acc.delta,
                order: self.order,
                solution: &acc.solution,
            };
            for obs in observers.iter_mut() {
                obs.after_accept(&view);
            }
        }
    }

    /// React to a Newton failure: force order 1 and return the step cut by
    /// eight. The caller retries, or fails the run once the cut step would
    /// drop below the minimum.
    pub fn non_convergence(&mut self) -> f64 {
        self.order = 1;
        self.history.current().delta / NONCONV_CUT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    fn engine(tstop: f64) -> Integrator {
        let mut it = Integrator::new(Method::Gear, 2).unwrap();
        let time = TimeConfig::new(tstop);
        it.setup(1, &time, &Options::default());
        it.initialize();
        it.history_mut().seed(0.0, time.tmax, &dvector![0.0]);
        it
    }

    #[test]
    fn test_rejects_bad_order() {
        assert!(Integrator::new(Method::Trapezoidal, 3).is_err());
        assert!(Integrator::new(Method::Gear, 0).is_err());
        assert!(Integrator::new(Method::Gear, 6).is_ok());
    }

    #[test]
    fn test_first_step_rule() {
        let mut it = engine(1e-3);
        let tmax = 2e-5;

        let mut delta = tmax;
        it.continue_step(&mut delta);

        // At t = tstart the engine is at a breakpoint: order 1, the step
        // shrinks to 0.1·min(saved, gap) and then by another 10x.
        assert_eq!(it.order(), 1);
        assert!(delta <= 0.01 * tmax + 1e-20, "first delta = {}", delta);
        // The tstart breakpoint is consumed; tstop remains.
        assert_eq!(it.breakpoints().first(), Some(1e-3));
    }

    #[test]
    fn test_breakpoint_snapping() {
        let mut it = engine(1e-3);
        // Consume the tstart breakpoint.
        let mut delta = 1e-5;
        it.continue_step(&mut delta);

        // Register a source edge and pretend we are halfway to it.
        it.breakpoints_mut().set(5e-4);
        it.history_mut().state_mut(1).time = 4.9e-4;

        let mut delta = 5e-5;
        it.continue_step(&mut delta);
        assert!((delta - 1e-5).abs() < 1e-18, "snapped delta = {}", delta);

        // The probe lands on the breakpoint exactly.
        it.probe(delta).unwrap();
        assert_eq!(it.time(), 5e-4);
    }

    #[test]
    fn test_order_reset_after_breakpoint() {
        let mut it = engine(1e-3);
        let mut delta = 1e-5;
        it.continue_step(&mut delta);

        // Pretend we accepted up to a registered edge at t = 5e-4.
        it.breakpoints_mut().set(5e-4);
        it.history_mut().state_mut(1).time = 5e-4;
        it.order = 2;

        let mut delta = 1e-5;
        it.continue_step(&mut delta);
        assert_eq!(it.order(), 1);
    }

    #[test]
    fn test_probe_prediction_constant_history() {
        let mut it = engine(1e-3);
        it.history_mut().seed(0.0, 1e-5, &dvector![2.5]);
        it.probe(1e-5).unwrap();
        assert!((it.prediction()[0] - 2.5).abs() < 1e-12);
        assert!((it.time() - 1e-5).abs() < 1e-18);
    }

    #[test]
    fn test_first_point_accepts_unconditionally() {
        let mut it = engine(1e-3);
        it.probe(1e-5).unwrap();
        let (ok, next) = it.evaluate(&mut []);
        assert!(ok);
        assert!(next <= 2.0 * 1e-5 + 1e-18);
    }

    #[test]
    fn test_non_convergence_cuts_and_resets() {
        let mut it = engine(1e-3);
        it.order = 2;
        it.history_mut().current_mut().delta = 8e-6;

        let next = it.non_convergence();
        assert_eq!(it.order(), 1);
        assert!((next - 1e-6).abs() < 1e-18);
    }

    #[test]
    fn test_accept_shifts_and_counts() {
        let mut it = engine(1e-3);
        let mut delta = 1e-5;
        it.continue_step(&mut delta);
        it.probe(delta).unwrap();
        it.history_mut().current_mut().solution[0] = 1.0;

        let before = it.accepted();
        it.accept(&mut []);
        assert_eq!(it.accepted(), before + 1);
        assert_eq!(it.history().state(1).solution[0], 1.0);
    }

    #[test]
    fn test_observer_phases() {
        use std::cell::RefCell;
        use std::rc::Rc;

        struct Recorder {
            phases: Rc<RefCell<Vec<&'static str>>>,
        }
        impl StepObserver for Recorder {
            fn before_accept(&mut self, _: &StepView<'_>) {
                self.phases.borrow_mut().push("before");
            }
            fn after_accept(&mut self, _: &StepView<'_>) {
                self.phases.borrow_mut().push("after");
            }
        }

        let phases = Rc::new(RefCell::new(Vec::new()));
        let mut obs: Vec<Box<dyn StepObserver>> = vec![Box::new(Recorder {
            phases: phases.clone(),
        })];

        let mut it = engine(1e-3);
        let mut delta = 1e-5;
        it.continue_step(&mut delta);
        it.probe(delta).unwrap();
        it.accept(&mut obs);

        assert_eq!(*phases.borrow(), vec!["before", "after"]);
    }

    #[test]
    fn test_on_truncate_can_lower_proposal() {
        struct Clamp;
        impl StepObserver for Clamp {
            fn on_truncate(&mut self, _: &StepView<'_>, delta_max: &mut f64) {
                *delta_max = delta_max.min(1e-7);
            }
        }

        let mut it = engine(1e-3);
        // Two accepted points so evaluate runs the LTE path.
        let mut delta = 1e-5;
        it.continue_step(&mut delta);
        it.probe(delta).unwrap();
        it.accept(&mut []);
        it.probe(1e-5).unwrap();

        let mut obs: Vec<Box<dyn StepObserver>> = vec![Box::new(Clamp)];
        let (ok, next) = it.evaluate(&mut obs);
        // With no tracked states the LTE poll is unbounded; the hook is the
        // only limiter.
        assert!(!ok || next <= 1e-7 + 1e-20);
        assert!(next <= 1e-7 + 1e-20, "hook must cap the proposal: {}", next);
    }
}
