//! Solution history ring for the multistep integrator.

use nalgebra::DVector;

/// One time point: the solution vector and the step taken to reach it.
#[derive(Debug, Clone)]
pub struct IntegrationState {
    /// Simulated time at which this solution holds.
    pub time: f64,
    /// Step size taken to reach this state.
    pub delta: f64,
    /// Node voltages and branch currents for all unknowns.
    pub solution: DVector<f64>,
}

/// Ring of `max_order + 2` integration states.
///
/// Slot `[0]` is the point currently being computed; `[1..]` are accepted
/// history, oldest last. A shift rotates the ring by one so the oldest slot
/// becomes the new current point, reseeded from the last accepted state.
#[derive(Debug, Clone)]
pub struct History {
    states: Vec<IntegrationState>,
}

impl History {
    /// Create a history ring of `depth` slots for `size` unknowns.
    pub fn new(depth: usize, size: usize) -> Self {
        let state = IntegrationState {
            time: 0.0,
            delta: 0.0,
            solution: DVector::zeros(size),
        };
        Self {
            states: vec![state; depth],
        }
    }

    pub fn depth(&self) -> usize {
        self.states.len()
    }

    pub fn state(&self, i: usize) -> &IntegrationState {
        &self.states[i]
    }

    pub fn state_mut(&mut self, i: usize) -> &mut IntegrationState {
        &mut self.states[i]
    }

    /// The point currently being computed.
    pub fn current(&self) -> &IntegrationState {
        &self.states[0]
    }

    pub fn current_mut(&mut self) -> &mut IntegrationState {
        &mut self.states[0]
    }

    /// Step sizes newest-first: `[0]` is the candidate step being probed.
    pub fn deltas(&self) -> Vec<f64> {
        self.states.iter().map(|s| s.delta).collect()
    }

    /// Rotate the ring: the current point becomes `state[1]`, the oldest
    /// slot is recycled as the new current point and reseeded from the
    /// just-accepted state.
    pub fn shift(&mut self) {
        self.states.rotate_right(1);
        let (current, rest) = self.states.split_at_mut(1);
        let accepted = &rest[0];
        current[0].time = accepted.time;
        current[0].delta = accepted.delta;
        current[0].solution.copy_from(&accepted.solution);
    }

    /// Seed every slot with the same time, delta and solution (transient
    /// entry from a DC operating point).
    pub fn seed(&mut self, time: f64, delta: f64, solution: &DVector<f64>) {
        for s in &mut self.states {
            s.time = time;
            s.delta = delta;
            s.solution.copy_from(solution);
        }
    }
}
