//! Per-element dynamic state storage and truncation-error estimation.
//!
//! Dynamic devices (a capacitor's charge, an inductor's current, MOSFET
//! charge terms) own one arena slot each, created during setup. The arena
//! stores the slot's value and time-derivative at every history position
//! and rotates in lock-step with the solution history. Devices hold only
//! the integer [`StateHandle`], so there is no ownership cycle between
//! devices, states and the engine.

use crate::coeffs::Coefficients;
use crate::config::Method;

/// Handle to one dynamic state slot in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateHandle(pub(crate) usize);

/// Resistive companion of an integrated state at the current point:
/// `ẏ ≈ geq·y + ieq`.
#[derive(Debug, Clone, Copy)]
pub struct IntegrationResult {
    /// Time-derivative of the state at the current point.
    pub derivative: f64,
    /// `∂ẏ₀/∂y₀`, the conductance-like factor of the companion model.
    pub geq: f64,
    /// History term of the companion model.
    pub ieq: f64,
}

/// Tolerances consulted by [`StateArena::truncate`].
#[derive(Debug, Clone, Copy)]
pub struct LteTolerances {
    pub trtol: f64,
    pub reltol: f64,
    pub abstol: f64,
    pub chgtol: f64,
    pub delta_min: f64,
}

/// Arena of dynamic state slots across the history ring.
#[derive(Debug, Clone)]
pub struct StateArena {
    depth: usize,
    tracked: Vec<bool>,
    /// `values[pos][slot]` - state value at history position `pos`.
    values: Vec<Vec<f64>>,
    /// `derivatives[pos][slot]` - time-derivative at history position `pos`.
    derivatives: Vec<Vec<f64>>,
}

impl StateArena {
    /// Create an empty arena spanning `depth` history positions.
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            tracked: Vec::new(),
            values: vec![Vec::new(); depth],
            derivatives: vec![Vec::new(); depth],
        }
    }

    /// Create a new state slot. Tracked slots participate in the engine's
    /// truncation-error poll.
    pub fn create(&mut self, track: bool) -> StateHandle {
        let handle = StateHandle(self.tracked.len());
        self.tracked.push(track);
        for pos in 0..self.depth {
            self.values[pos].push(0.0);
            self.derivatives[pos].push(0.0);
        }
        handle
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Handles of all tracked slots.
    pub fn tracked_handles(&self) -> Vec<StateHandle> {
        self.tracked
            .iter()
            .enumerate()
            .filter(|(_, &t)| t)
            .map(|(i, _)| StateHandle(i))
            .collect()
    }

    /// State value at the given history position (0 = current).
    pub fn value(&self, handle: StateHandle, pos: usize) -> f64 {
        self.values[pos][handle.0]
    }

    /// Set the state value at the current point.
    pub fn set_value(&mut self, handle: StateHandle, value: f64) {
        self.values[0][handle.0] = value;
    }

    /// Time-derivative at the given history position (0 = current).
    pub fn derivative(&self, handle: StateHandle, pos: usize) -> f64 {
        self.derivatives[pos][handle.0]
    }

    /// Differentiate the slot's value at the current point using the
    /// supplied coefficients, store the result, and return the resistive
    /// companion pair.
    ///
    /// The caller must have stored the current value with [`set_value`]
    /// (devices do this from the present Newton iterate).
    ///
    /// [`set_value`]: StateArena::set_value
    pub fn integrate(&mut self, handle: StateHandle, coeffs: &Coefficients) -> IntegrationResult {
        let i = handle.0;
        let ag = coeffs.ag();

        let derivative = match coeffs.method() {
            Method::Trapezoidal if coeffs.order() == 2 => {
                ag[0] * self.values[0][i] + ag[1] * self.values[1][i] - self.derivatives[1][i]
            }
            _ => ag
                .iter()
                .enumerate()
                .map(|(pos, a)| a * self.values[pos][i])
                .sum(),
        };

        self.derivatives[0][i] = derivative;
        let geq = coeffs.geq_factor();
        IntegrationResult {
            derivative,
            geq,
            ieq: derivative - geq * self.values[0][i],
        }
    }

    /// Largest next step that keeps this slot's local truncation error
    /// within tolerance.
    ///
    /// The LTE of an order-k step is `C·δ^k·y^(k+1)` in the units of the
    /// state's derivative, with `y^(k+1)` estimated from the (k+1)-th
    /// divided difference across history. The tolerance mixes the
    /// derivative magnitudes with the value magnitudes scaled by the step,
    /// so a charge state is judged through its current. Solving
    /// `trtol·tol = LTE(δ)` gives the bound, clamped below at `delta_min`.
    pub fn truncate(
        &self,
        handle: StateHandle,
        method: Method,
        order: usize,
        deltas: &[f64],
        tol: &LteTolerances,
    ) -> f64 {
        let i = handle.0;
        let points = order + 2;

        // Times of the history points relative to the current point.
        let mut times = vec![0.0; points];
        for p in 1..points {
            times[p] = times[p - 1] - deltas[p - 1];
        }
        let mut table: Vec<f64> = (0..points).map(|p| self.values[p][i]).collect();

        // Divided-difference table; table[0] ends as y^(k+1)/(k+1)! at some
        // point in the spanned interval.
        for level in 1..points {
            for p in 0..points - level {
                table[p] = (table[p] - table[p + 1]) / (times[p] - times[p + level]);
            }
        }
        let diff = table[0];

        // Tolerance in derivative units: the value term is brought down by
        // the current step.
        let deriv_tol = tol.abstol
            + tol.reltol
                * self.derivatives[0][i]
                    .abs()
                    .max(self.derivatives[1][i].abs());
        let value_tol = tol.reltol
            * self.values[0][i]
                .abs()
                .max(self.values[1][i].abs())
                .max(tol.chgtol)
            / deltas[0];
        let tolerance = deriv_tol.max(value_tol);

        let error_coeff = match method {
            Method::Trapezoidal if order == 2 => 1.0 / 12.0,
            _ => 1.0 / (order as f64 + 1.0),
        };
        let factorial: f64 = (1..=points - 1).map(|n| n as f64).product();
        let denom = (error_coeff * factorial * diff.abs()).max(tol.abstol);

        let exponent = 1.0 / order as f64;
        let delta_max = (tol.trtol * tolerance / denom).powf(exponent);
        delta_max.max(tol.delta_min)
    }

    /// Rotate the arena with the solution history; the new current position
    /// starts from the accepted values.
    pub fn shift(&mut self) {
        self.values.rotate_right(1);
        self.derivatives.rotate_right(1);
        let (cur, rest) = self.values.split_at_mut(1);
        cur[0].copy_from_slice(&rest[0]);
        let (cur, rest) = self.derivatives.split_at_mut(1);
        cur[0].copy_from_slice(&rest[0]);
    }

    /// Copy the current values into every history position and zero all
    /// derivatives (transient entry).
    pub fn seed_history(&mut self) {
        for pos in 1..self.depth {
            let (head, tail) = self.values.split_at_mut(pos);
            tail[0].copy_from_slice(&head[0]);
        }
        for derivs in &mut self.derivatives {
            derivs.fill(0.0);
        }
    }

    /// Drop every slot (unsetup).
    pub fn release(&mut self) {
        self.tracked.clear();
        for pos in 0..self.depth {
            self.values[pos].clear();
            self.derivatives[pos].clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coeffs::Coefficients;
    use crate::config::Method;

    fn tolerances() -> LteTolerances {
        LteTolerances {
            trtol: 7.0,
            reltol: 1e-3,
            abstol: 1e-12,
            chgtol: 1e-14,
            delta_min: 1e-15,
        }
    }

    #[test]
    fn test_integrate_backward_euler() {
        let mut arena = StateArena::new(4);
        let h = arena.create(true);

        // Previous value 1.0, current 2.0, δ = 1e-3: ẏ = 1000.
        arena.values[1][h.0] = 1.0;
        arena.set_value(h, 2.0);

        let coeffs = Coefficients::compute(Method::Gear, 1, 0, &[1e-3, 1e-3]).unwrap();
        let r = arena.integrate(h, &coeffs);

        assert!((r.derivative - 1000.0).abs() < 1e-6);
        assert!((r.geq - 1000.0).abs() < 1e-6);
        // ieq = ẏ - geq·y = 1000 - 1000·2 = -1000
        assert!((r.ieq + 1000.0).abs() < 1e-6);
        assert!((arena.derivative(h, 0) - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn test_integrate_trapezoidal_uses_prev_derivative() {
        let mut arena = StateArena::new(4);
        let h = arena.create(true);

        arena.values[1][h.0] = 0.0;
        arena.derivatives[1][h.0] = 500.0;
        arena.set_value(h, 1.0);

        let coeffs = Coefficients::compute(Method::Trapezoidal, 2, 0, &[1e-3, 1e-3]).unwrap();
        let r = arena.integrate(h, &coeffs);

        // ẏ₀ = (2/δ)(y₀ - y₁) - ẏ₁ = 2000 - 500
        assert!((r.derivative - 1500.0).abs() < 1e-6);
        assert!((r.geq - 2000.0).abs() < 1e-6);
    }

    #[test]
    fn test_truncate_linear_history_allows_growth() {
        // A perfectly linear ramp has zero second difference: the LTE bound
        // should be effectively unbounded at order 1.
        let mut arena = StateArena::new(4);
        let h = arena.create(true);
        let d = 1e-6;
        arena.values[0][h.0] = 3.0;
        arena.values[1][h.0] = 2.0;
        arena.values[2][h.0] = 1.0;

        let dmax = arena.truncate(h, Method::Gear, 1, &[d, d, d], &tolerances());
        assert!(dmax > 1.0, "linear history should allow huge steps: {}", dmax);
    }

    #[test]
    fn test_truncate_scales_with_curvature() {
        let mut arena = StateArena::new(5);
        let h = arena.create(true);
        let d = 1e-6;

        // Quadratic history: y(t) = t² around the current point.
        let times = [0.0, -d, -2.0 * d];
        for (pos, &t) in times.iter().enumerate() {
            arena.values[pos][h.0] = t * t;
        }
        let small_curv = arena.truncate(h, Method::Gear, 1, &[d, d, d, d], &tolerances());

        for (pos, &t) in times.iter().enumerate() {
            arena.values[pos][h.0] = 100.0 * t * t;
        }
        let large_curv = arena.truncate(h, Method::Gear, 1, &[d, d, d, d], &tolerances());

        assert!(
            small_curv > large_curv,
            "higher curvature must demand smaller steps ({} vs {})",
            small_curv,
            large_curv
        );
    }

    #[test]
    fn test_truncate_clamped_to_delta_min() {
        let mut arena = StateArena::new(4);
        let h = arena.create(true);
        let d = 1e-6;
        // Violent curvature.
        arena.values[0][h.0] = 1e6;
        arena.values[1][h.0] = -1e6;
        arena.values[2][h.0] = 1e6;

        let tol = tolerances();
        let dmax = arena.truncate(h, Method::Gear, 1, &[d, d, d], &tol);
        assert!(dmax >= tol.delta_min);
    }

    #[test]
    fn test_shift_and_seed() {
        let mut arena = StateArena::new(3);
        let h = arena.create(true);
        arena.set_value(h, 5.0);
        arena.seed_history();
        assert_eq!(arena.value(h, 2), 5.0);

        arena.set_value(h, 7.0);
        arena.shift();
        // Accepted value moved to position 1; current reseeded from it.
        assert_eq!(arena.value(h, 1), 7.0);
        assert_eq!(arena.value(h, 0), 7.0);
        assert_eq!(arena.value(h, 2), 5.0);
    }

    #[test]
    fn test_tracked_handles() {
        let mut arena = StateArena::new(3);
        let a = arena.create(true);
        let _b = arena.create(false);
        let c = arena.create(true);
        assert_eq!(arena.tracked_handles(), vec![a, c]);
    }
}
