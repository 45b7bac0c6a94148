//! Newton-Raphson iteration controller.
//!
//! Runs the state machine over a single time point:
//! PREDICT → STAMP → SOLVE → TEST → (CONVERGED | ITERATE | DIVERGED).
//! Divergence is a tagged outcome, not an error: the integration engine
//! decides the retry policy.

use std::sync::atomic::{AtomicBool, Ordering};

use nalgebra::DVector;
use voltra_core::matrix::MnaMatrix;

use crate::config::Options;
use crate::device::{Device, LoadContext, Mode};
use crate::error::Result;
use crate::integrator::Integrator;

/// Outcome of one time-point solve.
#[derive(Debug, Clone, Copy)]
pub enum IterationOutcome {
    /// Converged; the solution is in `state[0]`.
    Converged { iterations: usize },
    /// Iteration limit hit without meeting the tolerance.
    NonConvergence { residual: f64 },
    /// The cooperative stop flag was raised mid-iteration.
    Stopped,
}

/// Solve the nonlinear system at the engine's current time point.
///
/// `seed` starts the iteration (the prediction in transient, zeros or the
/// previous operating point in DC). On convergence the solution is written
/// into the engine's current history slot.
pub fn solve_point(
    devices: &mut [Box<dyn Device>],
    matrix: &mut MnaMatrix,
    integrator: &mut Integrator,
    mode: Mode,
    opts: &Options,
    stop: &AtomicBool,
    seed: &DVector<f64>,
) -> Result<IterationOutcome> {
    let num_nodes = matrix.num_nodes();
    let time = integrator.time();
    let delta = integrator.delta();
    let order = integrator.order();

    let mut x = seed.clone();
    let mut residual = f64::INFINITY;

    for iteration in 0..opts.max_iter {
        if stop.load(Ordering::Relaxed) {
            return Ok(IterationOutcome::Stopped);
        }

        matrix.clear();
        {
            let (coefficients, prediction, states, breakpoints) = integrator.load_parts();
            let mut ctx = LoadContext::new(
                mode,
                time,
                delta,
                order,
                coefficients,
                &x,
                prediction,
                matrix,
                states,
                breakpoints,
                opts.gmin,
                num_nodes,
            );
            for device in devices.iter_mut() {
                device.load(&mut ctx)?;
            }
        }

        matrix.factor()?;
        let x_new = matrix.solve()?;

        let (converged, resid) = check_convergence(&x, &x_new, num_nodes, opts);
        residual = resid;
        x = x_new;

        if converged && iteration > 0 {
            integrator.history_mut().current_mut().solution.copy_from(&x);
            return Ok(IterationOutcome::Converged {
                iterations: iteration + 1,
            });
        }
    }

    Ok(IterationOutcome::NonConvergence { residual })
}

/// Per-unknown convergence test: `|Δx| ≤ reltol·max(|new|, |old|) + abstol`,
/// with the voltage tolerance on node rows and the current tolerance on
/// branch rows. Returns the verdict and the worst tolerance excess.
fn check_convergence(
    old: &DVector<f64>,
    new: &DVector<f64>,
    num_nodes: usize,
    opts: &Options,
) -> (bool, f64) {
    let mut converged = true;
    let mut worst = 0.0_f64;

    for i in 0..old.len() {
        let abstol = if i < num_nodes {
            opts.vntol
        } else {
            opts.abstol
        };
        let delta = (new[i] - old[i]).abs();
        let tol = opts.reltol * new[i].abs().max(old[i].abs()) + abstol;
        if delta > tol {
            converged = false;
        }
        worst = worst.max(delta);
    }

    (converged, worst)
}
