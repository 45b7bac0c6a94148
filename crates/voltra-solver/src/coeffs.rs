//! Integration and prediction coefficients for variable-step multistep
//! methods.
//!
//! For Gear/BDF at order k the differentiation coefficients `ag[0..=k]`
//! satisfy `ẏ(t₀) ≈ Σ ag[i]·y(tᵢ)` for every polynomial of degree ≤ k,
//! where t₁, t₂, ... walk back through the accepted history. They depend
//! only on the ratios of the trailing step sizes and are found by solving
//! the (k+1)×(k+1) power-basis system in normalized time.
//!
//! Trapezoidal order 2 keeps the two-point form with the previous
//! derivative folded in: `ẏ₀ = (2/δ)(y₀ - y₁) - ẏ₁`.

use nalgebra::{DMatrix, DVector};

use crate::config::Method;
use crate::error::{Error, Result};

/// Coefficients for one (order, step-history) combination.
///
/// Recomputed whenever the order or the trailing delta sequence changes.
#[derive(Debug, Clone)]
pub struct Coefficients {
    method: Method,
    order: usize,
    /// Differentiation coefficients over `state[0..=order]`.
    ag: Vec<f64>,
    /// Extrapolation coefficients over `state[1..]` predicting the value
    /// at `state[0].time`.
    predictor: Vec<f64>,
}

impl Coefficients {
    /// Compute coefficients for the given order and delta history.
    ///
    /// `deltas[0]` is the candidate step being probed; `deltas[i]` for
    /// `i >= 1` are the previously accepted steps, newest first.
    /// `pred_order` is the polynomial degree of the predictor, limited by
    /// how much real history exists (0 repeats the last accepted point).
    pub fn compute(
        method: Method,
        order: usize,
        pred_order: usize,
        deltas: &[f64],
    ) -> Result<Self> {
        let ag = match method {
            Method::Trapezoidal if order == 2 => {
                vec![2.0 / deltas[0], -2.0 / deltas[0]]
            }
            _ => gear_coefficients(order, deltas)?,
        };
        let predictor = predictor_coefficients(pred_order, deltas)?;
        Ok(Self {
            method,
            order,
            ag,
            predictor,
        })
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Differentiation coefficients, `ag[0]` applying to the point being
    /// computed.
    pub fn ag(&self) -> &[f64] {
        &self.ag
    }

    /// The diagonal factor `∂ẏ₀/∂y₀ = ag[0]`, used by devices to build
    /// their resistive companion.
    pub fn geq_factor(&self) -> f64 {
        self.ag[0]
    }

    /// Predictor coefficients over `state[1..]`.
    pub fn predictor(&self) -> &[f64] {
        &self.predictor
    }
}

/// Offsets of history points from the current time, in units of the
/// current step: `x[0] = 0`, `x[i] = x[i-1] - deltas[i-1]/deltas[0]`.
fn normalized_offsets(count: usize, deltas: &[f64]) -> Result<Vec<f64>> {
    if deltas.len() < count.saturating_sub(1) {
        return Err(Error::Misconfigured(format!(
            "coefficient computation needs {} deltas, have {}",
            count - 1,
            deltas.len()
        )));
    }
    let mut x = vec![0.0; count];
    for i in 1..count {
        x[i] = x[i - 1] - deltas[i - 1] / deltas[0];
    }
    Ok(x)
}

/// Solve the power-basis system `Σ aᵢ·xᵢ^m = [m == 1]` for m = 0..=order,
/// then rescale by the current step.
fn gear_coefficients(order: usize, deltas: &[f64]) -> Result<Vec<f64>> {
    let n = order + 1;
    let x = normalized_offsets(n, deltas)?;

    let mut a = DMatrix::zeros(n, n);
    let mut b = DVector::zeros(n);
    b[1] = 1.0;
    for m in 0..n {
        for (i, &xi) in x.iter().enumerate() {
            a[(m, i)] = xi.powi(m as i32);
        }
    }

    let sol = a
        .lu()
        .solve(&b)
        .ok_or_else(|| Error::Misconfigured("degenerate step history".into()))?;
    Ok(sol.iter().map(|c| c / deltas[0]).collect())
}

/// Solve for extrapolation weights over `state[1..=pred_order+1]` that
/// reproduce the value at `state[0].time` for polynomials of degree
/// ≤ pred_order: `Σ cⱼ·xⱼ^m = [m == 0]`.
fn predictor_coefficients(pred_order: usize, deltas: &[f64]) -> Result<Vec<f64>> {
    if pred_order == 0 {
        return Ok(vec![1.0]);
    }
    let n = pred_order + 1;
    let x = normalized_offsets(n + 1, deltas)?;

    let mut a = DMatrix::zeros(n, n);
    let mut b = DVector::zeros(n);
    b[0] = 1.0;
    for m in 0..n {
        for j in 0..n {
            a[(m, j)] = x[j + 1].powi(m as i32);
        }
    }

    let sol = a
        .lu()
        .solve(&b)
        .ok_or_else(|| Error::Misconfigured("degenerate step history".into()))?;
    Ok(sol.iter().copied().collect())
}
