//! Diode device model using the Shockley equation.

use nalgebra::DVector;
use num_complex::Complex;
use voltra_core::NodeId;
use voltra_solver::{
    ComplexMna, Device, LoadContext, Mode, Result, SetupContext, StateArena, StateHandle,
};

use crate::stamp::ConductancePattern;

/// Diode model parameters.
#[derive(Debug, Clone)]
pub struct DiodeParams {
    /// Saturation current (A). Default: 1e-14.
    pub is: f64,
    /// Emission coefficient. Default: 1.0.
    pub n: f64,
    /// Junction capacitance (F). Default: 0.0.
    pub cj0: f64,
}

impl Default for DiodeParams {
    fn default() -> Self {
        Self {
            is: 1e-14,
            n: 1.0,
            cj0: 0.0,
        }
    }
}

/// Thermal voltage at a given temperature.
pub fn thermal_voltage(temp_k: f64) -> f64 {
    const K_BOLTZMANN: f64 = 1.380649e-23;
    const Q_ELECTRON: f64 = 1.602176634e-19;
    K_BOLTZMANN * temp_k / Q_ELECTRON
}

/// A diode element.
#[derive(Debug, Clone)]
pub struct Diode {
    /// Device name (e.g., "D1").
    pub name: String,
    /// Anode node.
    pub node_pos: NodeId,
    /// Cathode node.
    pub node_neg: NodeId,
    /// Model parameters.
    pub params: DiodeParams,
    pattern: Option<ConductancePattern>,
    charge: Option<StateHandle>,
    /// Small-signal conductance latched at the last operating point.
    last_gd: f64,
}

impl Diode {
    /// Create a new diode with default parameters.
    pub fn new(name: impl Into<String>, node_pos: NodeId, node_neg: NodeId) -> Self {
        Self {
            name: name.into(),
            node_pos,
            node_neg,
            params: DiodeParams::default(),
            pattern: None,
            charge: None,
            last_gd: 0.0,
        }
    }

    /// Create a new diode with specified parameters.
    pub fn with_params(
        name: impl Into<String>,
        node_pos: NodeId,
        node_neg: NodeId,
        params: DiodeParams,
    ) -> Self {
        Self {
            name: name.into(),
            node_pos,
            node_neg,
            params,
            pattern: None,
            charge: None,
            last_gd: 0.0,
        }
    }

    /// Evaluate diode current and conductance at a given junction voltage.
    ///
    /// Returns (current, conductance) where:
    /// - current = Is * (exp(Vd / (n * Vt)) - 1)
    /// - conductance = dI/dV = Is / (n * Vt) * exp(Vd / (n * Vt))
    pub fn evaluate(&self, vd: f64) -> (f64, f64) {
        let nvt = self.params.n * thermal_voltage(300.15);
        let exp_term = (vd / nvt).exp();
        let id = self.params.is * (exp_term - 1.0);
        let gd = (self.params.is * exp_term / nvt).max(1e-12);
        (id, gd)
    }

    /// Limit the junction voltage to keep exp() from overflowing while
    /// still allowing convergence.
    fn limit_voltage(&self, vd: f64) -> f64 {
        let nvt = self.params.n * thermal_voltage(300.15);
        let vcrit = nvt * (nvt / (std::f64::consts::SQRT_2 * self.params.is)).ln();

        if vd > vcrit {
            // Log compression above the critical voltage.
            let arg = (vd - vcrit) / nvt;
            vcrit + nvt * arg.ln_1p()
        } else {
            vd
        }
    }
}

impl Device for Diode {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        ctx.require_node(&self.name, self.node_pos)?;
        ctx.require_node(&self.name, self.node_neg)?;
        let i = self.node_pos.matrix_index();
        let j = self.node_neg.matrix_index();
        self.pattern = Some(ConductancePattern::reserve(ctx, i, j));
        if self.params.cj0 > 0.0 {
            self.charge = Some(ctx.create_derivative(true));
        }
        Ok(())
    }

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        let pattern = self.pattern.expect("diode setup ran");
        let i = self.node_pos.matrix_index();
        let j = self.node_neg.matrix_index();

        let vd = self.limit_voltage(ctx.voltage(i) - ctx.voltage(j));
        let (id, gd) = self.evaluate(vd);
        let ieq = id - gd * vd;
        self.last_gd = gd;

        pattern.stamp(ctx.matrix, gd + ctx.gmin);
        ctx.matrix.stamp_current_source(i, j, ieq);

        // Junction capacitance companion.
        if ctx.mode == Mode::Transient {
            if let Some(charge) = self.charge {
                let r = ctx.integrate(charge, self.params.cj0 * vd);
                pattern.stamp(ctx.matrix, r.geq * self.params.cj0);
                ctx.matrix.stamp_current_source(i, j, r.ieq);
            }
        }
        Ok(())
    }

    fn init_state(&mut self, states: &mut StateArena, solution: &DVector<f64>) {
        if let Some(charge) = self.charge {
            let vp = self
                .node_pos
                .matrix_index()
                .map(|i| solution[i])
                .unwrap_or(0.0);
            let vn = self
                .node_neg
                .matrix_index()
                .map(|i| solution[i])
                .unwrap_or(0.0);
            states.set_value(charge, self.params.cj0 * (vp - vn));
        }
    }

    fn ac_load(&self, mna: &mut ComplexMna, omega: f64) {
        let i = self.node_pos.matrix_index();
        let j = self.node_neg.matrix_index();
        mna.stamp_conductance(i, j, self.last_gd);
        if self.params.cj0 > 0.0 {
            mna.stamp_admittance(i, j, Complex::new(0.0, omega * self.params.cj0));
        }
    }

    fn unsetup(&mut self) {
        self.pattern = None;
        self.charge = None;
    }
}
