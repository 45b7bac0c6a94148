//! Passive device models: Resistor, Capacitor, Inductor.

use nalgebra::DVector;
use num_complex::Complex;
use voltra_core::NodeId;
use voltra_core::matrix::EntryId;
use voltra_solver::{
    ComplexMna, Device, LoadContext, Mode, Result, SetupContext, StateArena, StateHandle,
};

use crate::stamp::{BranchPattern, ConductancePattern};

/// A resistor element.
#[derive(Debug, Clone)]
pub struct Resistor {
    /// Device name (e.g., "R1").
    pub name: String,
    /// Positive terminal node.
    pub node_pos: NodeId,
    /// Negative terminal node.
    pub node_neg: NodeId,
    /// Resistance value in ohms.
    pub resistance: f64,
    pattern: Option<ConductancePattern>,
}

impl Resistor {
    /// Create a new resistor.
    pub fn new(
        name: impl Into<String>,
        node_pos: NodeId,
        node_neg: NodeId,
        resistance: f64,
    ) -> Self {
        Self {
            name: name.into(),
            node_pos,
            node_neg,
            resistance,
            pattern: None,
        }
    }

    /// Get the conductance (1/R).
    pub fn conductance(&self) -> f64 {
        1.0 / self.resistance
    }
}

impl Device for Resistor {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        ctx.require_node(&self.name, self.node_pos)?;
        ctx.require_node(&self.name, self.node_neg)?;
        let i = self.node_pos.matrix_index();
        let j = self.node_neg.matrix_index();
        self.pattern = Some(ConductancePattern::reserve(ctx, i, j));
        Ok(())
    }

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        if let Some(pattern) = &self.pattern {
            pattern.stamp(ctx.matrix, self.conductance());
        }
        Ok(())
    }

    fn ac_load(&self, mna: &mut ComplexMna, _omega: f64) {
        mna.stamp_conductance(
            self.node_pos.matrix_index(),
            self.node_neg.matrix_index(),
            self.conductance(),
        );
    }

    fn unsetup(&mut self) {
        self.pattern = None;
    }
}

/// A capacitor element.
///
/// In transient analysis the charge `q = C·v` is a tracked dynamic state:
/// the engine differentiates it through the history ring and the device
/// stamps the resulting resistive companion.
#[derive(Debug, Clone)]
pub struct Capacitor {
    /// Device name (e.g., "C1").
    pub name: String,
    /// Positive terminal node.
    pub node_pos: NodeId,
    /// Negative terminal node.
    pub node_neg: NodeId,
    /// Capacitance in farads.
    pub capacitance: f64,
    /// Initial voltage across the device, applied at transient entry.
    pub ic: Option<f64>,
    charge: Option<StateHandle>,
    pattern: Option<ConductancePattern>,
}

impl Capacitor {
    /// Create a new capacitor.
    pub fn new(
        name: impl Into<String>,
        node_pos: NodeId,
        node_neg: NodeId,
        capacitance: f64,
    ) -> Self {
        Self {
            name: name.into(),
            node_pos,
            node_neg,
            capacitance,
            ic: None,
            charge: None,
            pattern: None,
        }
    }

    /// Set the initial voltage across the capacitor.
    pub fn with_ic(mut self, ic: f64) -> Self {
        self.ic = Some(ic);
        self
    }

    fn voltage(&self, solution: &DVector<f64>) -> f64 {
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
        vp - vn
    }
}

impl Device for Capacitor {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        ctx.require_node(&self.name, self.node_pos)?;
        ctx.require_node(&self.name, self.node_neg)?;
        let i = self.node_pos.matrix_index();
        let j = self.node_neg.matrix_index();
        self.pattern = Some(ConductancePattern::reserve(ctx, i, j));
        self.charge = Some(ctx.create_derivative(true));
        Ok(())
    }

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        let pattern = self.pattern.expect("capacitor setup ran");
        let i = self.node_pos.matrix_index();
        let j = self.node_neg.matrix_index();

        match ctx.mode {
            Mode::Dc => {
                // Open in DC apart from a gmin leak.
                pattern.stamp(ctx.matrix, ctx.gmin);
            }
            Mode::Transient => {
                let charge = self.charge.expect("capacitor setup ran");
                let v = ctx.voltage(i) - ctx.voltage(j);
                let r = ctx.integrate(charge, self.capacitance * v);

                // i = dq/dt linearized in v: geq = ag0·C, ieq in charge
                // units already matches the current residue.
                let geq = r.geq * self.capacitance;
                pattern.stamp(ctx.matrix, geq);
                ctx.matrix.stamp_current_source(i, j, r.ieq);
            }
        }
        Ok(())
    }

    fn apply_initial_conditions(&self, solution: &mut DVector<f64>) {
        if let (Some(ic), Some(idx)) = (self.ic, self.node_pos.matrix_index()) {
            let vn = self
                .node_neg
                .matrix_index()
                .map(|i| solution[i])
                .unwrap_or(0.0);
            solution[idx] = vn + ic;
        }
    }

    fn init_state(&mut self, states: &mut StateArena, solution: &DVector<f64>) {
        if let Some(charge) = self.charge {
            states.set_value(charge, self.capacitance * self.voltage(solution));
        }
    }

    fn ac_load(&self, mna: &mut ComplexMna, omega: f64) {
        mna.stamp_admittance(
            self.node_pos.matrix_index(),
            self.node_neg.matrix_index(),
            Complex::new(0.0, omega * self.capacitance),
        );
    }

    fn unsetup(&mut self) {
        self.pattern = None;
        self.charge = None;
    }
}

/// An inductor element with a branch current variable.
///
/// The branch current is the tracked dynamic state; the branch row carries
/// `v_pos - v_neg - L·(di/dt) = 0` with the derivative supplied by the
/// engine's integration coefficients. In DC the row degenerates to a short.
#[derive(Debug, Clone)]
pub struct Inductor {
    /// Device name (e.g., "L1").
    pub name: String,
    /// Positive terminal node.
    pub node_pos: NodeId,
    /// Negative terminal node.
    pub node_neg: NodeId,
    /// Inductance in henries.
    pub inductance: f64,
    /// Branch current variable index.
    pub branch: usize,
    /// Initial current through the device, applied at transient entry.
    pub ic: Option<f64>,
    current: Option<StateHandle>,
    coupling: Option<BranchPattern>,
    diag: Option<EntryId>,
    row: Option<usize>,
}

impl Inductor {
    /// Create a new inductor on the given branch current variable.
    pub fn new(
        name: impl Into<String>,
        node_pos: NodeId,
        node_neg: NodeId,
        inductance: f64,
        branch: usize,
    ) -> Self {
        Self {
            name: name.into(),
            node_pos,
            node_neg,
            inductance,
            branch,
            ic: None,
            current: None,
            coupling: None,
            diag: None,
            row: None,
        }
    }

    /// Set the initial current through the inductor.
    pub fn with_ic(mut self, ic: f64) -> Self {
        self.ic = Some(ic);
        self
    }
}

impl Device for Inductor {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        ctx.require_node(&self.name, self.node_pos)?;
        ctx.require_node(&self.name, self.node_neg)?;
        let i = self.node_pos.matrix_index();
        let j = self.node_neg.matrix_index();
        let row = ctx.branch_row(self.branch);
        self.coupling = Some(BranchPattern::reserve(ctx, i, j, row));
        self.diag = Some(ctx.entry(Some(row), Some(row)));
        self.row = Some(row);
        self.current = Some(ctx.create_derivative(true));
        Ok(())
    }

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        let coupling = self.coupling.expect("inductor setup ran");
        let row = self.row.expect("inductor setup ran");
        coupling.stamp(ctx.matrix);

        if ctx.mode == Mode::Transient {
            let state = self.current.expect("inductor setup ran");
            let i_branch = ctx.branch_current(self.branch);
            let r = ctx.integrate(state, i_branch);

            // Branch row: v_pos - v_neg - L·geq·i = L·ieq
            let diag = self.diag.expect("inductor setup ran");
            ctx.matrix.add(diag, -self.inductance * r.geq);
            ctx.matrix.rhs_add(Some(row), self.inductance * r.ieq);
        }
        // DC: the bare coupling rows force v_pos - v_neg = 0 (a short).
        Ok(())
    }

    fn apply_initial_conditions(&self, solution: &mut DVector<f64>) {
        if let (Some(ic), Some(row)) = (self.ic, self.row) {
            solution[row] = ic;
        }
    }

    fn init_state(&mut self, states: &mut StateArena, solution: &DVector<f64>) {
        if let (Some(state), Some(row)) = (self.current, self.row) {
            states.set_value(state, solution[row]);
        }
    }

    fn ac_load(&self, mna: &mut ComplexMna, omega: f64) {
        mna.stamp_inductor(
            self.node_pos.matrix_index(),
            self.node_neg.matrix_index(),
            self.branch,
            omega,
            self.inductance,
        );
    }

    fn unsetup(&mut self) {
        self.coupling = None;
        self.diag = None;
        self.row = None;
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voltra_solver::{Simulation, TimeConfig};

    #[test]
    fn test_resistor_divider_op() {
        let mut b = Simulation::builder();
        let n1 = b.node();
        let n2 = b.node();
        let br = b.branch();

        b.add_device(crate::sources::VoltageSource::new(
            "V1",
            n1,
            NodeId::GROUND,
            crate::waveforms::Waveform::dc(10.0),
            br,
        ));
        b.add_device(Resistor::new("R1", n1, n2, 1000.0));
        b.add_device(Resistor::new("R2", n2, NodeId::GROUND, 1000.0));

        let mut sim = b.build().unwrap();
        let op = sim.run_op().unwrap();
        assert!((op.voltage(n1) - 10.0).abs() < 1e-6);
        assert!((op.voltage(n2) - 5.0).abs() < 1e-6);
        // KCL: the source sinks 5 mA.
        assert!((op.current(br) + 0.005).abs() < 1e-6);
    }

    #[test]
    fn test_inductor_is_dc_short() {
        let mut b = Simulation::builder();
        let n1 = b.node();
        let n2 = b.node();
        let bv = b.branch();
        let bl = b.branch();

        b.add_device(crate::sources::VoltageSource::new(
            "V1",
            n1,
            NodeId::GROUND,
            crate::waveforms::Waveform::dc(1.0),
            bv,
        ));
        b.add_device(Resistor::new("R1", n1, n2, 100.0));
        b.add_device(Inductor::new("L1", n2, NodeId::GROUND, 1e-3, bl));

        let mut sim = b.build().unwrap();
        let op = sim.run_op().unwrap();
        // The inductor shorts node 2 to ground; 10 mA flows.
        assert!(op.voltage(n2).abs() < 1e-9);
        assert!((op.current(bl) - 0.01).abs() < 1e-6);
    }

    #[test]
    fn test_capacitor_open_in_dc() {
        let mut b = Simulation::builder();
        let n1 = b.node();
        let n2 = b.node();
        let br = b.branch();

        b.add_device(crate::sources::VoltageSource::new(
            "V1",
            n1,
            NodeId::GROUND,
            crate::waveforms::Waveform::dc(5.0),
            br,
        ));
        b.add_device(Resistor::new("R1", n1, n2, 1000.0));
        b.add_device(Capacitor::new("C1", n2, NodeId::GROUND, 1e-6));

        let mut sim = b.build().unwrap();
        let op = sim.run_op().unwrap();
        // No DC path through the cap: node 2 floats up to the source.
        assert!((op.voltage(n2) - 5.0).abs() < 1e-3);
    }

    #[test]
    fn test_rc_charging_transient() {
        // V1=5V, R=1k, C=1uF: tau = 1 ms.
        let mut b = Simulation::builder();
        let n1 = b.node();
        let n2 = b.node();
        let br = b.branch();

        b.add_device(crate::sources::VoltageSource::new(
            "V1",
            n1,
            NodeId::GROUND,
            crate::waveforms::Waveform::pwl(vec![(0.0, 0.0), (1e-6, 5.0)]),
            br,
        ));
        b.add_device(Resistor::new("R1", n1, n2, 1000.0));
        b.add_device(Capacitor::new("C1", n2, NodeId::GROUND, 1e-6));
        b.time(TimeConfig::new(5e-3).with_tmax(2e-5));

        let mut sim = b.build().unwrap();
        let result = sim.run_transient().unwrap();

        let v_end = result.points.last().unwrap().solution[n2.matrix_index().unwrap()];
        assert!(
            (v_end - 5.0).abs() < 0.05,
            "V(cap) at 5 tau = {} (expected ~5.0)",
            v_end
        );
    }
}
