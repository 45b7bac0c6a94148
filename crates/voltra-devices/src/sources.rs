//! Independent source models: Voltage and Current sources.

use num_complex::Complex;
use voltra_core::NodeId;
use voltra_solver::{Breakpoints, ComplexMna, Device, LoadContext, Mode, Result, SetupContext};

use crate::stamp::BranchPattern;
use crate::waveforms::Waveform;

/// An independent voltage source driven by a waveform.
#[derive(Debug, Clone)]
pub struct VoltageSource {
    /// Device name (e.g., "V1").
    pub name: String,
    /// Positive terminal node.
    pub node_pos: NodeId,
    /// Negative terminal node.
    pub node_neg: NodeId,
    /// Source waveform; DC analyses use its DC value.
    pub waveform: Waveform,
    /// Branch current variable index.
    pub branch: usize,
    /// Small-signal magnitude for AC analysis.
    pub ac_mag: f64,
    coupling: Option<BranchPattern>,
    row: Option<usize>,
}

impl VoltageSource {
    /// Create a new voltage source on the given branch current variable.
    pub fn new(
        name: impl Into<String>,
        node_pos: NodeId,
        node_neg: NodeId,
        waveform: Waveform,
        branch: usize,
    ) -> Self {
        Self {
            name: name.into(),
            node_pos,
            node_neg,
            waveform,
            branch,
            ac_mag: 0.0,
            coupling: None,
            row: None,
        }
    }

    /// Set the AC stimulus magnitude.
    pub fn with_ac_mag(mut self, ac_mag: f64) -> Self {
        self.ac_mag = ac_mag;
        self
    }
}

impl Device for VoltageSource {
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
        self.row = Some(row);
        Ok(())
    }

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        let coupling = self.coupling.expect("source setup ran");
        let row = self.row.expect("source setup ran");
        coupling.stamp(ctx.matrix);

        let value = match ctx.mode {
            Mode::Dc => self.waveform.dc_value(),
            Mode::Transient => self.waveform.value_at(ctx.time),
        };
        ctx.matrix.rhs_add(Some(row), value);
        Ok(())
    }

    fn register_breakpoints(&self, breakpoints: &mut Breakpoints, tstop: f64) {
        self.waveform.register_breakpoints(breakpoints, tstop);
    }

    fn ac_load(&self, mna: &mut ComplexMna, _omega: f64) {
        mna.stamp_voltage_source(
            self.node_pos.matrix_index(),
            self.node_neg.matrix_index(),
            self.branch,
            Complex::new(self.ac_mag, 0.0),
        );
    }

    fn unsetup(&mut self) {
        self.coupling = None;
        self.row = None;
    }
}

/// An independent current source driven by a waveform.
///
/// Positive current flows from `node_pos` through the source to
/// `node_neg` externally, i.e. it is pushed into `node_neg`.
#[derive(Debug, Clone)]
pub struct CurrentSource {
    /// Device name (e.g., "I1").
    pub name: String,
    /// Positive terminal node.
    pub node_pos: NodeId,
    /// Negative terminal node.
    pub node_neg: NodeId,
    /// Source waveform; DC analyses use its DC value.
    pub waveform: Waveform,
    /// Small-signal magnitude for AC analysis.
    pub ac_mag: f64,
}

impl CurrentSource {
    /// Create a new current source.
    pub fn new(
        name: impl Into<String>,
        node_pos: NodeId,
        node_neg: NodeId,
        waveform: Waveform,
    ) -> Self {
        Self {
            name: name.into(),
            node_pos,
            node_neg,
            waveform,
            ac_mag: 0.0,
        }
    }

    /// Set the AC stimulus magnitude.
    pub fn with_ac_mag(mut self, ac_mag: f64) -> Self {
        self.ac_mag = ac_mag;
        self
    }
}

impl Device for CurrentSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()> {
        ctx.require_node(&self.name, self.node_pos)?;
        ctx.require_node(&self.name, self.node_neg)?;
        Ok(())
    }

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
        let value = match ctx.mode {
            Mode::Dc => self.waveform.dc_value(),
            Mode::Transient => self.waveform.value_at(ctx.time),
        };
        ctx.matrix.stamp_current_source(
            self.node_pos.matrix_index(),
            self.node_neg.matrix_index(),
            value,
        );
        Ok(())
    }

    fn register_breakpoints(&self, breakpoints: &mut Breakpoints, tstop: f64) {
        self.waveform.register_breakpoints(breakpoints, tstop);
    }

    fn ac_load(&self, mna: &mut ComplexMna, _omega: f64) {
        mna.stamp_current_source(
            self.node_pos.matrix_index(),
            self.node_neg.matrix_index(),
            Complex::new(self.ac_mag, 0.0),
        );
    }
}
