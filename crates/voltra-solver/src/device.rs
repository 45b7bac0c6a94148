//! The device capability interface.
//!
//! Devices are the engine's collaborators: each one reserves its matrix
//! positions and dynamic states during setup, then stamps the linearized
//! MNA system on every Newton iteration through [`Device::load`]. The
//! simulation builder threads the device list in explicitly; there is no
//! process-wide registry.

use nalgebra::DVector;
use voltra_core::NodeId;
use voltra_core::matrix::{EntryId, MnaMatrix};

use crate::ac::ComplexMna;
use crate::breakpoints::Breakpoints;
use crate::coeffs::Coefficients;
use crate::error::Result;
use crate::integrator::Integrator;
use crate::state::{IntegrationResult, StateArena, StateHandle};

/// Which analysis the load call serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// DC operating point: capacitors open, inductors short.
    Dc,
    /// Transient time point: dynamic states integrate through the engine.
    Transient,
}

/// Context handed to devices during setup.
pub struct SetupContext<'a> {
    pub matrix: &'a mut MnaMatrix,
    pub integrator: &'a mut Integrator,
    /// Number of node rows; branch rows follow.
    pub num_nodes: usize,
}

impl SetupContext<'_> {
    /// Reserve a matrix position (`None` = ground).
    pub fn entry(&mut self, row: Option<usize>, col: Option<usize>) -> EntryId {
        self.matrix.entry(row, col)
    }

    /// Check that a terminal refers to an allocated node.
    pub fn require_node(&self, device: &str, node: NodeId) -> Result<()> {
        match node.matrix_index() {
            Some(idx) if idx >= self.num_nodes => Err(voltra_core::Error::NodeMismatch {
                device: device.to_string(),
                node: node.as_u32(),
            }
            .into()),
            _ => Ok(()),
        }
    }

    /// Matrix row of a branch current variable.
    pub fn branch_row(&self, branch: usize) -> usize {
        self.num_nodes + branch
    }

    /// Create a dynamic state slot; tracked slots join the LTE poll set.
    pub fn create_derivative(&mut self, track: bool) -> StateHandle {
        self.integrator.create_derivative(track)
    }
}

/// Context handed to devices on every Newton iteration.
///
/// The engine guarantees that `time`, `delta`, `order` and the prediction
/// are identical across all devices within a single iteration.
pub struct LoadContext<'a> {
    pub mode: Mode,
    /// Time of the point being computed.
    pub time: f64,
    /// Step size of the point being computed.
    pub delta: f64,
    /// Integration order in effect.
    pub order: usize,
    /// Integration coefficients for the current (order, delta) pair.
    pub coefficients: &'a Coefficients,
    /// Current Newton iterate (the first iteration sees the prediction).
    pub solution: &'a DVector<f64>,
    /// Polynomial prediction seeding this time point.
    pub prediction: &'a DVector<f64>,
    pub matrix: &'a mut MnaMatrix,
    pub states: &'a mut StateArena,
    /// Future must-hit times; devices may insert new ones at any point of
    /// the simulation.
    pub breakpoints: &'a mut Breakpoints,
    /// Minimum junction conductance from the solver options.
    pub gmin: f64,
    num_nodes: usize,
}

impl<'a> LoadContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        mode: Mode,
        time: f64,
        delta: f64,
        order: usize,
        coefficients: &'a Coefficients,
        solution: &'a DVector<f64>,
        prediction: &'a DVector<f64>,
        matrix: &'a mut MnaMatrix,
        states: &'a mut StateArena,
        breakpoints: &'a mut Breakpoints,
        gmin: f64,
        num_nodes: usize,
    ) -> Self {
        Self {
            mode,
            time,
            delta,
            order,
            coefficients,
            solution,
            prediction,
            matrix,
            states,
            breakpoints,
            gmin,
            num_nodes,
        }
    }

    /// Node voltage from the current iterate (`None` = ground = 0 V).
    pub fn voltage(&self, node: Option<usize>) -> f64 {
        node.map(|i| self.solution[i]).unwrap_or(0.0)
    }

    /// Branch current from the current iterate.
    pub fn branch_current(&self, branch: usize) -> f64 {
        self.solution[self.num_nodes + branch]
    }

    /// Store a dynamic state value at the current point and differentiate
    /// it, returning the resistive companion pair.
    pub fn integrate(&mut self, handle: StateHandle, value: f64) -> IntegrationResult {
        self.states.set_value(handle, value);
        self.states.integrate(handle, self.coefficients)
    }
}

/// A circuit element collaborating with the engine.
///
/// `setup` and `load` are the mandatory capabilities; the remaining hooks
/// default to no-ops so purely resistive devices stay small.
pub trait Device {
    fn name(&self) -> &str;

    /// Reserve matrix positions and dynamic states. Called once after the
    /// topology is frozen.
    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> Result<()>;

    /// Stamp the linearized device at the current iterate.
    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()>;

    /// Register the times at which this device's sources have corners.
    fn register_breakpoints(&self, _breakpoints: &mut Breakpoints, _tstop: f64) {}

    /// Override node voltages at transient entry (device initial
    /// conditions).
    fn apply_initial_conditions(&self, _solution: &mut DVector<f64>) {}

    /// Seed dynamic state values from the transient entry solution.
    fn init_state(&mut self, _states: &mut StateArena, _solution: &DVector<f64>) {}

    /// Stamp the small-signal contribution at angular frequency `omega`.
    /// Nonlinear devices use the linearization latched by their last DC
    /// load.
    fn ac_load(&self, _mna: &mut ComplexMna, _omega: f64) {}

    /// Release per-run resources. Handles become invalid after this.
    fn unsetup(&mut self) {}
}
