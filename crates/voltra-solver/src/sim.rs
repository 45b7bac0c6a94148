//! Simulation driver: builder, DC operating point, transient time loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use nalgebra::DVector;
use voltra_core::matrix::MnaMatrix;
use voltra_core::NodeId;

use crate::ac::{AcParams, AcResult, ComplexMna, generate_frequencies};
use crate::config::{Method, Options, TimeConfig};
use crate::device::{Device, Mode, SetupContext};
use crate::error::{Error, Result};
use crate::integrator::Integrator;
use crate::newton::{IterationOutcome, solve_point};
use crate::observer::StepObserver;

/// Cooperative cancellation handle, shareable across threads.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Request a stop. The engine finishes the check in progress and
    /// returns everything accepted so far.
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Assembles a simulation: nodes, branches, devices, configuration.
///
/// The builder threads the device list into the engine explicitly; devices
/// are plain trait objects and there is no global registry.
#[derive(Default)]
pub struct SimulationBuilder {
    devices: Vec<Box<dyn Device>>,
    observers: Vec<Box<dyn StepObserver>>,
    num_nodes: u32,
    num_branches: usize,
    method: Option<Method>,
    max_order: Option<usize>,
    time: Option<TimeConfig>,
    options: Options,
}

impl SimulationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new circuit node.
    pub fn node(&mut self) -> NodeId {
        self.num_nodes += 1;
        NodeId::new(self.num_nodes)
    }

    /// Allocate a branch current variable (voltage sources, inductors).
    pub fn branch(&mut self) -> usize {
        let b = self.num_branches;
        self.num_branches += 1;
        b
    }

    /// Add a device to the netlist.
    pub fn add_device(&mut self, device: impl Device + 'static) -> &mut Self {
        self.devices.push(Box::new(device));
        self
    }

    /// Attach a step observer; observers fire in registration order.
    pub fn add_observer(&mut self, observer: impl StepObserver + 'static) -> &mut Self {
        self.observers.push(Box::new(observer));
        self
    }

    /// Select the integration method (default Gear).
    pub fn method(&mut self, method: Method) -> &mut Self {
        self.method = Some(method);
        self
    }

    /// Select the maximum integration order (default 2).
    pub fn max_order(&mut self, max_order: usize) -> &mut Self {
        self.max_order = Some(max_order);
        self
    }

    /// Set the transient time configuration.
    pub fn time(&mut self, time: TimeConfig) -> &mut Self {
        self.time = Some(time);
        self
    }

    /// Set the solver options.
    pub fn options(&mut self, options: Options) -> &mut Self {
        self.options = options;
        self
    }

    /// Validate the configuration and produce the simulation.
    pub fn build(self) -> Result<Simulation> {
        self.options.validate()?;
        if let Some(time) = &self.time {
            time.validate()?;
        }
        let method = self.method.unwrap_or(Method::Gear);
        let max_order = self.max_order.unwrap_or_else(|| method.default_order());
        let integrator = Integrator::new(method, max_order)?;

        Ok(Simulation {
            devices: self.devices,
            observers: self.observers,
            num_nodes: self.num_nodes as usize,
            num_branches: self.num_branches,
            options: self.options,
            time: self.time,
            matrix: MnaMatrix::new(0, 0),
            integrator,
            stop: Arc::new(AtomicBool::new(false)),
            is_setup: false,
        })
    }
}

/// DC operating point solution.
#[derive(Debug, Clone)]
pub struct OpSolution {
    /// Node voltages followed by branch currents.
    pub solution: DVector<f64>,
    /// Number of nodes (excluding ground).
    pub num_nodes: usize,
    /// Newton iterations taken.
    pub iterations: usize,
}

impl OpSolution {
    /// Voltage at a node (ground reads 0).
    pub fn voltage(&self, node: NodeId) -> f64 {
        node.matrix_index()
            .map(|i| self.solution[i])
            .unwrap_or(0.0)
    }

    /// Current through a branch variable.
    pub fn current(&self, branch: usize) -> f64 {
        self.solution[self.num_nodes + branch]
    }
}

/// One accepted transient point.
#[derive(Debug, Clone)]
pub struct TimePoint {
    /// Time value (s).
    pub time: f64,
    /// Step taken to reach this point (0 for the initial condition).
    pub delta: f64,
    /// Integration order used for this point.
    pub order: usize,
    /// Newton iterations the point took.
    pub newton_iterations: usize,
    /// Solution vector at this time.
    pub solution: DVector<f64>,
}

/// Result of a transient simulation.
#[derive(Debug, Clone)]
pub struct TranResult {
    /// All accepted timepoints, initial condition first.
    pub points: Vec<TimePoint>,
    /// Number of nodes (excluding ground).
    pub num_nodes: usize,
    /// Attempted steps (accepted + LTE-rejected).
    pub total_steps: usize,
    /// Steps rejected by truncation-error control.
    pub rejected_steps: usize,
    /// Smallest accepted step.
    pub min_step_used: f64,
    /// Largest accepted step.
    pub max_step_used: f64,
    /// True when the run ended on the cooperative stop flag.
    pub stopped: bool,
}

impl TranResult {
    /// Voltage waveform at a node as (time, voltage) pairs.
    pub fn voltage_waveform(&self, node: NodeId) -> Vec<(f64, f64)> {
        match node.matrix_index() {
            Some(idx) => self
                .points
                .iter()
                .map(|p| (p.time, p.solution[idx]))
                .collect(),
            None => self.points.iter().map(|p| (p.time, 0.0)).collect(),
        }
    }

    /// Branch current waveform as (time, current) pairs.
    pub fn current_waveform(&self, branch: usize) -> Vec<(f64, f64)> {
        let idx = self.num_nodes + branch;
        self.points
            .iter()
            .map(|p| (p.time, p.solution[idx]))
            .collect()
    }

    /// All accepted time values.
    pub fn times(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.time).collect()
    }

    /// Interpolate the solution at a specific time.
    ///
    /// Linear interpolation between the two nearest accepted points;
    /// `None` outside the simulated range.
    pub fn interpolate_at(&self, time: f64) -> Option<DVector<f64>> {
        let first = self.points.first()?;
        let last = self.points.last()?;
        if time < first.time || time > last.time {
            return None;
        }
        if time <= first.time {
            return Some(first.solution.clone());
        }

        let idx = self.points.partition_point(|p| p.time < time);
        if idx == 0 {
            return Some(first.solution.clone());
        }
        if idx >= self.points.len() {
            return Some(last.solution.clone());
        }
        let p0 = &self.points[idx - 1];
        let p1 = &self.points[idx];
        if p1.time == p0.time {
            return Some(p1.solution.clone());
        }
        let alpha = (time - p0.time) / (p1.time - p0.time);
        Some(&p0.solution * (1.0 - alpha) + &p1.solution * alpha)
    }

    /// Voltage at a node at a specific time (interpolated).
    pub fn voltage_at(&self, node: NodeId, time: f64) -> Option<f64> {
        let sol = self.interpolate_at(time)?;
        Some(node.matrix_index().map(|i| sol[i]).unwrap_or(0.0))
    }

    /// Resample the waveform on a uniform grid.
    pub fn sample_at_times(
        &self,
        tstep: f64,
        tstart: Option<f64>,
        tstop: Option<f64>,
    ) -> Vec<(f64, DVector<f64>)> {
        let tstart = tstart.unwrap_or_else(|| self.points.first().map(|p| p.time).unwrap_or(0.0));
        let tstop = tstop.unwrap_or_else(|| self.points.last().map(|p| p.time).unwrap_or(0.0));

        let mut sampled = Vec::new();
        let mut t = tstart;
        while t <= tstop + tstep * 1e-3 {
            if let Some(solution) = self.interpolate_at(t.min(tstop)) {
                sampled.push((t, solution));
            }
            t += tstep;
        }
        sampled
    }
}

/// A configured simulation owning its devices, matrix and engine.
pub struct Simulation {
    devices: Vec<Box<dyn Device>>,
    observers: Vec<Box<dyn StepObserver>>,
    num_nodes: usize,
    num_branches: usize,
    options: Options,
    time: Option<TimeConfig>,
    matrix: MnaMatrix,
    integrator: Integrator,
    stop: Arc<AtomicBool>,
    is_setup: bool,
}

impl Simulation {
    pub fn builder() -> SimulationBuilder {
        SimulationBuilder::new()
    }

    /// Handle for cooperative cancellation from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.stop.clone())
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn is_setup(&self) -> bool {
        self.is_setup
    }

    fn time_config(&self) -> TimeConfig {
        self.time.clone().unwrap_or_else(|| TimeConfig::new(1.0))
    }

    /// Allocate the matrix and history, run every device's setup, and
    /// register waveform breakpoints. Always starts from a clean slate so
    /// repeated runs are bit-identical.
    fn setup(&mut self) -> Result<()> {
        let time = self.time_config();
        time.validate()?;
        self.options.validate()?;

        self.matrix = MnaMatrix::new(self.num_nodes, self.num_branches);
        let size = self.num_nodes + self.num_branches;
        self.integrator.setup(size, &time, &self.options);

        {
            let mut ctx = SetupContext {
                matrix: &mut self.matrix,
                integrator: &mut self.integrator,
                num_nodes: self.num_nodes,
            };
            for device in self.devices.iter_mut() {
                device.setup(&mut ctx)?;
            }
        }
        for device in &self.devices {
            device.register_breakpoints(self.integrator.breakpoints_mut(), time.tstop);
        }
        self.is_setup = true;
        Ok(())
    }

    /// Release the matrix, history ring and device resources.
    pub fn unsetup(&mut self) {
        for device in self.devices.iter_mut() {
            device.unsetup();
        }
        self.integrator.unsetup();
        self.matrix = MnaMatrix::new(0, 0);
        self.is_setup = false;
    }

    /// Solve the DC operating point.
    pub fn run_op(&mut self) -> Result<OpSolution> {
        self.setup()?;
        let seed = DVector::zeros(self.num_nodes + self.num_branches);
        let outcome = solve_point(
            &mut self.devices,
            &mut self.matrix,
            &mut self.integrator,
            Mode::Dc,
            &self.options,
            &self.stop,
            &seed,
        )?;

        match outcome {
            IterationOutcome::Converged { iterations } => Ok(OpSolution {
                solution: self.integrator.history().current().solution.clone(),
                num_nodes: self.num_nodes,
                iterations,
            }),
            IterationOutcome::NonConvergence { residual } => Err(Error::NonConvergence {
                time: self.time_config().tstart,
                residual,
            }),
            IterationOutcome::Stopped => Err(Error::Interrupted),
        }
    }

    /// Run the transient analysis from `tstart` to `tstop`.
    pub fn run_transient(&mut self) -> Result<TranResult> {
        let time = self
            .time
            .clone()
            .ok_or_else(|| Error::Misconfigured("transient analysis requires a TimeConfig".into()))?;
        self.setup()?;
        let size = self.num_nodes + self.num_branches;

        // Operating point (skipped with use_ic), then device ICs on top.
        let mut initial = DVector::zeros(size);
        if !time.use_ic {
            let outcome = solve_point(
                &mut self.devices,
                &mut self.matrix,
                &mut self.integrator,
                Mode::Dc,
                &self.options,
                &self.stop,
                &initial,
            )?;
            match outcome {
                IterationOutcome::Converged { .. } => {
                    initial.copy_from(&self.integrator.history().current().solution);
                }
                IterationOutcome::NonConvergence { residual } => {
                    return Err(Error::NonConvergence {
                        time: time.tstart,
                        residual,
                    });
                }
                IterationOutcome::Stopped => return Err(Error::Interrupted),
            }
        }
        for device in &self.devices {
            device.apply_initial_conditions(&mut initial);
        }

        // Transient entry: seed the ring and the device states.
        self.integrator.initialize();
        self.integrator
            .history_mut()
            .seed(time.tstart, time.tmax, &initial);
        for device in self.devices.iter_mut() {
            device.init_state(self.integrator.arena_mut(), &initial);
        }
        self.integrator.arena_mut().seed_history();

        let mut result = TranResult {
            points: vec![TimePoint {
                time: time.tstart,
                delta: 0.0,
                order: 1,
                newton_iterations: 0,
                solution: initial.clone(),
            }],
            num_nodes: self.num_nodes,
            total_steps: 0,
            rejected_steps: 0,
            min_step_used: f64::INFINITY,
            max_step_used: 0.0,
            stopped: false,
        };

        let mut delta = time.tstep.min(time.tmax);
        let landing_eps = self.integrator.breakpoints().resolution();
        let mut singular_retried = false;

        'time_loop: while time.tstop - self.integrator.history().state(1).time > landing_eps {
            if self.stop.load(Ordering::Relaxed) {
                result.stopped = true;
                break;
            }

            // Find an acceptable step for this time point.
            let (order_used, iterations, delta_next) = loop {
                self.integrator.continue_step(&mut delta);
                self.integrator.probe(delta)?;
                let seed = self.integrator.prediction().clone();

                let outcome = match solve_point(
                    &mut self.devices,
                    &mut self.matrix,
                    &mut self.integrator,
                    Mode::Transient,
                    &self.options,
                    &self.stop,
                    &seed,
                ) {
                    Ok(outcome) => outcome,
                    Err(Error::Core(voltra_core::Error::Singular { row })) if !singular_retried => {
                        // One smaller-step retry before the pivot failure
                        // becomes fatal.
                        singular_retried = true;
                        log::warn!(
                            "singular matrix (row {}) at t = {:.6e} s; retrying with smaller step",
                            row,
                            self.integrator.time()
                        );
                        delta = self.integrator.non_convergence();
                        if delta < time.delta_min {
                            return Err(voltra_core::Error::Singular { row }.into());
                        }
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                match outcome {
                    IterationOutcome::Stopped => {
                        result.stopped = true;
                        break 'time_loop;
                    }
                    IterationOutcome::NonConvergence { residual } => {
                        log::warn!(
                            "newton failed at t = {:.6e} s (residual {:.3e}); cutting step",
                            self.integrator.time(),
                            residual
                        );
                        delta = self.integrator.non_convergence();
                        if delta < time.delta_min {
                            return Err(Error::NonConvergence {
                                time: self.integrator.time(),
                                residual,
                            });
                        }
                    }
                    IterationOutcome::Converged { iterations } => {
                        result.total_steps += 1;
                        let order_used = self.integrator.order();
                        let (ok, delta_next) = self.integrator.evaluate(&mut self.observers);
                        if ok {
                            self.integrator.accept(&mut self.observers);
                            break (order_used, iterations, delta_next);
                        }
                        result.rejected_steps += 1;
                        // A rejected step already sitting on the floor means
                        // the tolerances are unachievable.
                        if delta_next <= time.delta_min {
                            return Err(Error::TimestepTooSmall {
                                time: self.integrator.time(),
                                delta: delta_next,
                            });
                        }
                        delta = delta_next;
                    }
                }
            };

            let accepted = self.integrator.history().state(1);
            result.min_step_used = result.min_step_used.min(accepted.delta);
            result.max_step_used = result.max_step_used.max(accepted.delta);
            result.points.push(TimePoint {
                time: accepted.time,
                delta: accepted.delta,
                order: order_used,
                newton_iterations: iterations,
                solution: accepted.solution.clone(),
            });
            delta = delta_next;
            singular_retried = false;
        }

        log::debug!(
            "transient done: {} points, {} attempts, {} rejected, delta in [{:.3e}, {:.3e}]",
            result.points.len(),
            result.total_steps,
            result.rejected_steps,
            result.min_step_used,
            result.max_step_used
        );
        Ok(result)
    }

    /// Run an AC small-signal sweep around the DC operating point.
    pub fn run_ac(&mut self, params: &AcParams) -> Result<AcResult> {
        // Linearize every nonlinear device at the operating point.
        self.run_op()?;

        let frequencies = generate_frequencies(params);
        let mut solutions = Vec::with_capacity(frequencies.len());
        for &f in &frequencies {
            let omega = 2.0 * std::f64::consts::PI * f;
            let mut mna = ComplexMna::new(self.num_nodes, self.num_branches);
            for device in &self.devices {
                device.ac_load(&mut mna, omega);
            }
            solutions.push(mna.solve()?);
        }

        Ok(AcResult {
            frequencies,
            solutions,
            num_nodes: self.num_nodes,
        })
    }
}
