//! Simulation engines for Voltra.
//!
//! The heart of this crate is the transient integration engine: a
//! variable-order, variable-step implicit multistep method (Gear/BDF or
//! trapezoidal) with local-truncation-error step control and breakpoint
//! handling, wrapped around a Newton-Raphson iteration controller.
//!
//! # Analyses
//!
//! - **DC operating point** — [`Simulation::run_op`]
//! - **Transient** — [`Simulation::run_transient`], producing a
//!   [`TranResult`] of accepted time points
//! - **AC small-signal** — [`Simulation::run_ac`] around the operating
//!   point
//!
//! # How a time step happens
//!
//! Per accepted point: the driver proposes a step, the engine clamps it
//! and snaps it onto any pending breakpoint
//! ([`Integrator::continue_step`]), probes the candidate (advancing time,
//! recomputing coefficients, predicting the solution), the Newton
//! controller stamps every device and solves until converged, and the
//! engine then evaluates the local truncation error of every tracked
//! dynamic state. The step is either accepted (history ring shifts, the
//! order may rise) or rejected and retried at the LTE-permitted size.
//! Newton failures cut the step by eight and drop to order 1.
//!
//! # Example
//!
//! Devices implement the [`Device`] capability interface; the builder
//! threads them in explicitly:
//!
//! ```rust
//! use voltra_solver::{Device, LoadContext, Result, SetupContext, Simulation};
//!
//! struct Divider;
//!
//! impl Device for Divider {
//!     fn name(&self) -> &str { "divider" }
//!     fn setup(&mut self, _ctx: &mut SetupContext<'_>) -> Result<()> { Ok(()) }
//!     fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<()> {
//!         // V1 = 10 V at node 0 through branch 0; two 1 kΩ resistors.
//!         ctx.matrix.stamp_voltage_source(Some(0), None, 0, 10.0);
//!         ctx.matrix.stamp_conductance(Some(0), Some(1), 1e-3);
//!         ctx.matrix.stamp_conductance(Some(1), None, 1e-3);
//!         Ok(())
//!     }
//! }
//!
//! let mut builder = Simulation::builder();
//! let _n1 = builder.node();
//! let _n2 = builder.node();
//! let _b = builder.branch();
//! builder.add_device(Divider);
//!
//! let mut sim = builder.build().expect("valid config");
//! let op = sim.run_op().expect("operating point");
//! assert!((op.solution[1] - 5.0).abs() < 1e-6);
//! ```

pub mod ac;
pub mod breakpoints;
pub mod coeffs;
pub mod config;
pub mod device;
pub mod error;
pub mod history;
pub mod integrator;
pub mod newton;
pub mod observer;
pub mod sim;
pub mod state;

pub use ac::{AcParams, AcResult, AcSweepType, ComplexMna, generate_frequencies};
pub use breakpoints::Breakpoints;
pub use coeffs::Coefficients;
pub use config::{Method, Options, TimeConfig};
pub use device::{Device, LoadContext, Mode, SetupContext};
pub use error::{Error, Result};
pub use history::{History, IntegrationState};
pub use integrator::Integrator;
pub use newton::{IterationOutcome, solve_point};
pub use observer::{StepObserver, StepView};
pub use sim::{OpSolution, Simulation, SimulationBuilder, StopHandle, TimePoint, TranResult};
pub use state::{IntegrationResult, StateArena, StateHandle};
