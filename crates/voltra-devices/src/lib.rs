//! Device models for Voltra.
//!
//! Every device implements the solver's [`Device`](voltra_solver::Device)
//! capability interface: it reserves its matrix positions and dynamic
//! states during setup, then stamps the linearized MNA system on every
//! Newton iteration. Reactive elements hand their state (capacitor charge,
//! inductor current) to the engine's history ring and let the integration
//! coefficients produce the resistive companion.
//!
//! # Example
//!
//! ```rust
//! use voltra_core::NodeId;
//! use voltra_devices::{Capacitor, Resistor, VoltageSource, Waveform};
//! use voltra_solver::{Simulation, TimeConfig};
//!
//! // V1 -- R 1k -- n2 -- C 1uF -- GND
//! let mut b = Simulation::builder();
//! let n1 = b.node();
//! let n2 = b.node();
//! let br = b.branch();
//! b.add_device(VoltageSource::new("V1", n1, NodeId::GROUND, Waveform::dc(5.0), br));
//! b.add_device(Resistor::new("R1", n1, n2, 1000.0));
//! b.add_device(Capacitor::new("C1", n2, NodeId::GROUND, 1e-6));
//! b.time(TimeConfig::new(5e-3));
//!
//! let mut sim = b.build().expect("valid netlist");
//! let result = sim.run_transient().expect("transient");
//! assert!(result.points.len() > 2);
//! ```

mod stamp;

pub mod diode;
pub mod passive;
pub mod sources;
pub mod waveforms;

pub use diode::{Diode, DiodeParams, thermal_voltage};
pub use passive::{Capacitor, Inductor, Resistor};
pub use sources::{CurrentSource, VoltageSource};
pub use waveforms::Waveform;
