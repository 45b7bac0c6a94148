//! Core node and MNA matrix structures for Voltra.
//!
//! This crate provides the fundamental data structures shared by the solver
//! and device crates: node identifiers and the Modified Nodal Analysis (MNA)
//! matrix with its factor/solve contract.
//!
//! # Modified Nodal Analysis (MNA)
//!
//! MNA is a systematic method for formulating circuit equations. The system
//! `Ax = b` contains:
//!
//! - Node voltages (V₁, V₂, ..., Vₙ) — ground is eliminated
//! - Branch currents through voltage sources and inductors
//!
//! Devices reserve their matrix positions once during setup and stamp
//! through stable [`EntryId`] handles on every load, so the per-iteration
//! hot path does no position lookups.
//!
//! # Example
//!
//! ```rust
//! use voltra_core::matrix::MnaMatrix;
//!
//! // Voltage divider: V1=10V at node 0, R1=1k from 0 to 1, R2=1k to ground.
//! let mut mna = MnaMatrix::new(2, 1);
//! mna.stamp_voltage_source(Some(0), None, 0, 10.0);
//! mna.stamp_conductance(Some(0), Some(1), 1.0 / 1000.0);
//! mna.stamp_conductance(Some(1), None, 1.0 / 1000.0);
//!
//! mna.factor().expect("nonsingular");
//! let x = mna.solve().expect("solve");
//! assert!((x[1] - 5.0).abs() < 1e-9);
//! ```

pub mod error;
pub mod matrix;
pub mod node;

pub use error::{Error, Result};
pub use matrix::{EntryId, MnaMatrix};
pub use node::NodeId;
