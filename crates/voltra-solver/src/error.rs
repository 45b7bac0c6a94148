//! Error types for voltra-solver.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Core matrix errors, including `Singular { row }` from a zero pivot.
    #[error(transparent)]
    Core(#[from] voltra_core::Error),

    #[error("no convergence at t = {time:.6e} s (last residual {residual:.3e})")]
    NonConvergence { time: f64, residual: f64 },

    #[error("timestep {delta:.3e} s below minimum at t = {time:.6e} s")]
    TimestepTooSmall { time: f64, delta: f64 },

    #[error("misconfigured: {0}")]
    Misconfigured(String),

    #[error("stopped before any point was accepted")]
    Interrupted,
}

pub type Result<T> = std::result::Result<T, Error>;
