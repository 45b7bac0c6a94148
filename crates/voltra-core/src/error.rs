//! Error types for voltra-core.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("singular matrix: zero pivot at row {row}")]
    Singular { row: usize },

    #[error("matrix has not been factored")]
    Unfactored,

    #[error("device {device}: node {node} is not part of the circuit")]
    NodeMismatch { device: String, node: u32 },
}

pub type Result<T> = std::result::Result<T, Error>;
