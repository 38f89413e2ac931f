//! Error types for Krylov solver building blocks.

use thiserror::Error;

/// Errors raised by kernels, collectives and operators.
#[derive(Debug, Error)]
pub enum Error {
    /// A collective reduction could not complete.
    #[error("Communication failure: {0}")]
    Communication(String),

    /// A buffer does not have the length the caller requires.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A block factorization lost positive definiteness or full rank.
    ///
    /// Solver drivers recover from this by switching to an unblocked method.
    #[error("Numerical breakdown in {stage}")]
    Breakdown { stage: &'static str },

    /// The operator collaborator failed.
    #[error("Operator error: {0}")]
    Operator(String),
}

impl Error {
    /// Whether this error is a recoverable numerical breakdown.
    pub fn is_breakdown(&self) -> bool {
        matches!(self, Error::Breakdown { .. })
    }
}

/// Check that `actual` equals `expected`.
pub fn check_len(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::DimensionMismatch { expected, actual })
    }
}

/// Result type for Krylov building blocks.
pub type Result<T> = std::result::Result<T, Error>;
