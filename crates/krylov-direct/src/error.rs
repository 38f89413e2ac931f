//! Error types for the direct-solver adapter.

use thiserror::Error;

/// Errors raised while building, factorizing or solving with a direct solver.
#[derive(Debug, Error)]
pub enum DirectError {
    /// `solve` was called before a successful `numfact`.
    #[error("Matrix has not been factorized")]
    NotFactorized,

    /// The factorization failed or produced non-finite values.
    #[error("Matrix is singular")]
    Singular,

    /// The compressed row arrays are inconsistent.
    #[error("Invalid sparsity pattern: {0}")]
    InvalidPattern(String),

    /// A right-hand side does not match the factorized size.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The sparse backend rejected the matrix.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result type for direct-solver operations.
pub type Result<T> = std::result::Result<T, DirectError>;

impl From<DirectError> for krylov_core::Error {
    fn from(e: DirectError) -> Self {
        match e {
            DirectError::DimensionMismatch { expected, actual } => {
                krylov_core::Error::DimensionMismatch { expected, actual }
            }
            other => krylov_core::Error::Operator(other.to_string()),
        }
    }
}
