//! Sparse direct solvers for Krylov preconditioners and coarse problems.
//!
//! This crate provides:
//! - [`MatrixCsr`]: CSR storage, general or symmetric (lower triangle)
//! - [`DirectSolver`]: factorize once, solve many times
//! - [`FaerDirect`]: sparse LU from faer for `f64` and `Complex64`
//! - [`DirectOperator`]: a CSR operator preconditioned by a direct solve

pub mod csr;
pub mod error;
pub mod operator;
pub mod solver;

pub use csr::MatrixCsr;
pub use error::{DirectError, Result};
pub use operator::DirectOperator;
pub use solver::{DirectSolver, Distribution, FaerDirect, FaerScalar};
