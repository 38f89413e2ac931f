//! Krylov solvers for one or many right-hand sides.
//!
//! This crate provides:
//! - GMRES and Block-GMRES with restarts, left/right/flexible preconditioning
//!   and initial deflation of dependent right-hand sides
//! - CG (optionally flexible or re-orthogonalized) and Block-CG
//! - Projected CG for operators acting on the range of a projection
//! - [`solve`], which runs the method configured for an operator's prefix
//!
//! Every driver is generic over the scalar field, the operator and the
//! communicator. Each rank calls the driver with its local slice of the
//! unknowns; all branching happens on reduced, replicated quantities.

pub mod arnoldi;
pub mod bcg;
pub mod block_arnoldi;
pub mod cg;
pub mod convergence;
pub mod dispatch;
pub mod gmres;
pub mod pcg;
pub mod update;
pub mod workspace;

pub use bcg::bcg;
pub use cg::cg;
pub use convergence::{Method, SolveReport};
pub use dispatch::solve;
pub use gmres::{bgmres, gmres};
pub use pcg::pcg;
