//! Building blocks shared by the Krylov solvers.
//!
//! - [`scalar`]: real and complex fields the solvers are generic over
//! - [`layout`]: column-major multi-vector strips
//! - [`dense`]: level-1/2 kernels and small dense factorizations
//! - [`comm`]: collective reductions over a process group
//! - [`operator`]: operator collaborators and process roles
//! - [`config`]: solver options and the per-prefix registry
//! - [`local`]: single-process operators and preconditioners

pub mod comm;
pub mod config;
pub mod dense;
pub mod error;
pub mod layout;
pub mod local;
pub mod operator;
pub mod scalar;

pub use comm::{Communicator, Reducible, SelfComm, ThreadGroup};
pub use config::{
    CoarseCorrection, GramSchmidt, KrylovMethod, Options, SchwarzMethod, SolverConfig, Variant,
};
pub use error::{Error, Result};
pub use local::{DenseOperator, IdentityPreconditioner, JacobiPreconditioner, Preconditioner};
pub use operator::{Operator, ProjectedOperator, Role, Scaling};
pub use scalar::{EPS, PEN, Real, Scalar};
