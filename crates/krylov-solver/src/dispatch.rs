//! Method dispatch.
//!
//! Picks the Krylov method from the options registered for the operator's
//! prefix, so one call site serves every configured solver.

use krylov_core::{Communicator, KrylovMethod, Operator, Options, Result, Scalar};

use crate::convergence::SolveReport;
use crate::{bcg, cg, gmres};

/// Solve `A X = B` for `mu` right-hand sides with the method configured
/// under `op.prefix()`.
///
/// The returned report names the method that actually ran, which differs
/// from the configured one after a reroute or a breakdown fallback.
pub fn solve<K, O, C>(
    op: &O,
    b: &[K],
    x: &mut [K],
    mu: usize,
    comm: &C,
    options: &Options,
) -> Result<SolveReport>
where
    K: Scalar,
    O: Operator<K> + ?Sized,
    C: Communicator,
{
    let config = options.get(op.prefix());
    if config.verbosity > 2 {
        log::debug!("dispatching {} on {mu} right-hand side(s)", config.method);
    }
    match config.method {
        KrylovMethod::Gmres => gmres::run(op, b, x, mu, comm, config),
        KrylovMethod::BlockGmres => gmres::block::run(op, b, x, mu, comm, config),
        KrylovMethod::Cg => cg::run(op, b, x, mu, comm, config),
        KrylovMethod::BlockCg => bcg::run(op, b, x, mu, comm, config),
    }
}
