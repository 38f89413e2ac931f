//! Preconditioned conjugate gradient on `mu` columns.
//!
//! Local inner products are weighted by the operator's scaling vector `D`
//! (a partition of unity), so that summing them over all ranks yields the
//! global inner product. Each iteration issues two reductions of `2 mu`
//! reals, plus one per extra orthogonalization.

use krylov_core::dense::{axpby, axpy, diag, real_dot};
use krylov_core::error::check_len;
use krylov_core::layout::{col, col_mut};
use krylov_core::scalar::real;
use krylov_core::{Communicator, Operator, Options, Real, Result, Scalar, SolverConfig, Variant};
use nalgebra::ComplexField;
use num_traits::Zero;

use crate::convergence::{ConvergenceState, Method, SolveReport};
use crate::gmres::{self, guard};
use crate::workspace::{CgWorkspace, Session};

/// Solve the Hermitian positive-definite systems `A x = b` for `mu`
/// right-hand sides.
///
/// A non-symmetric preconditioner configuration solves with GMRES instead.
/// [`Variant::Flexible`] runs flexible CG, which keeps every direction.
pub fn cg<K, O, C>(
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
    run(op, b, x, mu, comm, options.get(op.prefix()))
}

pub(crate) fn run<K, O, C>(
    op: &O,
    b: &[K],
    x: &mut [K],
    mu: usize,
    comm: &C,
    config: &SolverConfig,
) -> Result<SolveReport>
where
    K: Scalar,
    O: Operator<K> + ?Sized,
    C: Communicator,
{
    if !config.is_cg_compatible() {
        log::debug!("{}: preconditioner is not symmetric, using {}", Method::Cg, Method::Gmres);
        return gmres::run(op, b, x, mu, comm, config);
    }
    let n = op.role().local_len(op.dof());
    check_len(n * mu, b.len())?;
    check_len(n * mu, x.len())?;
    let it = config.max_it;
    if it == 0 || mu == 0 {
        return Ok(SolveReport::empty(Method::Cg, mu));
    }
    let flexible = config.variant == Variant::Flexible;
    let history = flexible || config.reorthogonalize;

    let allocated = op.start(b, x, mu)?;
    let _session = Session::new(allocated, |allocated| op.end(allocated));
    let mut ws = CgWorkspace::new(n, mu, if history { it } else { 0 });
    let mut state = ConvergenceState::<K>::new(
        Method::Cg,
        mu,
        it,
        real::<K>(config.tol),
        config.verbosity,
    );
    let d = op.scaling();
    let participant = op.role().is_participant();

    if participant {
        op.gmv(x, &mut ws.z, mu)?;
    }
    for ((r, &bi), &ax) in ws.r.iter_mut().zip(b).zip(&ws.z) {
        *r = bi - ax;
    }
    op.apply(&ws.r, &mut ws.p, mu, Some(&mut ws.z))?;
    diag(d, n, &ws.p, &mut ws.trash);
    let mut initial: Vec<Real<K>> = (0..mu)
        .map(|nu| real_dot(col(&ws.trash, n, nu), col(&ws.p, n, nu)))
        .collect();
    comm.all_reduce_sum(&mut initial)?;
    let norm: Vec<Real<K>> = initial.iter().map(|&sq| guard(sq.sqrt())).collect();

    let mut reduced = vec![Real::<K>::zero(); 2 * mu];
    let mut next = vec![Real::<K>::zero(); 2 * mu];
    let mut i = 0;
    while i < it {
        for nu in 0..mu {
            reduced[nu] = real_dot(col(&ws.r, n, nu), col(&ws.trash, n, nu));
        }
        if flexible && i > 0 {
            let coef = conjugate(&ws.images, &ws.trash, &ws.denominators, n, mu, comm)?;
            ws.p.copy_from_slice(&ws.z);
            accumulate(&coef, &ws.directions, n, mu, &mut ws.p);
        }
        if participant {
            op.gmv(&ws.p, &mut ws.z, mu)?;
        }
        if config.reorthogonalize && !flexible && i > 0 {
            diag(d, n, &ws.z, &mut ws.trash);
            let coef = conjugate(&ws.directions, &ws.trash, &ws.denominators, n, mu, comm)?;
            accumulate(&coef, &ws.directions, n, mu, &mut ws.p);
            if participant {
                op.gmv(&ws.p, &mut ws.z, mu)?;
            }
        }
        diag(d, n, &ws.p, &mut ws.trash);
        for nu in 0..mu {
            reduced[mu + nu] = real_dot(col(&ws.z, n, nu), col(&ws.trash, n, nu));
        }
        comm.all_reduce_sum(&mut reduced)?;
        let (rho, q) = reduced.split_at(mu);

        i += 1;
        if history {
            ws.denominators.push(q.to_vec());
            ws.directions.push(ws.p.clone());
            if flexible {
                ws.images.push(ws.z.clone());
            }
        }
        for nu in 0..mu {
            if !state.is_active(nu) || q[nu] == Real::<K>::zero() {
                continue;
            }
            let alpha = K::from_real(rho[nu] / q[nu]);
            axpy(alpha, col(&ws.p, n, nu), col_mut(x, n, nu));
            axpy(-alpha, col(&ws.z, n, nu), col_mut(&mut ws.r, n, nu));
        }
        let rho = rho.to_vec();

        op.apply(&ws.r, &mut ws.z, mu, Some(&mut ws.trash))?;
        diag(d, n, &ws.z, &mut ws.trash);
        for nu in 0..mu {
            next[nu] = real_dot(col(&ws.r, n, nu), col(&ws.trash, n, nu));
            next[mu + nu] = real_dot(col(&ws.z, n, nu), col(&ws.trash, n, nu));
        }
        comm.all_reduce_sum(&mut next)?;
        if !flexible {
            for nu in 0..mu {
                let beta = if rho[nu] == Real::<K>::zero() {
                    K::zero()
                } else {
                    K::from_real(next[nu] / rho[nu])
                };
                axpby(K::one(), col(&ws.z, n, nu), beta, col_mut(&mut ws.p, n, nu));
            }
        }
        if state.check(i, &norm, |nu| next[mu + nu].sqrt()) {
            break;
        }
    }
    Ok(state.finish(i))
}

/// Coefficients `-Re<w, against_k> / denominators_k`, one reduction for all
/// `k` and columns, laid out as `k * mu + nu`.
fn conjugate<K, C>(
    against: &[Vec<K>],
    weighted: &[K],
    denominators: &[Vec<Real<K>>],
    n: usize,
    mu: usize,
    comm: &C,
) -> Result<Vec<Real<K>>>
where
    K: Scalar,
    C: Communicator,
{
    let mut coef: Vec<Real<K>> = against
        .iter()
        .flat_map(|vk| (0..mu).map(move |nu| real_dot(col(weighted, n, nu), col(vk, n, nu))))
        .collect();
    comm.all_reduce_sum(&mut coef)?;
    for (k, denom) in denominators.iter().enumerate() {
        for nu in 0..mu {
            let c = &mut coef[k * mu + nu];
            *c = if denom[nu] == Real::<K>::zero() {
                Real::<K>::zero()
            } else {
                -*c / denom[nu]
            };
        }
    }
    Ok(coef)
}

/// `p += sum_k coef_k directions_k`, column by column.
fn accumulate<K: Scalar>(
    coef: &[Real<K>],
    directions: &[Vec<K>],
    n: usize,
    mu: usize,
    p: &mut [K],
) {
    for (k, pk) in directions.iter().enumerate() {
        for nu in 0..mu {
            let c = coef[k * mu + nu];
            if c != Real::<K>::zero() {
                axpy(K::from_real(c), col(pk, n, nu), col_mut(p, n, nu));
            }
        }
    }
}
