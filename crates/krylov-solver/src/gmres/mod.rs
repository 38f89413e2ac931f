//! Restarted GMRES for multiple right-hand sides.
//!
//! [`gmres`] iterates `mu` independent Krylov spaces side by side so that
//! every projection step issues a single reduction for all columns.
//! [`bgmres`] builds one block Krylov space shared by the columns.
//!
//! # Usage
//!
//! ```ignore
//! use krylov_core::{Options, SelfComm, SolverConfig};
//! use krylov_solver::gmres;
//!
//! let options = Options::from(SolverConfig::default().with_tol(1e-10));
//! let report = gmres(&operator, &b, &mut x, 1, &SelfComm::new(), &options)?;
//! assert!(report.all_converged());
//! ```
//!
//! # Module Structure
//!
//! - [`block`] - Block-GMRES driver
//! - [`deflation`] - Selection of linearly independent initial residuals

pub mod block;
pub mod deflation;

pub use block::bgmres;

use krylov_core::dense::{col_norms_squared, scal};
use krylov_core::error::check_len;
use krylov_core::layout::col_mut;
use krylov_core::scalar::real;
use krylov_core::{
    Communicator, EPS, Operator, Options, PEN, Real, Result, Scalar, SolverConfig, Variant,
};
use nalgebra::ComplexField;
use num_traits::Zero;

use crate::arnoldi::{ArnoldiParams, arnoldi};
use crate::convergence::{ConvergenceState, Method, SolveReport, log_restart};
use crate::update::{Coefficients, update};
use crate::workspace::{GmresWorkspace, Session};

/// Solve `A x = b` for `mu` right-hand sides with restarted GMRES.
///
/// `b` and `x` hold `mu` columns of the operator's local length. Options are
/// looked up under the operator's prefix.
pub fn gmres<K, O, C>(
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
    let role = op.role();
    let n = role.local_len(op.dof());
    check_len(n * mu, b.len())?;
    check_len(n * mu, x.len())?;
    let it = config.max_it;
    if it == 0 || mu == 0 {
        return Ok(SolveReport::empty(Method::Gmres, mu));
    }
    let m = config.effective_restart();
    let params = ArnoldiParams {
        variant: config.variant,
        gs: config.orthogonalization,
        m,
        n,
        mu,
        role,
    };

    let allocated = op.start(b, x, mu)?;
    let _session = Session::new(allocated, |allocated| op.end(allocated));
    let mut ws = GmresWorkspace::new(n, mu, m, config.variant == Variant::Flexible);
    let mut state = ConvergenceState::<K>::new(
        Method::Gmres,
        mu,
        it,
        real::<K>(config.tol),
        config.verbosity,
    );

    let mut reduced = initial_norms(op, &params, b, &mut ws.ax, &mut ws.v[0])?;
    depenalize(b, x);

    let mut norm: Vec<Real<K>> = Vec::new();
    let mut iterations = 0;
    let mut restarts = 0;
    loop {
        residual(op, &params, b, x, &mut ws.ax, &mut ws.v[0])?;
        let local = col_norms_squared(&ws.v[0], n, mu);
        if norm.is_empty() {
            reduced.extend(local);
            comm.all_reduce_sum(&mut reduced)?;
            norm = reduced[..mu].iter().map(|&sq| guard(sq.sqrt())).collect();
            ws.sn[..mu].copy_from_slice(&reduced[mu..]);
        } else {
            ws.sn[..mu].copy_from_slice(&local);
            comm.all_reduce_sum(&mut ws.sn[..mu])?;
        }

        state.restart();
        let res: Vec<Real<K>> = ws.sn[..mu].iter().map(|sq| sq.sqrt()).collect();
        ws.s.fill(K::zero());
        for (nu, &r) in res.iter().enumerate() {
            ws.s[nu] = K::from_real(r);
            if r != Real::<K>::zero() {
                scal(K::from_real(r.recip()), col_mut(&mut ws.v[0], n, nu));
            }
        }
        if state.check(0, &norm, |nu| res[nu]) {
            break;
        }

        let mut i = 0;
        while i < m && iterations < it {
            arnoldi(op, comm, &params, &mut ws, i)?;
            i += 1;
            iterations += 1;
            let s = &ws.s;
            if state.check(i, &norm, |nu| s[i * mu + nu].modulus()) {
                break;
            }
        }
        state.finish_cycle(i);
        let rows = state.rows_all();
        let (v, last) = ws.v.split_at_mut(m);
        let basis = if config.variant == Variant::Flexible {
            &ws.z[..]
        } else {
            &v[..]
        };
        update(
            op,
            config.variant,
            n,
            x,
            basis,
            &mut ws.ax,
            &mut last[0],
            Coefficients::Columns {
                h: &ws.h,
                s: &ws.s,
                rows: &rows,
            },
        )?;
        if state.all_converged() || iterations >= it {
            break;
        }
        restarts += 1;
        log_restart(Method::Gmres, config.verbosity, restarts);
    }
    Ok(state.finish(iterations))
}

/// Local squared norms of the reference vector of each column.
///
/// The reference is `M^{-1} b` for left preconditioning and `b` otherwise.
pub(crate) fn initial_norms<K, O>(
    op: &O,
    params: &ArnoldiParams,
    b: &[K],
    work: &mut [K],
    scratch: &mut [K],
) -> Result<Vec<Real<K>>>
where
    K: Scalar,
    O: Operator<K> + ?Sized,
{
    let ArnoldiParams { n, mu, .. } = *params;
    if params.variant == Variant::Left {
        let work = &mut work[..n * mu];
        op.apply(b, work, mu, Some(&mut scratch[..n * mu]))?;
        Ok(col_norms_squared(work, n, mu))
    } else {
        Ok(col_norms_squared(b, n, mu))
    }
}

/// Preconditioned residual into `out`: `M^{-1}(b - A x)` for left
/// preconditioning, `b - A x` otherwise. `work` holds `b - A x` afterwards.
pub(crate) fn residual<K, O>(
    op: &O,
    params: &ArnoldiParams,
    b: &[K],
    x: &[K],
    work: &mut [K],
    out: &mut [K],
) -> Result<()>
where
    K: Scalar,
    O: Operator<K> + ?Sized,
{
    let dim = params.n * params.mu;
    let (work, out) = (&mut work[..dim], &mut out[..dim]);
    if params.role.is_participant() {
        op.gmv(x, work, params.mu)?;
    }
    for (w, &bi) in work.iter_mut().zip(b) {
        *w = bi - *w;
    }
    if params.variant == Variant::Left {
        op.apply(work, out, params.mu, None)
    } else {
        out.copy_from_slice(work);
        Ok(())
    }
}

/// Set `x = b / PEN` on rows carrying a penalized right-hand side.
pub(crate) fn depenalize<K: Scalar>(b: &[K], x: &mut [K]) {
    let threshold = real::<K>(PEN * EPS);
    for (xi, &bi) in x.iter_mut().zip(b) {
        if bi.modulus() > threshold {
            *xi = bi.depenalize();
        }
    }
}

/// Initial norms that vanish are replaced by one.
#[inline]
pub(crate) fn guard<R: nalgebra::RealField + Copy>(norm: R) -> R {
    if norm < nalgebra::convert(EPS) {
        R::one()
    } else {
        norm
    }
}
