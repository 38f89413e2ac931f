//! Block-GMRES.
//!
//! All unconverged columns share one block Krylov space. Each cycle starts
//! from the CholQR factorization of the residual block; with a deflation
//! tolerance, residuals that depend linearly on others are left out of the
//! block and corrected through the coupling of [`super::deflation`].

use krylov_core::dense::{cholesky_upper, gram, pack_upper, right_solve_upper, unpack_hermitian};
use krylov_core::error::check_len;
use krylov_core::layout::gather;
use krylov_core::scalar::real;
use krylov_core::{Communicator, Operator, Options, Real, Result, Scalar, SolverConfig, Variant};
use nalgebra::ComplexField;

use super::deflation::{Selection, select_columns};
use super::{depenalize, guard, initial_norms, residual};
use crate::arnoldi::ArnoldiParams;
use crate::block_arnoldi::{BlockHessenberg, block_arnoldi};
use crate::convergence::{ConvergenceState, Method, SolveReport, log_restart};
use crate::update::{Coefficients, update};
use crate::workspace::{BlockGmresWorkspace, Session};

/// Solve `A X = B` for a block of `mu` right-hand sides with Block-GMRES.
///
/// A single right-hand side runs plain GMRES. A rank-deficient block met
/// during the iteration switches to GMRES from the current iterate for the
/// remaining budget; the report then names [`Method::Gmres`].
pub fn bgmres<K, O, C>(
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
    if mu <= 1 {
        return super::run(op, b, x, mu, comm, config);
    }
    let role = op.role();
    let n = role.local_len(op.dof());
    check_len(n * mu, b.len())?;
    check_len(n * mu, x.len())?;
    let it = config.max_it;
    if it == 0 {
        return Ok(SolveReport::empty(Method::BlockGmres, mu));
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
    let session = Session::new(allocated, |allocated| op.end(allocated));
    let mut ws = BlockGmresWorkspace::new(n, mu, m, config.variant == Variant::Flexible);
    let mut state = ConvergenceState::<K>::new(
        Method::BlockGmres,
        mu,
        it,
        real::<K>(config.tol),
        config.verbosity,
    );
    let deflation_tol = config.deflation_tol.map(real::<K>);

    let mut reduced = initial_norms(op, &params, b, &mut ws.ax, &mut ws.v[0])?;
    depenalize(b, x);

    let mut norm: Vec<Real<K>> = Vec::new();
    let mut iterations = 0;
    let mut restarts = 0;
    loop {
        residual(op, &params, b, x, &mut ws.ax, &mut ws.r)?;
        if norm.is_empty() {
            comm.all_reduce_sum(&mut reduced)?;
            norm = reduced.iter().map(|&sq| guard(sq.sqrt())).collect();
        }
        let mut packed = pack_upper(&gram(&ws.r, &ws.r, n, mu, mu));
        comm.all_reduce_sum(&mut packed)?;
        let g = unpack_hermitian(&packed, mu);

        state.restart();
        if state.check(0, &norm, |nu| g[(nu, nu)].real().sqrt()) || iterations >= it {
            break;
        }

        let active = state.active();
        let selection = match deflation_tol {
            Some(tol) => select_columns(&g, &active, tol),
            None => Selection::all(&active),
        };
        let d = selection.d;
        let block = &selection.order[..d];
        if !selection.deflated().is_empty() && config.verbosity > 1 {
            log::info!(
                "{}: deflating {} of {} right-hand sides",
                Method::BlockGmres,
                selection.deflated().len(),
                active.len()
            );
        }

        let g_block = g.select_rows(block).select_columns(block);
        let r0 = match cholesky_upper(&g_block, "block GMRES initial block") {
            Ok(r0) => r0,
            Err(err) if err.is_breakdown() => {
                drop(session);
                return fall_back(op, b, x, mu, comm, config, state, iterations);
            }
            Err(err) => return Err(err),
        };
        let v0 = &mut ws.v[0][..n * d];
        v0.copy_from_slice(&gather(&ws.r, n, block));
        right_solve_upper(v0, n, &r0);
        let mut hess = BlockHessenberg::new(d, m, &r0);
        let block_params = ArnoldiParams { mu: d, ..params };

        let mut i = 0;
        let mut breakdown = false;
        while i < m && iterations < it {
            let invariant = match block_arnoldi(op, comm, &block_params, &mut ws, &mut hess, i) {
                Ok(invariant) => invariant,
                Err(err) if err.is_breakdown() => {
                    breakdown = true;
                    break;
                }
                Err(err) => return Err(err),
            };
            i += 1;
            iterations += 1;
            if state.check_block(i, &norm, block, |k| hess.residual(i, k)) || invariant {
                break;
            }
        }

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
            Coefficients::Block {
                hess: &hess,
                steps: i,
                order: &selection.order,
                coupling: selection.coupling.as_ref(),
            },
        )?;
        if breakdown {
            drop(session);
            return fall_back(op, b, x, mu, comm, config, state, iterations);
        }
        // Deflated columns are only checked against their true residual.
        if state.all_converged() || (iterations >= it && selection.deflated().is_empty()) {
            break;
        }
        restarts += 1;
        log_restart(Method::BlockGmres, config.verbosity, restarts);
    }
    Ok(state.finish(iterations))
}

/// Continue with GMRES once the block became rank deficient.
#[allow(clippy::too_many_arguments)]
fn fall_back<K, O, C>(
    op: &O,
    b: &[K],
    x: &mut [K],
    mu: usize,
    comm: &C,
    config: &SolverConfig,
    state: ConvergenceState<K>,
    iterations: usize,
) -> Result<SolveReport>
where
    K: Scalar,
    O: Operator<K> + ?Sized,
    C: Communicator,
{
    let remaining = config.max_it.saturating_sub(iterations);
    if remaining == 0 {
        return Ok(state.finish(iterations));
    }
    log::debug!(
        "{}: block breakdown after {iterations} iterations, continuing with {}",
        Method::BlockGmres,
        Method::Gmres
    );
    let fallback = config.clone().with_max_it(remaining);
    let report = super::run(op, b, x, mu, comm, &fallback)?;
    Ok(SolveReport::new(
        Method::Gmres,
        iterations + report.iterations,
        report.converged,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use krylov_core::{DenseOperator, SelfComm};
    use nalgebra::DMatrix;

    fn operator(n: usize) -> DMatrix<f64> {
        DMatrix::from_fn(n, n, |i, j| match (i as isize) - (j as isize) {
            0 => 3.0 + (i % 3) as f64,
            -1 => -1.0,
            1 => -0.5,
            2 => 0.25,
            _ => 0.0,
        })
    }

    fn block_rhs(n: usize, mu: usize) -> Vec<f64> {
        (0..n * mu)
            .map(|k| ((k * 13 + 5) % 17) as f64 / 17.0 - 0.5)
            .collect()
    }

    fn max_residual(a: &DMatrix<f64>, b: &[f64], x: &[f64], mu: usize) -> f64 {
        let n = a.nrows();
        let x = DMatrix::from_column_slice(n, mu, x);
        let b = DMatrix::from_column_slice(n, mu, b);
        let r = b - a * x;
        r.column_iter().map(|c| c.norm()).fold(0.0, f64::max)
    }

    #[test]
    fn test_block_gmres_solves_block() {
        let n = 18;
        let a = operator(n);
        let op = DenseOperator::new(a.clone());
        let b = block_rhs(n, 3);
        let mut x = vec![0.0; n * 3];
        let options = Options::from(SolverConfig::default().with_tol(1e-10));
        let report = bgmres(&op, &b, &mut x, 3, &SelfComm::new(), &options).unwrap();
        assert!(report.all_converged());
        assert_eq!(report.method, Method::BlockGmres);
        assert!(max_residual(&a, &b, &x, 3) < 1e-8);
    }

    #[test]
    fn test_block_needs_fewer_iterations_than_gmres() {
        let n = 24;
        let a = operator(n);
        let op = DenseOperator::new(a.clone());
        let b = block_rhs(n, 4);
        let options = Options::from(SolverConfig::default().with_tol(1e-8));
        let mut x_block = vec![0.0; n * 4];
        let block = bgmres(&op, &b, &mut x_block, 4, &SelfComm::new(), &options).unwrap();
        let mut x_single = vec![0.0; n * 4];
        let single =
            super::super::gmres(&op, &b, &mut x_single, 4, &SelfComm::new(), &options).unwrap();
        assert!(block.all_converged() && single.all_converged());
        assert!(block.iterations <= single.iterations);
    }

    #[test]
    fn test_single_column_runs_gmres() {
        let n = 8;
        let op = DenseOperator::new(operator(n));
        let b = vec![1.0; n];
        let mut x = vec![0.0; n];
        let report = bgmres(&op, &b, &mut x, 1, &SelfComm::new(), &Options::default()).unwrap();
        assert_eq!(report.method, Method::Gmres);
        assert!(report.all_converged());
    }

    #[test]
    fn test_duplicated_column_falls_back_without_deflation() {
        let n = 10;
        let a = operator(n);
        let op = DenseOperator::new(a.clone());
        let column: Vec<f64> = (0..n).map(|i| 1.0 + i as f64).collect();
        let b: Vec<f64> = column.iter().chain(&column).copied().collect();
        let mut x = vec![0.0; 2 * n];
        let options = Options::from(SolverConfig::default().with_tol(1e-10));
        let report = bgmres(&op, &b, &mut x, 2, &SelfComm::new(), &options).unwrap();
        assert_eq!(report.method, Method::Gmres);
        assert!(report.all_converged());
        assert!(max_residual(&a, &b, &x, 2) < 1e-8);
    }

    #[test]
    fn test_deflation_solves_dependent_columns() {
        let n = 12;
        let a = operator(n);
        let op = DenseOperator::new(a.clone());
        let first: Vec<f64> = (0..n).map(|i| (i as f64 * 0.7).cos()).collect();
        let second: Vec<f64> = (0..n).map(|i| 1.0 / (1.0 + i as f64)).collect();
        let b: Vec<f64> = first
            .iter()
            .chain(&second)
            .copied()
            .chain(first.iter().map(|v| 3.0 * v))
            .collect();
        let mut x = vec![0.0; 3 * n];
        let options = Options::from(
            SolverConfig::default()
                .with_tol(1e-10)
                .with_deflation_tol(1e-8),
        );
        let report = bgmres(&op, &b, &mut x, 3, &SelfComm::new(), &options).unwrap();
        assert_eq!(report.method, Method::BlockGmres);
        assert!(report.all_converged());
        assert!(max_residual(&a, &b, &x, 3) < 1e-7);
        for i in 0..n {
            assert!((x[2 * n + i] - 3.0 * x[i]).abs() < 1e-9);
        }
    }

    #[test]
    fn test_restarted_deflation_keeps_block_method() {
        let n = 30;
        let a = operator(n);
        let op = DenseOperator::new(a.clone());
        let first: Vec<f64> = (0..n).map(|i| (i as f64 * 0.4).sin() + 0.5).collect();
        let second: Vec<f64> = (0..n).map(|i| ((i * 5 + 2) % 9) as f64 - 4.0).collect();
        let dependent: Vec<f64> = first.iter().zip(&second).map(|(f, s)| 2.0 * f - s).collect();
        let options = Options::from(
            SolverConfig::default()
                .with_tol(1e-8)
                .with_restart(5)
                .with_max_it(300)
                .with_deflation_tol(1e-8),
        );
        for position in 0..3 {
            let mut columns = vec![&first, &second];
            columns.insert(position, &dependent);
            let b: Vec<f64> = columns.iter().flat_map(|c| c.iter().copied()).collect();
            let mut x = vec![0.0; 3 * n];
            let report = bgmres(&op, &b, &mut x, 3, &SelfComm::new(), &options).unwrap();
            assert_eq!(report.method, Method::BlockGmres, "dependent column at {position}");
            assert!(report.all_converged());
            assert!(max_residual(&a, &b, &x, 3) < 1e-6);

            let column = |k: usize| &x[k * n..(k + 1) * n];
            let (xf, xs) = match position {
                0 => (column(1), column(2)),
                1 => (column(0), column(2)),
                _ => (column(0), column(1)),
            };
            let xd = column(position);
            for i in 0..n {
                assert!((xd[i] - (2.0 * xf[i] - xs[i])).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_zero_budget_leaves_x_untouched() {
        let n = 9;
        let op = DenseOperator::new(operator(n));
        let b = block_rhs(n, 2);
        let mut x = vec![0.5; 2 * n];
        let options = Options::from(SolverConfig::default().with_max_it(0));
        let report = bgmres(&op, &b, &mut x, 2, &SelfComm::new(), &options).unwrap();
        assert_eq!(report.iterations, 0);
        assert_eq!(report.method, Method::BlockGmres);
        assert_eq!(x, vec![0.5; 2 * n]);
    }
}
