//! Block conjugate gradient.
//!
//! The `mu` columns share a block of search directions, kept orthonormal in
//! the `D`-weighted inner product. With `P_k = P̃_k Γ_k`, the step is
//! `α = (P̃ᴴ A P̃)⁻¹ Γ⁻ᴴ ρ` and the next direction block is
//! `Z + P̃ Γ ρ_old⁻¹ ρ_new`, where `ρ = Rᴴ Z`. Every small matrix is
//! reduced in packed Hermitian form and replicated on all ranks.

use krylov_core::dense::{
    axpy, cholesky_upper, diag, dot, gemm, gram, hermitian_solve, pack_upper, real_dot,
    right_solve_upper, scal, solve_upper_adjoint, unpack_hermitian,
};
use krylov_core::error::check_len;
use krylov_core::layout::{col, col_mut};
use krylov_core::scalar::real;
use krylov_core::{
    Communicator, Error, GramSchmidt, Operator, Options, Real, Result, Scalar, SolverConfig,
    Variant,
};
use nalgebra::{ComplexField, DMatrix};

use crate::cg;
use crate::convergence::{ConvergenceState, Method, SolveReport};
use crate::gmres::{self, guard};
use crate::workspace::{BcgWorkspace, Session};

/// Solve `A X = B` for a block of `mu` right-hand sides with Block-CG.
///
/// Rank deficiency of the direction block (for instance from identical
/// right-hand sides) restarts the solve with [`cg::cg`] from the current
/// iterate. A single right-hand side and the flexible variant run CG
/// directly; a non-symmetric preconditioner configuration runs GMRES.
pub fn bcg<K, O, C>(
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
        log::debug!(
            "{}: preconditioner is not symmetric, using {}",
            Method::BlockCg,
            Method::Gmres
        );
        return gmres::run(op, b, x, mu, comm, config);
    }
    if config.variant == Variant::Flexible || mu <= 1 {
        return cg::run(op, b, x, mu, comm, config);
    }
    let n = op.role().local_len(op.dof());
    check_len(n * mu, b.len())?;
    check_len(n * mu, x.len())?;
    if config.max_it == 0 {
        return Ok(SolveReport::empty(Method::BlockCg, mu));
    }

    let allocated = op.start(b, x, mu)?;
    let session = Session::new(allocated, |allocated| op.end(allocated));
    match iterate(op, b, x, n, mu, comm, config) {
        Err(err) if err.is_breakdown() => {
            drop(session);
            log::debug!("{}: {err}, continuing with {}", Method::BlockCg, Method::Cg);
            cg::run(op, b, x, mu, comm, config)
        }
        outcome => outcome,
    }
}

fn iterate<K, O, C>(
    op: &O,
    b: &[K],
    x: &mut [K],
    n: usize,
    mu: usize,
    comm: &C,
    config: &SolverConfig,
) -> Result<SolveReport>
where
    K: Scalar,
    O: Operator<K> + ?Sized,
    C: Communicator,
{
    let it = config.max_it;
    let gs = config.orthogonalization;
    let mut ws = BcgWorkspace::new(n, mu);
    let mut state = ConvergenceState::<K>::new(
        Method::BlockCg,
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
    ws.rho = reduce_hermitian(&gram(&ws.r, &ws.trash, n, mu, mu), comm)?;
    ws.gamma = orthonormalize(&mut ws.p, &mut ws.trash, d, n, mu, gs, comm)?;
    let norm: Vec<Real<K>> = (0..mu)
        .map(|nu| guard(ws.gamma.view((0, nu), (nu + 1, 1)).norm()))
        .collect();

    let mut rho2 = ws.rho.clone();
    let mut i = 0;
    while i < it {
        if participant {
            op.gmv(&ws.p, &mut ws.z, mu)?;
        }
        solve_upper_adjoint(&ws.gamma, &mut rho2);
        diag(d, n, &ws.z, &mut ws.trash);
        let pap = reduce_hermitian(&gram(&ws.p, &ws.trash, n, mu, mu), comm)?;
        ws.step.copy_from(&rho2);
        hermitian_solve(&pap, &mut ws.step, "block CG step")?;
        gemm(K::one(), &ws.p, n, &ws.step, x);
        gemm(-K::one(), &ws.z, n, &ws.step, &mut ws.r);
        i += 1;

        op.apply(&ws.r, &mut ws.z, mu, Some(&mut ws.trash))?;
        diag(d, n, &ws.z, &mut ws.trash);
        let mut reduced: Vec<K> = (0..mu)
            .map(|nu| K::from_real(real_dot(col(&ws.z, n, nu), col(&ws.trash, n, nu))))
            .collect();
        reduced.extend(pack_upper(&gram(&ws.r, &ws.trash, n, mu, mu)));
        comm.all_reduce_sum(&mut reduced)?;
        if state.check(i, &norm, |nu| reduced[nu].real().sqrt()) {
            break;
        }

        let rho_new = unpack_hermitian(&reduced[mu..], mu);
        let mut beta = rho_new.clone();
        hermitian_solve(&ws.rho, &mut beta, "block CG update")?;
        let beta = &ws.gamma * beta;
        let mut next = ws.z.clone();
        gemm(K::one(), &ws.p, n, &beta, &mut next);
        ws.p = next;
        ws.gamma = orthonormalize(&mut ws.p, &mut ws.trash, d, n, mu, gs, comm)?;
        rho2.copy_from(&rho_new);
        ws.rho = rho_new;
    }
    Ok(state.finish(i))
}

/// Sum a Hermitian matrix over all ranks through its packed upper triangle.
fn reduce_hermitian<K: Scalar, C: Communicator>(g: &DMatrix<K>, comm: &C) -> Result<DMatrix<K>> {
    let mut packed = pack_upper(g);
    comm.all_reduce_sum(&mut packed)?;
    Ok(unpack_hermitian(&packed, g.ncols()))
}

/// Make the columns of `p` orthonormal in the `D`-weighted inner product
/// and return the upper-triangular factor `Γ` with `p_old = p_new Γ`.
///
/// Classical variants factor the Gram matrix at once (CholQR); the
/// modified variant orthogonalizes column by column. A column left with
/// less than a hundred machine epsilons of its squared norm is a breakdown.
#[allow(clippy::too_many_arguments)]
fn orthonormalize<K, C>(
    p: &mut [K],
    trash: &mut [K],
    d: Option<&[Real<K>]>,
    n: usize,
    mu: usize,
    gs: GramSchmidt,
    comm: &C,
) -> Result<DMatrix<K>>
where
    K: Scalar,
    C: Communicator,
{
    let stage = "block CG orthogonalization";
    diag(d, n, p, trash);
    if gs != GramSchmidt::Modified {
        let g = reduce_hermitian(&gram(p, trash, n, mu, mu), comm)?;
        let r = cholesky_upper(&g, stage)?;
        right_solve_upper(p, n, &r);
        return Ok(r);
    }

    let mut original: Vec<Real<K>> = (0..mu)
        .map(|nu| real_dot(col(p, n, nu), col(trash, n, nu)))
        .collect();
    comm.all_reduce_sum(&mut original)?;
    let threshold = real::<K>(100.0) * K::epsilon();
    let mut gamma = DMatrix::zeros(mu, mu);
    for j in 0..mu {
        for k in 0..j {
            let (head, tail) = p.split_at_mut(j * n);
            let pj = &mut tail[..n];
            diag(d, n, pj, &mut trash[..n]);
            let mut c = [dot(col(head, n, k), &trash[..n])];
            comm.all_reduce_sum(&mut c)?;
            axpy(-c[0], col(head, n, k), pj);
            gamma[(k, j)] = c[0];
        }
        let pj = col_mut(p, n, j);
        diag(d, n, pj, &mut trash[..n]);
        let mut sq = [real_dot(pj, &trash[..n])];
        comm.all_reduce_sum(&mut sq)?;
        if !(sq[0] > threshold * original[j]) {
            return Err(Error::Breakdown { stage });
        }
        let norm = sq[0].sqrt();
        gamma[(j, j)] = K::from_real(norm);
        scal(K::from_real(norm.recip()), pj);
    }
    Ok(gamma)
}

#[cfg(test)]
mod tests {
    use super::*;
    use krylov_core::{DenseOperator, JacobiPreconditioner, SelfComm};
    use num_complex::Complex64;

    fn spd(n: usize) -> DMatrix<f64> {
        DMatrix::from_fn(n, n, |i, j| match i.abs_diff(j) {
            0 => 3.0 + (i % 5) as f64 * 0.3,
            1 => -1.0,
            3 => 0.2,
            _ => 0.0,
        })
    }

    fn rhs(n: usize, mu: usize) -> Vec<f64> {
        (0..n * mu).map(|k| ((k * 11 + 2) % 13) as f64 - 6.0).collect()
    }

    fn max_residual(a: &DMatrix<f64>, b: &[f64], x: &[f64], mu: usize) -> f64 {
        let n = a.nrows();
        let r = DMatrix::from_column_slice(n, mu, b) - a * DMatrix::from_column_slice(n, mu, x);
        r.column_iter().map(|c| c.norm()).fold(0.0, f64::max)
    }

    #[test]
    fn test_block_cg_solves_block() {
        let n = 24;
        let a = spd(n);
        let b = rhs(n, 3);
        for gs in [GramSchmidt::Classical, GramSchmidt::Modified] {
            let op = DenseOperator::with_preconditioner(
                a.clone(),
                JacobiPreconditioner::from_matrix(&a),
            );
            let mut x = vec![0.0; 3 * n];
            let options = Options::from(
                SolverConfig::default()
                    .with_tol(1e-10)
                    .with_orthogonalization(gs),
            );
            let report = bcg(&op, &b, &mut x, 3, &SelfComm::new(), &options).unwrap();
            assert_eq!(report.method, Method::BlockCg, "{gs:?}");
            assert!(report.all_converged());
            assert!(max_residual(&a, &b, &x, 3) < 1e-7);
        }
    }

    #[test]
    fn test_identical_columns_fall_back_to_cg() {
        let n = 12;
        let a = spd(n);
        let op = DenseOperator::new(a.clone());
        let column = rhs(n, 1);
        let b: Vec<f64> = column.iter().chain(&column).copied().collect();
        let options = Options::from(SolverConfig::default().with_tol(1e-10));

        let mut x = vec![0.0; 2 * n];
        let report = bcg(&op, &b, &mut x, 2, &SelfComm::new(), &options).unwrap();
        assert_eq!(report.method, Method::Cg);
        assert!(report.all_converged());

        let mut reference = vec![0.0; n];
        cg::cg(&op, &column, &mut reference, 1, &SelfComm::new(), &options).unwrap();
        for i in 0..n {
            assert!((x[i] - reference[i]).abs() < 1e-8);
            assert!((x[n + i] - reference[i]).abs() < 1e-8);
        }
    }

    #[test]
    fn test_complex_hermitian_block() {
        let n = 10;
        let a = DMatrix::from_fn(n, n, |i, j| match (i as isize) - (j as isize) {
            0 => Complex64::new(4.0, 0.0),
            1 => Complex64::new(-1.0, 0.5),
            -1 => Complex64::new(-1.0, -0.5),
            _ => Complex64::new(0.0, 0.0),
        });
        let op = DenseOperator::new(a.clone());
        let b: Vec<Complex64> = (0..2 * n)
            .map(|k| Complex64::new(1.0 + k as f64 * 0.1, (k % 3) as f64))
            .collect();
        let mut x = vec![Complex64::new(0.0, 0.0); 2 * n];
        let options = Options::from(SolverConfig::default().with_tol(1e-10));
        let report = bcg(&op, &b, &mut x, 2, &SelfComm::new(), &options).unwrap();
        assert!(report.all_converged());
        let r = DMatrix::from_column_slice(n, 2, &b) - &a * DMatrix::from_column_slice(n, 2, &x);
        assert!(r.norm() < 1e-7);
    }

    #[test]
    fn test_zero_budget_leaves_x_untouched() {
        let n = 8;
        let op = DenseOperator::new(spd(n));
        let b = rhs(n, 3);
        let mut x = vec![0.5; 3 * n];
        let options = Options::from(SolverConfig::default().with_max_it(0));
        let report = bcg(&op, &b, &mut x, 3, &SelfComm::new(), &options).unwrap();
        assert_eq!(report.iterations, 0);
        assert_eq!(report.method, Method::BlockCg);
        assert_eq!(x, vec![0.5; 3 * n]);
    }
}
