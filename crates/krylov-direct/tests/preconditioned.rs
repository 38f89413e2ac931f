//! Krylov solves preconditioned by an incomplete direct factorization.

use krylov_core::{Options, SelfComm, SolverConfig};
use krylov_direct::{DirectError, DirectOperator, DirectSolver, FaerDirect, MatrixCsr};
use krylov_solver::{Method, bgmres};
use num_complex::Complex64;

/// Tridiagonal matrix with a weak second superdiagonal when `far` is set.
fn banded(n: usize, far: bool) -> MatrixCsr<Complex64> {
    let mut ia = vec![0];
    let (mut ja, mut a) = (Vec::new(), Vec::new());
    for i in 0..n {
        let mut push = |j: usize, v: Complex64| {
            ja.push(j);
            a.push(v);
        };
        if i > 0 {
            push(i - 1, Complex64::new(-1.0, 0.2));
        }
        push(i, Complex64::new(3.0, 0.5));
        if i + 1 < n {
            push(i + 1, Complex64::new(-0.8, 0.0));
        }
        if far && i + 2 < n {
            push(i + 2, Complex64::new(0.4, -0.1));
        }
        ia.push(ja.len());
    }
    MatrixCsr::new(n, ia, ja, a, false).unwrap()
}

fn block_rhs(n: usize, mu: usize) -> Vec<Complex64> {
    (0..n * mu)
        .map(|k| Complex64::new((k as f64 * 0.37).cos(), (k % 7) as f64 / 7.0))
        .collect()
}

#[test]
fn test_incomplete_factors_speed_up_block_gmres() {
    let n = 40;
    let mu = 3;
    let options = Options::from(SolverConfig::default().with_tol(1e-10).with_max_it(200));
    let b = block_rhs(n, mu);

    let plain = DirectOperator::new(banded(n, true));
    let mut x_plain = vec![Complex64::new(0.0, 0.0); n * mu];
    let unpreconditioned =
        bgmres(&plain, &b, &mut x_plain, mu, &SelfComm::new(), &options).unwrap();

    let preconditioned = DirectOperator::new(banded(n, true))
        .with_preconditioner(&banded(n, false))
        .unwrap();
    let mut x = vec![Complex64::new(0.0, 0.0); n * mu];
    let report = bgmres(&preconditioned, &b, &mut x, mu, &SelfComm::new(), &options).unwrap();

    assert!(unpreconditioned.all_converged() && report.all_converged());
    assert_eq!(report.method, Method::BlockGmres);
    assert!(report.iterations < unpreconditioned.iterations);

    let matrix = preconditioned.matrix();
    for (xc, bc) in x.chunks(n).zip(b.chunks(n)) {
        let mut ax = vec![Complex64::new(0.0, 0.0); n];
        matrix.multiply(xc, &mut ax).unwrap();
        let res: f64 = ax.iter().zip(bc).map(|(a, b)| (a - b).norm_sqr()).sum::<f64>().sqrt();
        let norm: f64 = bc.iter().map(|v| v.norm_sqr()).sum::<f64>().sqrt();
        assert!(res <= 1e-8 * norm);
    }
}

#[test]
fn test_numfact_keeps_first_factors_until_reset() {
    let first = banded(6, false);
    let second = banded(6, true);
    let mut solver = FaerDirect::new();
    solver.numfact(&first).unwrap();
    solver.numfact(&second).unwrap();

    let x: Vec<Complex64> = (0..6).map(|i| Complex64::new(1.0, i as f64)).collect();
    let mut rhs = vec![Complex64::new(0.0, 0.0); 6];
    first.multiply(&x, &mut rhs).unwrap();
    solver.solve(&mut rhs).unwrap();
    assert!(rhs.iter().zip(&x).all(|(a, b)| (a - b).norm() < 1e-12));

    solver.reset();
    assert!(matches!(solver.solve(&mut rhs), Err(DirectError::NotFactorized)));
}
