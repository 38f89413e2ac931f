//! Solution update at the end of a restart cycle.
//!
//! The triangular system built by the Arnoldi process is solved for the
//! Krylov coefficients `y`, and the iterate moves by `V y` (left
//! preconditioning), `M^{-1} V y` (right) or `Z y` (flexible).

use krylov_core::dense::{axpy, gemm, solve_upper};
use krylov_core::layout::{col, col_mut};
use krylov_core::{Operator, Result, Scalar, Variant};
use nalgebra::DMatrix;

use crate::block_arnoldi::BlockHessenberg;

/// Triangular factors and right-hand sides of one cycle.
pub enum Coefficients<'a, K: Scalar> {
    /// Independent right-hand sides sharing the interleaved layout of
    /// [`crate::workspace::GmresWorkspace`]. `rows[nu]` Krylov rows enter
    /// the back substitution of column `nu`; zero rows leave it untouched.
    Columns {
        h: &'a [Vec<K>],
        s: &'a [K],
        rows: &'a [usize],
    },
    /// One block of width `hess.d` after `steps` block steps.
    ///
    /// Block column `k` corrects solution column `order[k]`. Columns
    /// `order[d..]` were deflated and receive the combination `coupling`
    /// of the block corrections.
    Block {
        hess: &'a BlockHessenberg<K>,
        steps: usize,
        order: &'a [usize],
        coupling: Option<&'a DMatrix<K>>,
    },
}

/// Add the correction of a cycle to `x`.
///
/// `basis` holds `V` (or `Z` for the flexible variant). `work` and
/// `correction` are scratch strips of the full multi-vector length; only
/// the right-preconditioned variant needs `correction`.
#[allow(clippy::too_many_arguments)]
pub fn update<K, O>(
    op: &O,
    variant: Variant,
    n: usize,
    x: &mut [K],
    basis: &[Vec<K>],
    work: &mut [K],
    correction: &mut [K],
    coeffs: Coefficients<'_, K>,
) -> Result<()>
where
    K: Scalar,
    O: Operator<K> + ?Sized,
{
    match coeffs {
        Coefficients::Columns { h, s, rows } => {
            let mu = rows.len();
            work.fill(K::zero());
            for (nu, &k) in rows.iter().enumerate() {
                let y = back_substitute(h, s, mu, nu, k);
                let target = col_mut(work, n, nu);
                for (j, &yj) in y.iter().enumerate() {
                    if yj != K::zero() {
                        axpy(yj, col(&basis[j], n, nu), target);
                    }
                }
            }
            if variant == Variant::Right {
                op.apply(work, correction, mu, None)?;
                axpy(K::one(), correction, x);
            } else {
                axpy(K::one(), work, x);
            }
        }
        Coefficients::Block {
            hess,
            steps,
            order,
            coupling,
        } => {
            let d = hess.d;
            let dim = n * d;
            let r = hess.triangular(steps);
            let mut y = hess.s.rows(0, steps * d).into_owned();
            solve_upper(&r, &mut y);

            let work = &mut work[..dim];
            work.fill(K::zero());
            for (j, vj) in basis.iter().take(steps).enumerate() {
                let yj = y.rows(j * d, d).into_owned();
                gemm(K::one(), &vj[..dim], n, &yj, work);
            }
            let delta: &[K] = if variant == Variant::Right {
                let correction = &mut correction[..dim];
                op.apply(work, correction, d, None)?;
                correction
            } else {
                work
            };

            for (k, &nu) in order.iter().take(d).enumerate() {
                axpy(K::one(), col(delta, n, k), col_mut(x, n, nu));
            }
            if let Some(t) = coupling {
                let mut dependent = vec![K::zero(); n * t.ncols()];
                gemm(K::one(), delta, n, t, &mut dependent);
                for (j, &nu) in order.iter().skip(d).enumerate() {
                    axpy(K::one(), col(&dependent, n, j), col_mut(x, n, nu));
                }
            }
        }
    }
    Ok(())
}

/// Solve the leading `k x k` triangle of right-hand side `nu`.
fn back_substitute<K: Scalar>(h: &[Vec<K>], s: &[K], mu: usize, nu: usize, k: usize) -> Vec<K> {
    let mut y: Vec<K> = (0..k).map(|i| s[i * mu + nu]).collect();
    for i in (0..k).rev() {
        let pivot = h[i][i * mu + nu];
        if pivot == K::zero() {
            y[i] = K::zero();
            continue;
        }
        y[i] /= pivot;
        let yi = y[i];
        for (l, yl) in y.iter_mut().enumerate().take(i) {
            *yl -= h[i][l * mu + nu] * yi;
        }
    }
    y
}
