//! Dense kernels on column-major multi-vector strips.
//!
//! Level-1 and level-2 operations are plain loops over slices. Small dense
//! factorizations (Cholesky, triangular solves) run on `nalgebra` matrices;
//! these are replicated on every rank after a reduction and never exceed a
//! few block widths.

use nalgebra::{Cholesky, ComplexField, DMatrix};
use num_traits::Zero;

use crate::error::{Error, Result};
use crate::layout::{col, col_mut};
use crate::scalar::{Real, Scalar, real};

/// Conjugated dot product `x^H y`.
#[inline]
pub fn dot<K: Scalar>(x: &[K], y: &[K]) -> K {
    x.iter()
        .zip(y)
        .fold(K::zero(), |acc, (&a, &b)| acc + a.conjugate() * b)
}

/// Real part of `x^H y`.
#[inline]
pub fn real_dot<K: Scalar>(x: &[K], y: &[K]) -> Real<K> {
    dot(x, y).real()
}

/// Squared 2-norm.
#[inline]
pub fn nrm2_squared<K: Scalar>(x: &[K]) -> Real<K> {
    x.iter()
        .fold(Real::<K>::zero(), |acc, &a| acc + a.modulus_squared())
}

/// 2-norm.
#[inline]
pub fn nrm2<K: Scalar>(x: &[K]) -> Real<K> {
    nrm2_squared(x).sqrt()
}

/// `y += alpha * x`.
#[inline]
pub fn axpy<K: Scalar>(alpha: K, x: &[K], y: &mut [K]) {
    for (yi, &xi) in y.iter_mut().zip(x) {
        *yi += alpha * xi;
    }
}

/// `y = alpha * x + beta * y`.
#[inline]
pub fn axpby<K: Scalar>(alpha: K, x: &[K], beta: K, y: &mut [K]) {
    for (yi, &xi) in y.iter_mut().zip(x) {
        *yi = alpha * xi + beta * *yi;
    }
}

/// `x *= alpha`.
#[inline]
pub fn scal<K: Scalar>(alpha: K, x: &mut [K]) {
    for xi in x.iter_mut() {
        *xi *= alpha;
    }
}

/// Per-column squared norms of a multi-vector.
pub fn col_norms_squared<K: Scalar>(v: &[K], n: usize, mu: usize) -> Vec<Real<K>> {
    (0..mu).map(|nu| nrm2_squared(col(v, n, nu))).collect()
}

/// `output = D input` column by column, where `D` has length `n`.
///
/// Without a scaling vector this is a copy.
pub fn diag<K: Scalar>(d: Option<&[Real<K>]>, n: usize, input: &[K], output: &mut [K]) {
    match d {
        Some(d) => {
            for (k, (o, &x)) in output.iter_mut().zip(input).enumerate() {
                *o = x.scale(d[k % n.max(1)]);
            }
        }
        None => output.copy_from_slice(input),
    }
}

/// In-place `x = D x`.
pub fn diag_in_place<K: Scalar>(d: Option<&[Real<K>]>, n: usize, x: &mut [K]) {
    if let Some(d) = d {
        for (k, xi) in x.iter_mut().enumerate() {
            *xi = xi.scale(d[k % n.max(1)]);
        }
    }
}

/// Block inner product `A^H B` of an `n x p` strip and an `n x q` strip.
pub fn gram<K: Scalar>(a: &[K], b: &[K], n: usize, p: usize, q: usize) -> DMatrix<K> {
    DMatrix::from_fn(p, q, |j, k| dot(col(a, n, j), col(b, n, k)))
}

/// `y += alpha * A C` for an `n x p` strip `A`, a `p x q` matrix `C` and an
/// `n x q` strip `y`.
pub fn gemm<K: Scalar>(alpha: K, a: &[K], n: usize, c: &DMatrix<K>, y: &mut [K]) {
    for k in 0..c.ncols() {
        let yk = col_mut(y, n, k);
        for j in 0..c.nrows() {
            let coef = alpha * c[(j, k)];
            if coef != K::zero() {
                axpy(coef, col(a, n, j), yk);
            }
        }
    }
}

/// Pack the upper triangle of a square matrix column by column.
pub fn pack_upper<K: Scalar>(g: &DMatrix<K>) -> Vec<K> {
    let mu = g.ncols();
    let mut packed = Vec::with_capacity(mu * (mu + 1) / 2);
    for j in 0..mu {
        for i in 0..=j {
            packed.push(g[(i, j)]);
        }
    }
    packed
}

/// Rebuild a Hermitian matrix from its packed upper triangle.
pub fn unpack_hermitian<K: Scalar>(packed: &[K], mu: usize) -> DMatrix<K> {
    let mut g = DMatrix::zeros(mu, mu);
    let mut idx = 0;
    for j in 0..mu {
        for i in 0..=j {
            g[(i, j)] = packed[idx];
            if i != j {
                g[(j, i)] = packed[idx].conjugate();
            }
            idx += 1;
        }
    }
    g
}

/// Upper Cholesky factor `R` with `G = R^H R`.
///
/// A pivot whose square falls below a hundred machine epsilons of the
/// matching diagonal entry is reported as a breakdown.
pub fn cholesky_upper<K: Scalar>(g: &DMatrix<K>, stage: &'static str) -> Result<DMatrix<K>> {
    let chol = Cholesky::new(g.clone()).ok_or(Error::Breakdown { stage })?;
    let l = chol.l();
    let threshold = real::<K>(100.0) * K::epsilon();
    for k in 0..l.nrows() {
        let pivot = l[(k, k)].modulus_squared();
        let reference = g[(k, k)].modulus();
        if !(pivot > threshold * reference) {
            return Err(Error::Breakdown { stage });
        }
    }
    Ok(l.adjoint())
}

/// Solve the Hermitian positive-definite system `A X = B` in place.
pub fn hermitian_solve<K: Scalar>(
    a: &DMatrix<K>,
    b: &mut DMatrix<K>,
    stage: &'static str,
) -> Result<()> {
    let r = cholesky_upper(a, stage)?;
    solve_upper_adjoint(&r, b);
    solve_upper(&r, b);
    Ok(())
}

/// Back substitution `R X = B` for upper-triangular `R`.
///
/// Rows with a zero pivot are left at zero.
pub fn solve_upper<K: Scalar>(r: &DMatrix<K>, b: &mut DMatrix<K>) {
    let dim = r.nrows().min(b.nrows());
    for c in 0..b.ncols() {
        for i in (0..dim).rev() {
            let pivot = r[(i, i)];
            if pivot == K::zero() {
                b[(i, c)] = K::zero();
                continue;
            }
            let xi = b[(i, c)] / pivot;
            b[(i, c)] = xi;
            for k in 0..i {
                let rk = r[(k, i)];
                b[(k, c)] -= rk * xi;
            }
        }
    }
}

/// Forward substitution `R^H X = B` for upper-triangular `R`.
pub fn solve_upper_adjoint<K: Scalar>(r: &DMatrix<K>, b: &mut DMatrix<K>) {
    let dim = r.nrows().min(b.nrows());
    for c in 0..b.ncols() {
        for i in 0..dim {
            let mut acc = b[(i, c)];
            for k in 0..i {
                acc -= r[(k, i)].conjugate() * b[(k, c)];
            }
            let pivot = r[(i, i)].conjugate();
            b[(i, c)] = if pivot == K::zero() {
                K::zero()
            } else {
                acc / pivot
            };
        }
    }
}

/// `W = W R^{-1}` for an `n x mu` strip and an upper-triangular `R`.
pub fn right_solve_upper<K: Scalar>(w: &mut [K], n: usize, r: &DMatrix<K>) {
    let mu = r.ncols();
    for j in 0..mu {
        for k in 0..j {
            let coef = r[(k, j)];
            if coef == K::zero() {
                continue;
            }
            let (head, tail) = w.split_at_mut(j * n);
            axpy(-coef, col(head, n, k), &mut tail[..n]);
        }
        let pivot = r[(j, j)];
        if pivot != K::zero() {
            scal(K::one() / pivot, col_mut(w, n, j));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64;

    #[test]
    fn test_dot_conjugates_first_argument() {
        let x = vec![Complex64::new(0.0, 1.0)];
        let y = vec![Complex64::new(0.0, 1.0)];
        assert!((dot(&x, &y) - Complex64::new(1.0, 0.0)).norm() < 1e-15);
    }

    #[test]
    fn test_axpby() {
        let x = vec![1.0, 2.0];
        let mut y = vec![10.0, 20.0];
        axpby(2.0, &x, -1.0, &mut y);
        assert_eq!(y, vec![-8.0, -16.0]);
    }

    #[test]
    fn test_diag_per_column() {
        let d = vec![1.0, 0.5];
        let input = vec![2.0, 2.0, 4.0, 4.0];
        let mut out = vec![0.0; 4];
        diag(Some(&d), 2, &input, &mut out);
        assert_eq!(out, vec![2.0, 1.0, 4.0, 2.0]);
    }

    #[test]
    fn test_packed_round_trip_is_hermitian() {
        let g = DMatrix::from_row_slice(
            2,
            2,
            &[
                Complex64::new(2.0, 0.0),
                Complex64::new(1.0, 1.0),
                Complex64::new(1.0, -1.0),
                Complex64::new(3.0, 0.0),
            ],
        );
        let packed = pack_upper(&g);
        assert_eq!(packed.len(), 3);
        let h = unpack_hermitian(&packed, 2);
        assert!((h - g).norm() < 1e-15);
    }

    #[test]
    fn test_cholesky_upper_reconstructs() {
        let g = DMatrix::from_row_slice(2, 2, &[4.0, 2.0, 2.0, 3.0]);
        let r = cholesky_upper(&g, "test").unwrap();
        assert!((r.adjoint() * &r - &g).norm() < 1e-12);
        assert_eq!(r[(1, 0)], 0.0);
    }

    #[test]
    fn test_cholesky_detects_rank_deficiency() {
        let g = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 4.0]);
        assert!(cholesky_upper(&g, "test").unwrap_err().is_breakdown());
    }

    #[test]
    fn test_triangular_solves() {
        let r = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 0.0, 4.0]);
        let mut b = DMatrix::from_row_slice(2, 1, &[4.0, 8.0]);
        solve_upper(&r, &mut b);
        assert!((b[(1, 0)] - 2.0).abs() < 1e-15);
        assert!((b[(0, 0)] - 1.0).abs() < 1e-15);

        let mut c = DMatrix::from_row_slice(2, 1, &[2.0, 9.0]);
        solve_upper_adjoint(&r, &mut c);
        assert!((c[(0, 0)] - 1.0).abs() < 1e-15);
        assert!((c[(1, 0)] - 2.0).abs() < 1e-15);
    }

    #[test]
    fn test_right_solve_orthonormalizes() {
        // Columns (1, 1) and (1, -1) scaled; CholQR must make them orthonormal.
        let mut w = vec![2.0, 2.0, 3.0, -3.0];
        let g = gram(&w, &w, 2, 2, 2);
        let r = cholesky_upper(&g, "test").unwrap();
        right_solve_upper(&mut w, 2, &r);
        let q = gram(&w, &w, 2, 2, 2);
        assert!((q - DMatrix::<f64>::identity(2, 2)).norm() < 1e-12);
    }

    #[test]
    fn test_gemm_accumulates() {
        let a = vec![1.0, 0.0, 0.0, 1.0];
        let c = DMatrix::from_row_slice(2, 1, &[3.0, 4.0]);
        let mut y = vec![1.0, 1.0];
        gemm(1.0, &a, 2, &c, &mut y);
        assert_eq!(y, vec![4.0, 5.0]);
    }

    #[test]
    fn test_empty_strips_give_zero_gram() {
        let empty: Vec<f64> = Vec::new();
        let g = gram(&empty, &empty, 0, 3, 3);
        assert_eq!(g, DMatrix::zeros(3, 3));
    }
}
