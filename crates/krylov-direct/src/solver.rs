//! Direct-solver interface and its faer sparse LU implementation.

use faer::prelude::*;
use faer::sparse::linalg::solvers::Lu;
use faer::sparse::{SparseColMat, Triplet};
use krylov_core::Scalar;
use num_complex::Complex64;

use crate::csr::MatrixCsr;
use crate::error::{DirectError, Result};

/// Layout of the solution and right-hand side across ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Distribution {
    /// Replicated on every rank.
    #[default]
    NonDistributed,
    /// Solution distributed, right-hand side replicated.
    DistributedSol,
    /// Both distributed.
    DistributedSolAndRhs,
}

/// Factorize once, then solve for any number of right-hand sides.
pub trait DirectSolver<K> {
    /// Numerical factorization of `matrix`.
    fn numfact(&mut self, matrix: &MatrixCsr<K>) -> Result<()>;

    /// Overwrite `rhs` with the solution.
    fn solve(&self, rhs: &mut [K]) -> Result<()>;

    /// Solve for `count` right-hand sides stored one after the other.
    fn solve_many(&self, rhs: &mut [K], count: usize) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        if rhs.len() % count != 0 {
            return Err(DirectError::DimensionMismatch {
                expected: count * (rhs.len() / count),
                actual: rhs.len(),
            });
        }
        let n = rhs.len() / count;
        rhs.chunks_mut(n).try_for_each(|column| self.solve(column))
    }

    /// Negotiate the distribution; returns the one actually used.
    fn initialize(&mut self, distribution: Distribution) -> Distribution;
}

/// Scalars faer can factorize.
pub trait FaerScalar: Scalar {
    type Factors;

    fn factorize(n: usize, triplets: &[(usize, usize, Self)]) -> Result<Self::Factors>;

    fn solve_with(factors: &Self::Factors, rhs: &mut [Self]) -> Result<()>;
}

impl FaerScalar for f64 {
    type Factors = Lu<usize, f64>;

    fn factorize(n: usize, triplets: &[(usize, usize, f64)]) -> Result<Self::Factors> {
        let faer_triplets: Vec<_> = triplets
            .iter()
            .map(|&(r, c, v)| Triplet::new(r, c, v))
            .collect();
        let sparse_mat = SparseColMat::<usize, f64>::try_new_from_triplets(n, n, &faer_triplets)
            .map_err(|e| DirectError::Backend(format!("Failed to build sparse matrix: {:?}", e)))?;
        sparse_mat.sp_lu().map_err(|_| DirectError::Singular)
    }

    fn solve_with(factors: &Self::Factors, rhs: &mut [f64]) -> Result<()> {
        let b = Col::<f64>::from_fn(rhs.len(), |i| rhs[i]);
        let x = factors.solve(&b);
        for (i, out) in rhs.iter_mut().enumerate() {
            let v = x[i];
            if !v.is_finite() {
                return Err(DirectError::Singular);
            }
            *out = v;
        }
        Ok(())
    }
}

impl FaerScalar for Complex64 {
    type Factors = Lu<usize, c64>;

    fn factorize(n: usize, triplets: &[(usize, usize, Complex64)]) -> Result<Self::Factors> {
        let faer_triplets: Vec<_> = triplets
            .iter()
            .map(|&(r, c, v)| Triplet::new(r, c, c64::new(v.re, v.im)))
            .collect();
        let sparse_mat = SparseColMat::<usize, c64>::try_new_from_triplets(n, n, &faer_triplets)
            .map_err(|e| DirectError::Backend(format!("Failed to build sparse matrix: {:?}", e)))?;
        sparse_mat.sp_lu().map_err(|_| DirectError::Singular)
    }

    fn solve_with(factors: &Self::Factors, rhs: &mut [Complex64]) -> Result<()> {
        let b = Col::<c64>::from_fn(rhs.len(), |i| c64::new(rhs[i].re, rhs[i].im));
        let x = factors.solve(&b);
        for (i, out) in rhs.iter_mut().enumerate() {
            let v = x[i];
            if !(v.re.is_finite() && v.im.is_finite()) {
                return Err(DirectError::Singular);
            }
            *out = Complex64::new(v.re, v.im);
        }
        Ok(())
    }
}

/// Sparse LU from faer.
///
/// The first [`DirectSolver::numfact`] factorizes; later calls keep the
/// existing factors until [`FaerDirect::reset`]. Symmetric matrices are
/// expanded to full storage before factorization.
pub struct FaerDirect<K: FaerScalar> {
    factors: Option<K::Factors>,
    n: usize,
    distribution: Distribution,
}

impl<K: FaerScalar> FaerDirect<K> {
    pub fn new() -> Self {
        Self {
            factors: None,
            n: 0,
            distribution: Distribution::NonDistributed,
        }
    }

    pub fn is_factorized(&self) -> bool {
        self.factors.is_some()
    }

    /// Drop the factors so that the next `numfact` factorizes again.
    pub fn reset(&mut self) {
        self.factors = None;
        self.n = 0;
    }

    pub fn distribution(&self) -> Distribution {
        self.distribution
    }
}

impl<K: FaerScalar> Default for FaerDirect<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: FaerScalar> DirectSolver<K> for FaerDirect<K> {
    fn numfact(&mut self, matrix: &MatrixCsr<K>) -> Result<()> {
        if self.factors.is_some() {
            log::debug!("matrix already factorized, keeping the existing factors");
            return Ok(());
        }
        let full = matrix.expand_symmetric();
        let factors = K::factorize(full.n(), &full.triplets())?;
        log::debug!(
            "factorized sparse matrix of order {} with {} nonzeros",
            full.n(),
            full.nnz()
        );
        self.factors = Some(factors);
        self.n = full.n();
        Ok(())
    }

    fn solve(&self, rhs: &mut [K]) -> Result<()> {
        let factors = self.factors.as_ref().ok_or(DirectError::NotFactorized)?;
        if rhs.len() != self.n {
            return Err(DirectError::DimensionMismatch {
                expected: self.n,
                actual: rhs.len(),
            });
        }
        K::solve_with(factors, rhs)
    }

    fn initialize(&mut self, distribution: Distribution) -> Distribution {
        if distribution != Distribution::NonDistributed {
            log::warn!(
                "only non distributed solution and right-hand side are supported, forcing {:?}",
                Distribution::NonDistributed
            );
        }
        self.distribution = Distribution::NonDistributed;
        self.distribution
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    fn general() -> MatrixCsr<f64> {
        let dense = DMatrix::from_row_slice(3, 3, &[4.0, -1.0, 0.0, 2.0, 5.0, 1.0, 0.0, -3.0, 6.0]);
        MatrixCsr::from_dense(&dense, false).unwrap()
    }

    #[test]
    fn test_solve_before_numfact_fails() {
        let solver = FaerDirect::<f64>::new();
        let mut rhs = vec![1.0; 3];
        assert!(matches!(solver.solve(&mut rhs), Err(DirectError::NotFactorized)));
    }

    #[test]
    fn test_general_solve_recovers_rhs() {
        let matrix = general();
        let mut solver = FaerDirect::new();
        solver.numfact(&matrix).unwrap();
        let x = [1.0, -2.0, 0.5];
        let mut rhs = vec![0.0; 3];
        matrix.multiply(&x, &mut rhs).unwrap();
        solver.solve(&mut rhs).unwrap();
        for (a, b) in rhs.iter().zip(&x) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_symmetric_lower_storage() {
        let matrix = MatrixCsr::new(
            3,
            vec![0, 1, 3, 5],
            vec![0, 0, 1, 1, 2],
            vec![4.0, 1.0, 5.0, 2.0, 6.0],
            true,
        )
        .unwrap();
        let mut solver = FaerDirect::new();
        solver.numfact(&matrix).unwrap();
        let x = [1.0, 2.0, 3.0, -1.0, 0.0, 1.0];
        let mut rhs = vec![0.0; 6];
        for (rhs, x) in rhs.chunks_mut(3).zip(x.chunks(3)) {
            matrix.multiply(x, rhs).unwrap();
        }
        solver.solve_many(&mut rhs, 2).unwrap();
        for (a, b) in rhs.iter().zip(&x) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_complex_solve() {
        let dense = DMatrix::from_fn(4, 4, |i, j| match i.abs_diff(j) {
            0 => Complex64::new(3.0, 1.0),
            1 => Complex64::new(0.0, -1.0),
            _ => Complex64::new(0.0, 0.0),
        });
        let matrix = MatrixCsr::from_dense(&dense, false).unwrap();
        let mut solver = FaerDirect::new();
        solver.numfact(&matrix).unwrap();
        let x: Vec<Complex64> = (0..4).map(|i| Complex64::new(i as f64, 1.0)).collect();
        let mut rhs = vec![Complex64::new(0.0, 0.0); 4];
        matrix.multiply(&x, &mut rhs).unwrap();
        solver.solve(&mut rhs).unwrap();
        for (a, b) in rhs.iter().zip(&x) {
            assert!((a - b).norm() < 1e-12);
        }
    }

    #[test]
    fn test_distribution_is_forced() {
        let mut solver = FaerDirect::<f64>::new();
        assert_eq!(
            solver.initialize(Distribution::DistributedSolAndRhs),
            Distribution::NonDistributed
        );
        assert_eq!(solver.distribution(), Distribution::NonDistributed);
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut solver = FaerDirect::new();
        solver.numfact(&general()).unwrap();
        let mut rhs = vec![1.0; 4];
        assert!(matches!(
            solver.solve(&mut rhs),
            Err(DirectError::DimensionMismatch { expected: 3, actual: 4 })
        ));
    }
}
