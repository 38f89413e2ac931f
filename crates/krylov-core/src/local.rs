//! Single-process operators and preconditioners.
//!
//! These back the solver tests and benchmarks, and serve as the local part of
//! an operator whose rows are already split across ranks (a block-diagonal
//! matrix needs no halo exchange).

use nalgebra::DMatrix;

use crate::error::{Result, check_len};
use crate::layout::{col, col_mut};
use crate::operator::{Operator, Role};
use crate::scalar::{Real, Scalar};

/// An approximate inverse `M^{-1}` of the local matrix.
pub trait Preconditioner<K: Scalar>: Send + Sync {
    /// Apply the preconditioner: y = M^(-1) * x.
    fn apply(&self, x: &[K], y: &mut [K]);

    /// Dimension of the preconditioner.
    fn dim(&self) -> usize;
}

// ============================================================================
// Jacobi (Diagonal) Preconditioner
// ============================================================================

/// Jacobi preconditioner `M = diag(A)`.
///
/// Zero diagonal entries are treated as 1.
#[derive(Debug, Clone)]
pub struct JacobiPreconditioner<K> {
    inv_diag: Vec<K>,
}

impl<K: Scalar> JacobiPreconditioner<K> {
    pub fn from_diagonal(diag: &[K]) -> Self {
        let inv_diag = diag
            .iter()
            .map(|&d| if d == K::zero() { K::one() } else { K::one() / d })
            .collect();
        Self { inv_diag }
    }

    pub fn from_matrix(a: &DMatrix<K>) -> Self {
        let diag: Vec<K> = a.diagonal().iter().copied().collect();
        Self::from_diagonal(&diag)
    }
}

impl<K: Scalar> Preconditioner<K> for JacobiPreconditioner<K> {
    fn apply(&self, x: &[K], y: &mut [K]) {
        for ((yi, &xi), &inv) in y.iter_mut().zip(x).zip(&self.inv_diag) {
            *yi = xi * inv;
        }
    }

    fn dim(&self) -> usize {
        self.inv_diag.len()
    }
}

// ============================================================================
// Identity Preconditioner (no preconditioning)
// ============================================================================

/// Identity preconditioner (no-op).
#[derive(Debug, Clone, Copy)]
pub struct IdentityPreconditioner {
    size: usize,
}

impl IdentityPreconditioner {
    pub fn new(size: usize) -> Self {
        Self { size }
    }
}

impl<K: Scalar> Preconditioner<K> for IdentityPreconditioner {
    fn apply(&self, x: &[K], y: &mut [K]) {
        y.copy_from_slice(x);
    }

    fn dim(&self) -> usize {
        self.size
    }
}

/// Dense local matrix with a preconditioner.
pub struct DenseOperator<K: Scalar, P> {
    matrix: DMatrix<K>,
    precond: P,
    scaling: Option<Vec<Real<K>>>,
    role: Role,
    prefix: String,
}

impl<K: Scalar> DenseOperator<K, IdentityPreconditioner> {
    /// Unpreconditioned operator.
    pub fn new(matrix: DMatrix<K>) -> Self {
        let n = matrix.nrows();
        Self::with_preconditioner(matrix, IdentityPreconditioner::new(n))
    }

    /// Diagonal operator `diag(values)`.
    pub fn diagonal(values: &[K]) -> Self {
        Self::new(DMatrix::from_diagonal(&nalgebra::DVector::from_column_slice(values)))
    }
}

impl<K: Scalar, P: Preconditioner<K>> DenseOperator<K, P> {
    pub fn with_preconditioner(matrix: DMatrix<K>, precond: P) -> Self {
        Self {
            matrix,
            precond,
            scaling: None,
            role: Role::Participant,
            prefix: String::new(),
        }
    }

    pub fn with_scaling(mut self, scaling: Vec<Real<K>>) -> Self {
        self.scaling = Some(scaling);
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn matrix(&self) -> &DMatrix<K> {
        &self.matrix
    }
}

impl<K: Scalar, P: Preconditioner<K>> Operator<K> for DenseOperator<K, P> {
    fn dof(&self) -> usize {
        self.matrix.nrows()
    }

    fn role(&self) -> Role {
        self.role
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn gmv(&self, input: &[K], output: &mut [K], mu: usize) -> Result<()> {
        let n = self.matrix.nrows();
        check_len(n * mu, input.len())?;
        check_len(n * mu, output.len())?;
        for nu in 0..mu {
            let x = col(input, n, nu);
            let y = col_mut(output, n, nu);
            for (i, yi) in y.iter_mut().enumerate() {
                *yi = self
                    .matrix
                    .row(i)
                    .iter()
                    .zip(x)
                    .fold(K::zero(), |acc, (&a, &b)| acc + a * b);
            }
        }
        Ok(())
    }

    fn apply(
        &self,
        input: &[K],
        output: &mut [K],
        mu: usize,
        _work: Option<&mut [K]>,
    ) -> Result<()> {
        let n = input.len() / mu.max(1);
        check_len(input.len(), output.len())?;
        for nu in 0..mu {
            self.precond.apply(col(input, n, nu), col_mut(output, n, nu));
        }
        Ok(())
    }

    fn scaling(&self) -> Option<&[Real<K>]> {
        self.scaling.as_deref()
    }
}
