//! Sparse operator whose preconditioner is an exact direct solve.

use krylov_core::error::check_len;
use krylov_core::layout::{col, col_mut};
use krylov_core::{Operator, Role};

use crate::csr::MatrixCsr;
use crate::error::Result;
use crate::solver::{DirectSolver, FaerDirect, FaerScalar};

/// CSR operator, optionally preconditioned by the LU factors of another
/// matrix (or of itself).
pub struct DirectOperator<K: FaerScalar> {
    matrix: MatrixCsr<K>,
    solver: Option<FaerDirect<K>>,
    role: Role,
    prefix: String,
}

impl<K: FaerScalar> DirectOperator<K> {
    /// Unpreconditioned operator.
    pub fn new(matrix: MatrixCsr<K>) -> Self {
        Self {
            matrix,
            solver: None,
            role: Role::Participant,
            prefix: String::new(),
        }
    }

    /// Precondition with the factors of `approximation`.
    pub fn with_preconditioner(mut self, approximation: &MatrixCsr<K>) -> Result<Self> {
        let mut solver = FaerDirect::new();
        solver.numfact(approximation)?;
        self.solver = Some(solver);
        Ok(self)
    }

    /// Precondition with the factors of the operator itself.
    pub fn exact(matrix: MatrixCsr<K>) -> Result<Self> {
        let approximation = matrix.clone();
        Self::new(matrix).with_preconditioner(&approximation)
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn matrix(&self) -> &MatrixCsr<K> {
        &self.matrix
    }
}

impl<K: FaerScalar> Operator<K> for DirectOperator<K> {
    fn dof(&self) -> usize {
        self.matrix.n()
    }

    fn role(&self) -> Role {
        self.role
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn gmv(&self, input: &[K], output: &mut [K], mu: usize) -> krylov_core::Result<()> {
        let n = self.matrix.n();
        check_len(n * mu, input.len())?;
        check_len(n * mu, output.len())?;
        for nu in 0..mu {
            self.matrix.multiply(col(input, n, nu), col_mut(output, n, nu))?;
        }
        Ok(())
    }

    fn apply(
        &self,
        input: &[K],
        output: &mut [K],
        mu: usize,
        _work: Option<&mut [K]>,
    ) -> krylov_core::Result<()> {
        check_len(input.len(), output.len())?;
        output.copy_from_slice(input);
        match &self.solver {
            Some(solver) if !output.is_empty() => Ok(solver.solve_many(output, mu)?),
            _ => Ok(()),
        }
    }
}
