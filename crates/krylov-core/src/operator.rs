//! Operator collaborators consumed by the solver drivers.
//!
//! An [`Operator`] provides the distributed matrix-vector product, its
//! preconditioner and an optional diagonal scaling used to weight local inner
//! products. A [`ProjectedOperator`] is the richer interface driven by the
//! projected conjugate gradient.

use crate::comm::Communicator;
use crate::error::Result;
use crate::scalar::{Real, Scalar};

/// Part a process takes in a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// Holds local rows and does local work.
    #[default]
    Participant,
    /// Holds no local rows but joins every collective reduction.
    CoordinatorOnly,
}

impl Role {
    /// Local length of a vector for an operator of `dof` unknowns.
    #[inline]
    pub fn local_len(self, dof: usize) -> usize {
        match self {
            Role::Participant => dof,
            Role::CoordinatorOnly => 0,
        }
    }

    #[inline]
    pub fn is_participant(self) -> bool {
        self == Role::Participant
    }
}

/// A distributed linear operator with its preconditioner.
///
/// Multi-vectors passed to these methods hold `mu` columns of local length
/// `dof()` laid out as in [`crate::layout`].
pub trait Operator<K: Scalar> {
    /// Local number of unknowns.
    fn dof(&self) -> usize;

    fn role(&self) -> Role {
        Role::Participant
    }

    /// Key of this operator's entry in the option registry.
    fn prefix(&self) -> &str {
        ""
    }

    /// Matrix-vector product `output = A input`.
    fn gmv(&self, input: &[K], output: &mut [K], mu: usize) -> Result<()>;

    /// Preconditioner application `output = M^{-1} input`.
    ///
    /// `work` is scratch of the same length that the solver may lend.
    fn apply(&self, input: &[K], output: &mut [K], mu: usize, work: Option<&mut [K]>) -> Result<()>;

    /// Diagonal weights of the local inner product (a partition of unity).
    fn scaling(&self) -> Option<&[Real<K>]> {
        None
    }

    /// Prepare distributed state before a solve.
    ///
    /// Returns whether resources were allocated, which is passed back to
    /// [`Operator::end`].
    fn start(&self, _b: &[K], _x: &mut [K], _mu: usize) -> Result<bool> {
        Ok(false)
    }

    /// Release what [`Operator::start`] set up.
    fn end(&self, _allocated: bool) {}
}

/// Representation of the vectors iterated by a projected operator.
#[derive(Debug, Clone, Copy)]
pub enum Scaling<'a, R> {
    /// Primal unknowns weighted by a diagonal partition of unity.
    Diagonal(&'a [R]),
    /// Interface (dual) unknowns shared by two subdomains.
    ///
    /// Local inner products are halved and the iterate lives in a separate
    /// multiplier vector which [`ProjectedOperator::compute_solution`] maps
    /// back to the primal solution.
    Interface,
}

/// Operator interface of the projected conjugate gradient.
pub trait ProjectedOperator<K: Scalar> {
    /// Local number of primal unknowns.
    fn dof(&self) -> usize;

    /// Local number of interface multipliers.
    fn mult(&self) -> usize;

    /// Number of leading primal unknowns eliminated from the iteration.
    fn eliminated(&self) -> usize {
        0
    }

    fn role(&self) -> Role {
        Role::Participant
    }

    fn prefix(&self) -> &str {
        ""
    }

    fn scaling(&self) -> Scaling<'_, Real<K>>;

    /// Length of the vectors iterated on, before the role is taken into account.
    fn iterate_len(&self) -> usize {
        match self.scaling() {
            Scaling::Diagonal(_) => self.dof(),
            Scaling::Interface => self.mult(),
        }
    }

    /// A zeroed iterate-sized vector.
    fn allocate_single(&self) -> Vec<K> {
        vec![K::zero(); self.role().local_len(self.iterate_len())]
    }

    /// Zeroed storage for the residual and, for interface unknowns, the multipliers.
    fn allocate_array(&self) -> (Vec<K>, Option<Vec<K>>) {
        let lambda = match self.scaling() {
            Scaling::Diagonal(_) => None,
            Scaling::Interface => Some(self.allocate_single()),
        };
        (self.allocate_single(), lambda)
    }

    /// Compute the initial projected residual `r` from `f` and `x`.
    fn start(
        &self,
        f: &[K],
        x: &mut [K],
        lambda: Option<&mut [K]>,
        r: &mut [K],
    ) -> Result<bool>;

    /// `z = M r`.
    fn precond(&self, r: &[K], z: &mut [K]) -> Result<()>;

    /// `output = P input`.
    fn project(&self, input: &[K], output: &mut [K]) -> Result<()>;

    /// `r = P^T r`.
    fn project_transpose(&self, r: &mut [K]) -> Result<()>;

    /// `z = F p`.
    fn apply(&self, p: &[K], z: &mut [K]) -> Result<()>;

    /// Global real inner product `<a, b>` in the operator's metric.
    fn compute_dot<C: Communicator>(&self, a: &[K], b: &[K], comm: &C) -> Result<Real<K>>;

    /// Map the iterate back to the primal solution `x`.
    fn compute_solution(&self, source: &[K], x: &mut [K]) -> Result<()>;

    fn end(&self, _allocated: bool) {}
}
