//! Per-solve workspaces and the operator session guard.
//!
//! Each driver builds its workspace once per call. Buffers are owned and
//! released when the workspace goes out of scope, including on the early
//! returns that switch to a fallback method.

use krylov_core::{Real, Scalar};
use nalgebra::DMatrix;
use num_traits::Zero;

/// Brackets a solve between `start` and `end` of the operator.
///
/// `end` runs exactly once, when the session is dropped.
pub struct Session<F: FnOnce(bool)> {
    allocated: bool,
    end: Option<F>,
}

impl<F: FnOnce(bool)> Session<F> {
    pub fn new(allocated: bool, end: F) -> Self {
        Self {
            allocated,
            end: Some(end),
        }
    }
}

impl<F: FnOnce(bool)> Drop for Session<F> {
    fn drop(&mut self) {
        if let Some(end) = self.end.take() {
            end(self.allocated);
        }
    }
}

/// Storage of restarted GMRES.
///
/// With `n` local rows, `mu` right-hand sides and restart `m`:
/// - `v`: `m + 1` basis vectors of `n * mu`
/// - `z`: `m` preconditioned vectors of `n * mu` (flexible variant only)
/// - `h`: `m` Hessenberg columns of `mu * (m + 1)`
/// - `s`: rotated residual of `mu * (m + 1)`
/// - `sn`: Givens sines of `mu * (m + 1)`
/// - `ax`: scratch of `n * mu`
pub struct GmresWorkspace<K: Scalar> {
    pub v: Vec<Vec<K>>,
    pub z: Vec<Vec<K>>,
    pub h: Vec<Vec<K>>,
    pub s: Vec<K>,
    pub sn: Vec<Real<K>>,
    pub ax: Vec<K>,
}

impl<K: Scalar> GmresWorkspace<K> {
    pub fn new(n: usize, mu: usize, m: usize, flexible: bool) -> Self {
        let dim = n * mu;
        Self {
            v: vec![vec![K::zero(); dim]; m + 1],
            z: if flexible {
                vec![vec![K::zero(); dim]; m]
            } else {
                Vec::new()
            },
            h: vec![vec![K::zero(); mu * (m + 1)]; m],
            s: vec![K::zero(); mu * (m + 1)],
            sn: vec![Real::<K>::zero(); mu * (m + 1)],
            ax: vec![K::zero(); dim],
        }
    }
}

/// Storage of Block-GMRES for a block of width at most `mu`.
///
/// - `v`: `m + 1` block basis vectors of `n * mu` (the first `n * d` used)
/// - `z`: `m` preconditioned blocks (flexible variant only)
/// - `r`: full residual block of `n * mu`
/// - `ax`: scratch of `n * mu`
///
/// Hessenberg blocks, Householder factors and the rotated residual are sized
/// per cycle by [`crate::block_arnoldi::BlockHessenberg`].
pub struct BlockGmresWorkspace<K: Scalar> {
    pub v: Vec<Vec<K>>,
    pub z: Vec<Vec<K>>,
    pub r: Vec<K>,
    pub ax: Vec<K>,
}

impl<K: Scalar> BlockGmresWorkspace<K> {
    pub fn new(n: usize, mu: usize, m: usize, flexible: bool) -> Self {
        let dim = n * mu;
        Self {
            v: vec![vec![K::zero(); dim]; m + 1],
            z: if flexible {
                vec![vec![K::zero(); dim]; m]
            } else {
                Vec::new()
            },
            r: vec![K::zero(); dim],
            ax: vec![K::zero(); dim],
        }
    }
}

/// Storage of CG on `mu` columns.
///
/// - `r`, `z`, `p`, `trash`: `n * mu` each
/// - `directions`, `images`: one `n * mu` entry per iteration, kept only with
///   re-orthogonalization (`directions`) or the flexible variant (both)
/// - `denominators`: `mu` entries per stored direction
pub struct CgWorkspace<K: Scalar> {
    pub r: Vec<K>,
    pub z: Vec<K>,
    pub p: Vec<K>,
    pub trash: Vec<K>,
    pub directions: Vec<Vec<K>>,
    pub images: Vec<Vec<K>>,
    pub denominators: Vec<Vec<Real<K>>>,
}

impl<K: Scalar> CgWorkspace<K> {
    pub fn new(n: usize, mu: usize, history: usize) -> Self {
        let dim = n * mu;
        Self {
            r: vec![K::zero(); dim],
            z: vec![K::zero(); dim],
            p: vec![K::zero(); dim],
            trash: vec![K::zero(); dim],
            directions: Vec::with_capacity(history),
            images: Vec::with_capacity(history),
            denominators: Vec::with_capacity(history),
        }
    }
}

/// Storage of Block-CG.
///
/// - `r`, `z`, `p`, `trash`: `n * mu` each
/// - `rho`, `step`, `gamma`: `mu x mu`
pub struct BcgWorkspace<K: Scalar> {
    pub r: Vec<K>,
    pub z: Vec<K>,
    pub p: Vec<K>,
    pub trash: Vec<K>,
    pub rho: DMatrix<K>,
    pub step: DMatrix<K>,
    pub gamma: DMatrix<K>,
}

impl<K: Scalar> BcgWorkspace<K> {
    pub fn new(n: usize, mu: usize) -> Self {
        let dim = n * mu;
        Self {
            r: vec![K::zero(); dim],
            z: vec![K::zero(); dim],
            p: vec![K::zero(); dim],
            trash: vec![K::zero(); dim],
            rho: DMatrix::zeros(mu, mu),
            step: DMatrix::zeros(mu, mu),
            gamma: DMatrix::zeros(mu, mu),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_session_ends_once() {
        let calls = Cell::new(0);
        {
            let _session = Session::new(true, |allocated| {
                assert!(allocated);
                calls.set(calls.get() + 1);
            });
        }
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_gmres_workspace_sizes() {
        let ws = GmresWorkspace::<f64>::new(5, 2, 3, true);
        assert_eq!(ws.v.len(), 4);
        assert_eq!(ws.z.len(), 3);
        assert!(ws.v.iter().all(|v| v.len() == 10));
        assert!(ws.h.iter().all(|h| h.len() == 8));
        assert_eq!(ws.s.len(), 8);
    }

    #[test]
    fn test_coordinator_workspace_is_empty() {
        let ws = CgWorkspace::<f64>::new(0, 3, 0);
        assert!(ws.r.is_empty() && ws.p.is_empty());
    }
}
