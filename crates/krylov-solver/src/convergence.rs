//! Convergence policy shared by the drivers.
//!
//! Each right-hand side column carries a signed counter. It starts at
//! `-budget` while the column is active and becomes the number of Krylov rows
//! that enter its back substitution once the column converges. A column that
//! converged in an earlier restart cycle contributes zero rows.

use std::fmt;

use krylov_core::{KrylovMethod, Real, Scalar};
use num_traits::Zero;

/// Method that actually produced a solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Gmres,
    BlockGmres,
    Cg,
    BlockCg,
    ProjectedCg,
}

impl From<KrylovMethod> for Method {
    fn from(method: KrylovMethod) -> Self {
        match method {
            KrylovMethod::Gmres => Method::Gmres,
            KrylovMethod::BlockGmres => Method::BlockGmres,
            KrylovMethod::Cg => Method::Cg,
            KrylovMethod::BlockCg => Method::BlockCg,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Gmres => "GMRES",
            Method::BlockGmres => "BGMRES",
            Method::Cg => "CG",
            Method::BlockCg => "BCG",
            Method::ProjectedCg => "PCG",
        };
        f.write_str(name)
    }
}

/// Outcome of a solve.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveReport {
    /// Method that ran last, after any rerouting or fallback.
    pub method: Method,
    /// Iterations performed, never more than the budget.
    pub iterations: usize,
    /// Per right-hand side convergence flag.
    pub converged: Vec<bool>,
}

impl SolveReport {
    pub fn new(method: Method, iterations: usize, converged: Vec<bool>) -> Self {
        Self {
            method,
            iterations,
            converged,
        }
    }

    /// Report of a solve that did not iterate.
    pub fn empty(method: Method, mu: usize) -> Self {
        Self::new(method, 0, vec![false; mu])
    }

    pub fn all_converged(&self) -> bool {
        self.converged.iter().all(|&c| c)
    }
}

/// Whether `res` passes the tolerance test against the initial norm `norm`.
///
/// A negative tolerance is an absolute bound on `res`.
#[inline]
pub fn passes<R: nalgebra::RealField + Copy>(res: R, norm: R, tol: R) -> bool {
    if tol < R::zero() {
        res <= -tol
    } else {
        res / norm <= tol
    }
}

/// Per-column convergence bookkeeping of one solve.
#[derive(Debug, Clone)]
pub struct ConvergenceState<K: Scalar> {
    method: Method,
    budget: isize,
    tol: Real<K>,
    verbosity: u8,
    has_converged: Vec<isize>,
    converged: Vec<bool>,
}

impl<K: Scalar> ConvergenceState<K> {
    pub fn new(method: Method, mu: usize, budget: usize, tol: Real<K>, verbosity: u8) -> Self {
        let budget = budget as isize;
        Self {
            method,
            budget,
            tol,
            verbosity,
            has_converged: vec![-budget; mu],
            converged: vec![false; mu],
        }
    }

    #[inline]
    pub fn is_active(&self, nu: usize) -> bool {
        self.has_converged[nu] == -self.budget
    }

    pub fn all_converged(&self) -> bool {
        self.converged.iter().all(|&c| c)
    }

    /// Active column indices.
    pub fn active(&self) -> Vec<usize> {
        (0..self.has_converged.len())
            .filter(|&nu| self.is_active(nu))
            .collect()
    }

    /// Mark every active column whose residual passes at iteration `i`.
    ///
    /// `res(nu)` is the current residual estimate of column `nu`. Returns
    /// whether no active column remains.
    pub fn check(&mut self, i: usize, norm: &[Real<K>], res: impl Fn(usize) -> Real<K>) -> bool {
        for nu in 0..self.has_converged.len() {
            if !self.is_active(nu) {
                continue;
            }
            let r = res(nu);
            if self.verbosity > 2 {
                if self.tol < Real::<K>::zero() {
                    log::debug!("{}: {i:>3} {r} < {}", self.method, -self.tol);
                } else {
                    log::debug!(
                        "{}: {i:>3} {r} {} {} < {}",
                        self.method,
                        norm[nu],
                        r / norm[nu],
                        self.tol
                    );
                }
            }
            if passes(r, norm[nu], self.tol) {
                self.has_converged[nu] = i as isize;
                self.converged[nu] = true;
            }
        }
        self.all_converged()
    }

    /// Block test at step `i`: the columns advance together, so they are
    /// marked converged only when every one of them passes.
    pub fn check_block(
        &mut self,
        i: usize,
        norm: &[Real<K>],
        columns: &[usize],
        res: impl Fn(usize) -> Real<K>,
    ) -> bool {
        let mut all = true;
        for (k, &nu) in columns.iter().enumerate() {
            let r = res(k);
            if self.verbosity > 2 {
                log::debug!("{}: {i:>3} ({nu}) {r} {} < {}", self.method, norm[nu], self.tol);
            }
            all &= passes(r, norm[nu], self.tol);
        }
        if all {
            for &nu in columns {
                self.has_converged[nu] = i as isize;
                self.converged[nu] = true;
            }
        }
        all
    }

    /// Start a new restart cycle.
    ///
    /// Columns converged earlier keep no Krylov rows; the others become active again.
    pub fn restart(&mut self) {
        for (hc, &done) in self.has_converged.iter_mut().zip(&self.converged) {
            *hc = if done { 0 } else { -self.budget };
        }
    }

    /// Close a cycle that built `rows` Krylov rows.
    pub fn finish_cycle(&mut self, rows: usize) {
        for nu in 0..self.has_converged.len() {
            if self.is_active(nu) {
                self.has_converged[nu] = -(rows as isize);
            }
        }
    }

    /// Krylov rows entering the back substitution of column `nu`.
    #[inline]
    pub fn rows(&self, nu: usize) -> usize {
        self.has_converged[nu].unsigned_abs()
    }

    pub fn rows_all(&self) -> Vec<usize> {
        (0..self.has_converged.len()).map(|nu| self.rows(nu)).collect()
    }

    pub fn converged(&self) -> &[bool] {
        &self.converged
    }

    /// Emit the final report and build the solve outcome.
    pub fn finish(self, iterations: usize) -> SolveReport {
        let budget = self.budget as usize;
        let iterations = iterations.min(budget);
        if self.verbosity > 0 {
            if self.all_converged() {
                log::info!(
                    "{} converged in {iterations} iteration{}",
                    self.method,
                    if iterations > 1 { "s" } else { "" }
                );
            } else {
                log::warn!(
                    "{} does not converge after {budget} iteration{}",
                    self.method,
                    if budget > 1 { "s" } else { "" }
                );
            }
        }
        SolveReport::new(self.method, iterations, self.converged)
    }
}

/// Restart notice at verbosity 2 and above.
pub(crate) fn log_restart(method: Method, verbosity: u8, restart: usize) {
    if verbosity > 1 {
        log::info!("{method} restart({restart})");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_and_absolute_tolerance() {
        assert!(passes(1e-7, 1.0, 1e-6));
        assert!(!passes(1e-5, 1.0, 1e-6));
        assert!(passes(1e-3, 1e4, 1e-6));
        assert!(passes(1e-7, 1e4, -1e-6));
        assert!(!passes(1e-5, 1e-9, -1e-6));
    }

    #[test]
    fn test_check_records_iteration() {
        let mut state = ConvergenceState::<f64>::new(Method::Gmres, 2, 10, 1e-6, 0);
        let norm = [1.0, 1.0];
        assert!(!state.check(3, &norm, |nu| if nu == 0 { 1e-8 } else { 1.0 }));
        assert_eq!(state.rows(0), 3);
        assert!(state.is_active(1));
        // Frozen once converged.
        assert!(state.check(5, &norm, |_| 0.0));
        assert_eq!(state.rows(0), 3);
        assert_eq!(state.rows(1), 5);
    }

    #[test]
    fn test_restart_and_finish_cycle() {
        let mut state = ConvergenceState::<f64>::new(Method::Gmres, 2, 10, 1e-6, 0);
        state.check(2, &[1.0, 1.0], |nu| if nu == 0 { 0.0 } else { 1.0 });
        state.finish_cycle(4);
        assert_eq!(state.rows_all(), vec![2, 4]);
        state.restart();
        assert_eq!(state.rows(0), 0);
        assert!(state.is_active(1));
        assert_eq!(state.active(), vec![1]);
    }

    #[test]
    fn test_block_columns_converge_together() {
        let mut state = ConvergenceState::<f64>::new(Method::BlockGmres, 3, 10, 1e-6, 0);
        let norm = [1.0; 3];
        assert!(!state.check_block(1, &norm, &[0, 2], |k| if k == 0 { 0.0 } else { 1.0 }));
        assert!(state.is_active(0));
        assert!(state.check_block(2, &norm, &[0, 2], |_| 1e-9));
        assert_eq!(state.active(), vec![1]);
        assert!(!state.all_converged());
    }

    #[test]
    fn test_finish_caps_iterations() {
        let state = ConvergenceState::<f64>::new(Method::Cg, 1, 4, 1e-6, 1);
        let report = state.finish(7);
        assert_eq!(report.iterations, 4);
        assert!(!report.all_converged());
        assert_eq!(report.method, Method::Cg);
    }
}
