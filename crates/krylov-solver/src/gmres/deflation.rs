//! Initial deflation of linearly dependent residuals.
//!
//! Right-hand sides whose initial residual is (nearly) a combination of the
//! residuals of other columns need no Krylov space of their own: their
//! correction is the same combination of the corrections of those columns.
//! Selection runs on the replicated Gram matrix, so every rank agrees.

use krylov_core::dense::hermitian_solve;
use krylov_core::scalar::real;
use krylov_core::{Real, Scalar};
use nalgebra::{DMatrix, RealField};
use num_traits::Zero;

/// Outcome of the column selection.
#[derive(Debug, Clone)]
pub struct Selection<K: Scalar> {
    /// Accepted columns first, then the deflated ones, both in input order.
    pub order: Vec<usize>,
    /// Number of accepted columns, the width of the iterated block.
    pub d: usize,
    /// `G_AA^{-1} G_A,dep`, present when some column was deflated.
    pub coupling: Option<DMatrix<K>>,
}

impl<K: Scalar> Selection<K> {
    /// Keep every column.
    pub fn all(columns: &[usize]) -> Self {
        Self {
            order: columns.to_vec(),
            d: columns.len(),
            coupling: None,
        }
    }

    pub fn deflated(&self) -> &[usize] {
        &self.order[self.d..]
    }
}

/// Greedily accept columns of `g` whose residual after projection onto the
/// accepted ones keeps more than `tol` of its norm.
///
/// The first column of `columns` with a nonzero residual is always accepted.
/// The squared threshold never goes below `400 eps`: the Schur complement
/// carries a rounding error of a few `eps g_cc`, and the CholQR of the
/// accepted block rejects pivots under `100 eps`.
pub fn select_columns<K: Scalar>(
    g: &DMatrix<K>,
    columns: &[usize],
    tol: Real<K>,
) -> Selection<K> {
    let threshold = (tol * tol).max(real::<K>(400.0) * K::epsilon());
    let mut accepted: Vec<usize> = Vec::with_capacity(columns.len());
    let mut dependent = Vec::new();
    for &c in columns {
        let diag = g[(c, c)].real();
        let independent = if diag <= Real::<K>::zero() {
            false
        } else if accepted.is_empty() {
            true
        } else {
            match schur_complement(g, &accepted, c) {
                Some(schur) => schur > threshold * diag,
                None => false,
            }
        };
        if independent {
            accepted.push(c);
        } else {
            dependent.push(c);
        }
    }
    if accepted.is_empty() {
        return Selection::all(columns);
    }

    let d = accepted.len();
    let coupling = if dependent.is_empty() {
        None
    } else {
        let g_aa = g.select_rows(&accepted).select_columns(&accepted);
        let mut t = g.select_rows(&accepted).select_columns(&dependent);
        match hermitian_solve(&g_aa, &mut t, "deflation") {
            Ok(()) => Some(t),
            Err(_) => return Selection::all(columns),
        }
    };
    let mut order = accepted;
    order.extend(dependent);
    Selection { order, d, coupling }
}

/// `g_cc - g_Ac^H G_AA^{-1} g_Ac`.
fn schur_complement<K: Scalar>(g: &DMatrix<K>, accepted: &[usize], c: usize) -> Option<Real<K>> {
    let g_aa = g.select_rows(accepted).select_columns(accepted);
    let g_ac = g.select_rows(accepted).select_columns(&[c]);
    let mut y = g_ac.clone();
    hermitian_solve(&g_aa, &mut y, "deflation").ok()?;
    let projected = (g_ac.adjoint() * y)[(0, 0)].real();
    Some(g[(c, c)].real() - projected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use krylov_core::dense::gram;

    fn strip(columns: &[[f64; 3]]) -> Vec<f64> {
        columns.iter().flatten().copied().collect()
    }

    #[test]
    fn test_dependent_column_is_deflated() {
        let r = strip(&[[1.0, 0.0, 1.0], [0.0, 1.0, 1.0], [2.0, 0.0, 2.0]]);
        let g = gram(&r, &r, 3, 3, 3);
        let selection = select_columns(&g, &[0, 1, 2], 1e-6);
        assert_eq!(selection.order, vec![0, 1, 2]);
        assert_eq!(selection.d, 2);
        let t = selection.coupling.unwrap();
        assert!((t[(0, 0)] - 2.0).abs() < 1e-12);
        assert!(t[(1, 0)].abs() < 1e-12);
    }

    #[test]
    fn test_selection_ignores_column_position() {
        let r = strip(&[[1.0, 0.0, 1.0], [2.0, 0.0, 2.0], [0.0, 1.0, 1.0]]);
        let g = gram(&r, &r, 3, 3, 3);
        let selection = select_columns(&g, &[0, 1, 2], 1e-6);
        assert_eq!(selection.order, vec![0, 2, 1]);
        assert_eq!(selection.deflated(), &[1]);
    }

    #[test]
    fn test_independent_columns_are_kept() {
        let r = strip(&[[1.0, 0.0, 0.0], [1.0, 1e-3, 0.0]]);
        let g = gram(&r, &r, 3, 2, 2);
        let selection = select_columns(&g, &[0, 1], 1e-6);
        assert_eq!(selection.d, 2);
        assert!(selection.coupling.is_none());
    }

    #[test]
    fn test_tolerance_below_rounding_still_deflates() {
        // off the span of the first two columns by 1e-9 only
        let r = strip(&[[1.0, 0.0, 1.0], [0.0, 1.0, 1.0], [2.0, -1.0, 1.0 + 1e-9]]);
        let g = gram(&r, &r, 3, 3, 3);
        let selection = select_columns(&g, &[0, 1, 2], 1e-12);
        assert_eq!(selection.d, 2);
        assert_eq!(selection.deflated(), &[2]);
        let t = selection.coupling.unwrap();
        assert!((t[(0, 0)] - 2.0).abs() < 1e-6);
        assert!((t[(1, 0)] + 1.0).abs() < 1e-6);
    }
}
