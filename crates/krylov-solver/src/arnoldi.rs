//! Single-vector Arnoldi process for `mu` independent right-hand sides.
//!
//! Column `i` of the Hessenberg matrix of right-hand side `nu` lives in
//! `h[i][k * mu + nu]` for rows `k <= i + 1`. Once rotated, the diagonal
//! holds the triangular factor and the sub-diagonal slot holds the Givens
//! cosine of step `i`; the matching real sine is in `sn[i * mu + nu]`.

use krylov_core::dense::{axpy, dot, nrm2_squared, scal};
use krylov_core::layout::{col, col_mut, split_pair};
use krylov_core::{Communicator, GramSchmidt, Operator, Real, Result, Role, Scalar, Variant};
use nalgebra::ComplexField;
use num_traits::Zero;

use crate::workspace::GmresWorkspace;

/// Shape and flavour of one Arnoldi run.
#[derive(Debug, Clone, Copy)]
pub struct ArnoldiParams {
    pub variant: Variant,
    pub gs: GramSchmidt,
    /// Restart length.
    pub m: usize,
    /// Local rows.
    pub n: usize,
    /// Right-hand sides (or block width).
    pub mu: usize,
    pub role: Role,
}

/// Compute Givens rotation coefficients for `[a; b]` with `b` real.
///
/// Returns `(c, s, r)` such that:
/// ```text
/// [ c* s ] [ a ]   [ r ]
/// [ -s c ] [ b ] = [ 0 ]
/// ```
pub fn givens_rotation<K: Scalar>(a: K, b: Real<K>) -> (K, Real<K>, Real<K>) {
    let r = (a.modulus_squared() + b * b).sqrt();
    if r == Real::<K>::zero() {
        return (K::one(), Real::<K>::zero(), r);
    }
    (a.unscale(r), b / r, r)
}

/// Apply the operator to `v[i]` into `v[i + 1]` according to the variant.
///
/// `Right` lends `v[i + 1]` to the preconditioner as scratch; `Flexible`
/// keeps `M^{-1} v[i]` in `z[i]`.
pub fn apply_operator<K, O>(
    op: &O,
    params: &ArnoldiParams,
    v: &mut [Vec<K>],
    z: &mut [Vec<K>],
    ax: &mut [K],
    i: usize,
    width: usize,
) -> Result<()>
where
    K: Scalar,
    O: Operator<K> + ?Sized,
{
    let dim = params.n * width;
    let participant = params.role.is_participant();
    let (vi, next) = split_pair(v, i, i + 1);
    let (vi, next) = (&vi[..dim], &mut next[..dim]);
    let ax = &mut ax[..dim];
    match params.variant {
        Variant::Left => {
            if participant {
                op.gmv(vi, ax, width)?;
            }
            op.apply(ax, next, width, None)?;
        }
        Variant::Right => {
            op.apply(vi, ax, width, Some(&mut *next))?;
            if participant {
                op.gmv(ax, next, width)?;
            }
        }
        Variant::Flexible => {
            let zi = &mut z[i][..dim];
            op.apply(vi, zi, width, Some(&mut *next))?;
            if participant {
                op.gmv(zi, next, width)?;
            }
        }
    }
    Ok(())
}

/// Extend the basis by `v[i + 1]` and fold column `i` into triangular form.
pub fn arnoldi<K, O, C>(
    op: &O,
    comm: &C,
    params: &ArnoldiParams,
    ws: &mut GmresWorkspace<K>,
    i: usize,
) -> Result<()>
where
    K: Scalar,
    O: Operator<K> + ?Sized,
    C: Communicator,
{
    let ArnoldiParams { n, mu, m, gs, .. } = *params;
    apply_operator(op, params, &mut ws.v, &mut ws.z, &mut ws.ax, i, mu)?;

    let (done, current) = ws.h.split_at_mut(i);
    let hi = &mut current[0];
    {
        let (basis, rest) = ws.v.split_at_mut(i + 1);
        let w = &mut rest[0];
        match gs {
            GramSchmidt::Modified => {
                for (k, vk) in basis.iter().enumerate() {
                    for nu in 0..mu {
                        hi[k * mu + nu] = dot(col(vk, n, nu), col(w, n, nu));
                    }
                    comm.all_reduce_sum(&mut hi[k * mu..(k + 1) * mu])?;
                    for nu in 0..mu {
                        axpy(-hi[k * mu + nu], col(vk, n, nu), col_mut(w, n, nu));
                    }
                }
            }
            GramSchmidt::Classical | GramSchmidt::IncompleteClassical => {
                for (k, vk) in basis.iter().enumerate() {
                    for nu in 0..mu {
                        hi[k * mu + nu] = dot(col(vk, n, nu), col(w, n, nu));
                    }
                }
                comm.all_reduce_sum(&mut hi[..(i + 1) * mu])?;
                let first = if gs == GramSchmidt::Classical { 0 } else { i };
                for (k, vk) in basis.iter().enumerate().skip(first) {
                    for nu in 0..mu {
                        axpy(-hi[k * mu + nu], col(vk, n, nu), col_mut(w, n, nu));
                    }
                }
            }
        }

        let sn = &mut ws.sn[i * mu..(i + 1) * mu];
        for (nu, value) in sn.iter_mut().enumerate() {
            *value = nrm2_squared(col(w, n, nu));
        }
        comm.all_reduce_sum(sn)?;
        for nu in 0..mu {
            let norm = sn[nu].sqrt();
            hi[(i + 1) * mu + nu] = K::from_real(norm);
            if i + 1 < m && norm != Real::<K>::zero() {
                scal(K::from_real(norm.recip()), col_mut(w, n, nu));
            }
        }
    }

    for (k, hk) in done.iter().enumerate() {
        for nu in 0..mu {
            let c = hk[(k + 1) * mu + nu];
            let s = ws.sn[k * mu + nu];
            let upper = hi[k * mu + nu];
            let lower = hi[(k + 1) * mu + nu];
            hi[k * mu + nu] = c.conjugate() * upper + lower.scale(s);
            hi[(k + 1) * mu + nu] = -upper.scale(s) + c * lower;
        }
    }

    for nu in 0..mu {
        let (c, s, delta) = givens_rotation(hi[i * mu + nu], hi[(i + 1) * mu + nu].real());
        ws.sn[i * mu + nu] = s;
        hi[(i + 1) * mu + nu] = c;
        hi[i * mu + nu] = K::from_real(delta);
        let si = ws.s[i * mu + nu];
        ws.s[(i + 1) * mu + nu] = -si.scale(s);
        ws.s[i * mu + nu] = si * c.conjugate();
    }
    Ok(())
}
