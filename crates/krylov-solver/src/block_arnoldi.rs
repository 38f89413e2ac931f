//! Block Arnoldi process.
//!
//! With block width `d` and restart `m`, block column `i` of the Hessenberg
//! matrix is a `d (m + 1) x d` matrix. As soon as it is complete it is
//! reduced to block upper-triangular form by the Householder reflections of
//! the previous steps followed by a new QR factorization of its `2d x d`
//! diagonal part, which is also applied to the rotated residual block `s`.

use krylov_core::dense::{
    cholesky_upper, col_norms_squared, gemm, gram, pack_upper, right_solve_upper,
    unpack_hermitian,
};
use krylov_core::scalar::real;
use krylov_core::{Communicator, Error, GramSchmidt, Operator, Result, Scalar};
use nalgebra::{DMatrix, Dyn, QR};

use crate::arnoldi::{ArnoldiParams, apply_operator};
use crate::workspace::BlockGmresWorkspace;

/// Hessenberg blocks, Householder factors and rotated residual of one cycle.
pub struct BlockHessenberg<K: Scalar> {
    /// Block width.
    pub d: usize,
    pub h: Vec<DMatrix<K>>,
    pub qr: Vec<QR<K, Dyn, Dyn>>,
    /// Rotated residual, `d (m + 1) x d`.
    pub s: DMatrix<K>,
}

impl<K: Scalar> BlockHessenberg<K> {
    /// Start a cycle whose initial residual block is `V_0 r0`.
    pub fn new(d: usize, m: usize, r0: &DMatrix<K>) -> Self {
        let mut s = DMatrix::zeros(d * (m + 1), d);
        s.view_mut((0, 0), (d, d)).copy_from(r0);
        Self {
            d,
            h: vec![DMatrix::zeros(d * (m + 1), d); m],
            qr: Vec::with_capacity(m),
            s,
        }
    }

    /// Residual norm estimate of block column `k` after `steps` steps.
    pub fn residual(&self, steps: usize, k: usize) -> K::RealField {
        self.s.view((steps * self.d, k), (self.d, 1)).norm()
    }

    /// Block upper-triangular factor of the first `steps` block columns.
    pub fn triangular(&self, steps: usize) -> DMatrix<K> {
        let d = self.d;
        let rows = steps * d;
        let mut r = DMatrix::zeros(rows, rows);
        for (j, hj) in self.h.iter().take(steps).enumerate() {
            let height = (j + 1) * d;
            r.view_mut((0, j * d), (height, d))
                .copy_from(&hj.view((0, 0), (height, d)));
        }
        r
    }
}

/// Extend the block basis by `v[i + 1]` and reduce block column `i`.
///
/// Returns `true` when the new block vanished entirely: the Krylov space is
/// invariant, its block of the Hessenberg matrix is zero and the cycle must
/// end after this step. A block that is only partly rank deficient, with some
/// columns keeping their norm and others losing it to the projection, is
/// reported as [`Error::Breakdown`].
pub fn block_arnoldi<K, O, C>(
    op: &O,
    comm: &C,
    params: &ArnoldiParams,
    ws: &mut BlockGmresWorkspace<K>,
    hess: &mut BlockHessenberg<K>,
    i: usize,
) -> Result<bool>
where
    K: Scalar,
    O: Operator<K> + ?Sized,
    C: Communicator,
{
    let ArnoldiParams { n, m, gs, .. } = *params;
    let d = hess.d;
    let dim = n * d;
    apply_operator(op, params, &mut ws.v, &mut ws.z, &mut ws.ax, i, d)?;

    let (basis, rest) = ws.v.split_at_mut(i + 1);
    let w = &mut rest[0][..dim];
    let before = col_norms_squared(w, n, d);
    let hi = &mut hess.h[i];
    match gs {
        GramSchmidt::Modified => {
            for (k, vk) in basis.iter().enumerate() {
                let vk = &vk[..dim];
                let mut c = gram(vk, w, n, d, d);
                comm.all_reduce_sum(c.as_mut_slice())?;
                gemm(-K::one(), vk, n, &c, w);
                hi.view_mut((k * d, 0), (d, d)).copy_from(&c);
            }
        }
        GramSchmidt::Classical | GramSchmidt::IncompleteClassical => {
            let mut c = DMatrix::zeros((i + 1) * d, d);
            for (k, vk) in basis.iter().enumerate() {
                c.view_mut((k * d, 0), (d, d))
                    .copy_from(&gram(&vk[..dim], w, n, d, d));
            }
            comm.all_reduce_sum(c.as_mut_slice())?;
            let first = if gs == GramSchmidt::Classical { 0 } else { i };
            for (k, vk) in basis.iter().enumerate().skip(first) {
                let ck = c.view((k * d, 0), (d, d)).into_owned();
                gemm(-K::one(), &vk[..dim], n, &ck, w);
            }
            hi.view_mut((0, 0), ((i + 1) * d, d)).copy_from(&c);
        }
    }

    // Norms before projection travel with the Gram matrix.
    let mut packed = pack_upper(&gram(&*w, &*w, n, d, d));
    let tri = packed.len();
    packed.extend(before.into_iter().map(K::from_real));
    comm.all_reduce_sum(&mut packed)?;
    let gw = unpack_hermitian(&packed[..tri], d);
    let threshold = real::<K>(100.0) * K::epsilon();
    let before = &packed[tri..];
    let vanished = (0..d).all(|k| !(gw[(k, k)].real() > threshold * before[k].real()));
    let r = if vanished {
        DMatrix::zeros(d, d)
    } else {
        let r = cholesky_upper(&gw, "block Arnoldi")?;
        for (k, norm) in before.iter().enumerate() {
            if !(r[(k, k)].modulus_squared() > threshold * norm.real()) {
                return Err(Error::Breakdown {
                    stage: "block Arnoldi",
                });
            }
        }
        r
    };
    hi.view_mut(((i + 1) * d, 0), (d, d)).copy_from(&r);
    if i + 1 < m && !vanished {
        right_solve_upper(w, n, &r);
    }

    for (leading, qr) in hess.qr.iter().enumerate() {
        let mut block = hi.view((leading * d, 0), (2 * d, d)).into_owned();
        qr.q_tr_mul(&mut block);
        hi.view_mut((leading * d, 0), (2 * d, d)).copy_from(&block);
    }
    let qr = hi.view((i * d, 0), (2 * d, d)).into_owned().qr();
    hi.view_mut((i * d, 0), (d, d)).copy_from(&qr.r());
    hi.view_mut(((i + 1) * d, 0), (d, d)).fill(K::zero());
    let mut block = hess.s.view((i * d, 0), (2 * d, d)).into_owned();
    qr.q_tr_mul(&mut block);
    hess.s.view_mut((i * d, 0), (2 * d, d)).copy_from(&block);
    hess.qr.push(qr);
    Ok(vanished)
}
