//! Projected preconditioned conjugate gradient.
//!
//! Iterates on the range of a projection supplied by a
//! [`ProjectedOperator`]. Conjugacy is enforced against every earlier
//! direction, so the direction and image histories grow by one vector per
//! iteration until the solve returns.

use krylov_core::dense::{axpy, diag, diag_in_place, dot};
use krylov_core::scalar::real;
use krylov_core::{
    Communicator, Error, Options, ProjectedOperator, Real, Result, Scalar, Scaling,
};
use nalgebra::ComplexField;

use crate::convergence::{ConvergenceState, Method, SolveReport};
use crate::gmres::guard;
use crate::workspace::Session;

/// Solve the projected system of `op` for a single right-hand side `f`.
///
/// With [`Scaling::Diagonal`] the iterate is `x` past the eliminated
/// unknowns; with [`Scaling::Interface`] it is the multiplier vector, mapped
/// to `x` by [`ProjectedOperator::compute_solution`] at the end.
pub fn pcg<K, O, C>(
    op: &O,
    f: &[K],
    x: &mut [K],
    comm: &C,
    options: &Options,
) -> Result<SolveReport>
where
    K: Scalar,
    O: ProjectedOperator<K> + ?Sized,
    C: Communicator,
{
    let config = options.get(op.prefix());
    let it = config.max_it;
    let role = op.role();
    let participant = role.is_participant();
    let scaling = op.scaling();
    let n = role.local_len(op.iterate_len());
    let offset = match scaling {
        Scaling::Diagonal(_) if participant => op.eliminated(),
        _ => 0,
    };
    let required = match scaling {
        Scaling::Diagonal(_) => offset + n,
        Scaling::Interface => role.local_len(op.dof()),
    };
    if x.len() < required {
        return Err(Error::DimensionMismatch {
            expected: required,
            actual: x.len(),
        });
    }
    if it == 0 {
        return Ok(SolveReport::empty(Method::ProjectedCg, 1));
    }

    let (mut r, mut lambda) = op.allocate_array();
    let allocated = match scaling {
        Scaling::Diagonal(_) => op.start(f, &mut x[offset..offset + n], None, &mut r)?,
        Scaling::Interface => op.start(f, x, lambda.as_deref_mut(), &mut r)?,
    };
    let _session = Session::new(allocated, |allocated| op.end(allocated));
    let mut state = ConvergenceState::<K>::new(
        Method::ProjectedCg,
        1,
        it,
        real::<K>(config.tol),
        config.verbosity,
    );

    // z[..i - 1] holds the images of the earlier directions, z[i - 1] the
    // preconditioned residual.
    let mut z = Vec::with_capacity(it + 1);
    z.push(op.allocate_single());
    if participant {
        op.precond(&r, &mut z[0])?;
    }
    let res_init = guard(op.compute_dot(&z[0], &z[0], comm)?.sqrt());

    let mut p = Vec::with_capacity(it);
    p.push(op.allocate_single());
    let mut denominators: Vec<K> = Vec::with_capacity(it);
    let mut i = 1;
    while i <= it {
        let (images, current) = z.split_at_mut(i - 1);
        let zc = &mut current[0];
        let (directions, current) = p.split_at_mut(i - 1);
        let pi = &mut current[0];

        op.project(zc, pi)?;
        let mut coef: Vec<K> = images.iter().map(|zk| local_dot(scaling, zk, pi)).collect();
        comm.all_reduce_sum(&mut coef)?;
        for ((c, pk), &denom) in coef.iter().zip(directions.iter()).zip(&denominators) {
            if denom != K::zero() {
                axpy(-*c / denom, pk, pi);
            }
        }
        if participant {
            op.apply(pi, zc)?;
        }

        let mut next = op.allocate_single();
        let mut a = match scaling {
            Scaling::Diagonal(d) => {
                diag(Some(d), n, pi, &mut next);
                [dot(zc, &next), dot(&r, &next)]
            }
            Scaling::Interface => [local_dot(scaling, zc, pi), local_dot(scaling, &r, pi)],
        };
        comm.all_reduce_sum(&mut a)?;
        denominators.push(a[0]);
        let step = if a[0] == K::zero() { K::zero() } else { a[1] / a[0] };
        match (scaling, lambda.as_mut()) {
            (Scaling::Interface, Some(lambda)) => axpy(step, pi, lambda),
            _ => axpy(step, pi, &mut x[offset..offset + n]),
        }
        axpy(-step, zc, &mut r);
        op.project_transpose(&mut r)?;

        if participant {
            op.precond(&r, &mut next)?;
        }
        z.push(next);
        let residual = z[i].as_slice();
        let res: Real<K> = op.compute_dot(residual, residual, comm)?.sqrt();
        if state.check(i, &[res_init], |_| res) {
            break;
        }
        i += 1;
        p.push(op.allocate_single());
        if let Scaling::Diagonal(d) = scaling {
            diag_in_place(Some(d), n, &mut z[i - 2]);
        }
    }
    let report = state.finish(i);

    match scaling {
        Scaling::Diagonal(_) => op.compute_solution(f, x)?,
        Scaling::Interface => {
            let lambda = lambda.as_deref().ok_or_else(|| {
                Error::Operator("interface operator allocated no multiplier vector".into())
            })?;
            op.compute_solution(lambda, x)?;
        }
    }
    Ok(report)
}

/// Local dot product; interface unknowns are shared by two subdomains, so
/// their contribution is halved.
fn local_dot<K: Scalar>(scaling: Scaling<'_, Real<K>>, a: &[K], b: &[K]) -> K {
    let value = dot(a, b);
    match scaling {
        Scaling::Diagonal(_) => value,
        Scaling::Interface => value.unscale(real::<K>(2.0)),
    }
}
