//! Multi-vector layout.
//!
//! A multi-vector of `mu` columns with local length `n` is a single
//! column-major strip of `n * mu` entries: column `nu` occupies
//! `[nu * n, (nu + 1) * n)`. `n == 0` is legal on coordinator-only ranks, so
//! helpers here never rely on `chunks_exact(n)`.

use std::ops::Range;

/// Index range of column `nu`.
#[inline]
pub fn col_range(n: usize, nu: usize) -> Range<usize> {
    nu * n..(nu + 1) * n
}

/// Immutable view of column `nu`.
#[inline]
pub fn col<T>(v: &[T], n: usize, nu: usize) -> &[T] {
    &v[col_range(n, nu)]
}

/// Mutable view of column `nu`.
#[inline]
pub fn col_mut<T>(v: &mut [T], n: usize, nu: usize) -> &mut [T] {
    &mut v[col_range(n, nu)]
}

/// Iterate over the `mu` columns of a multi-vector.
pub fn columns<T>(v: &[T], n: usize, mu: usize) -> impl Iterator<Item = &[T]> {
    (0..mu).map(move |nu| col(v, n, nu))
}

/// Borrow basis vector `i` immutably and vector `j > i` mutably.
///
/// Panics if `i >= j`.
pub fn split_pair<T>(basis: &mut [Vec<T>], i: usize, j: usize) -> (&[T], &mut [T]) {
    assert!(i < j, "split_pair requires i < j");
    let (head, tail) = basis.split_at_mut(j);
    (head[i].as_slice(), tail[0].as_mut_slice())
}

/// Gather selected columns of a multi-vector into a new strip.
pub fn gather<T: Copy>(v: &[T], n: usize, order: &[usize]) -> Vec<T> {
    let mut out = Vec::with_capacity(n * order.len());
    for &nu in order {
        out.extend_from_slice(col(v, n, nu));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_ranges() {
        let v: Vec<i32> = (0..6).collect();
        assert_eq!(col(&v, 3, 0), &[0, 1, 2]);
        assert_eq!(col(&v, 3, 1), &[3, 4, 5]);
        assert_eq!(columns(&v, 2, 3).count(), 3);
    }

    #[test]
    fn test_empty_columns() {
        let v: Vec<f64> = Vec::new();
        assert!(col(&v, 0, 5).is_empty());
        assert_eq!(columns(&v, 0, 4).filter(|c| c.is_empty()).count(), 4);
    }

    #[test]
    fn test_gather_permutes() {
        let v = vec![1, 2, 3, 4, 5, 6];
        assert_eq!(gather(&v, 2, &[2, 0]), vec![5, 6, 1, 2]);
    }

    #[test]
    fn test_split_pair() {
        let mut basis = vec![vec![1.0], vec![2.0], vec![3.0]];
        let (a, b) = split_pair(&mut basis, 0, 2);
        b[0] += a[0];
        assert_eq!(basis[2][0], 4.0);
    }
}
