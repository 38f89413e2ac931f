//! Scalar fields supported by the solvers.
//!
//! Every algorithm is generic over [`Scalar`], which covers real and complex
//! single and double precision. Norms, tolerances and scaling vectors live in
//! the underlying real field [`Real`].

use nalgebra::ComplexField;
use num_complex::Complex;

/// Penalization threshold used to detect Dirichlet rows in a right-hand side.
pub const PEN: f64 = 1e30;

/// Relative threshold below which a norm is treated as zero.
pub const EPS: f64 = 1e-12;

/// Underlying real type of a scalar field.
pub type Real<K> = <K as ComplexField>::RealField;

/// A real or complex floating-point field.
pub trait Scalar:
    ComplexField<RealField: Copy + Send + Sync + 'static> + Copy + Send + Sync + 'static
{
    /// Whether the field is complex.
    const IS_COMPLEX: bool;

    /// Value of `x` for a penalized row with right-hand side `self`.
    ///
    /// Real fields divide by [`PEN`], complex fields by `PEN + PEN i`.
    fn depenalize(self) -> Self;

    /// Machine epsilon of the underlying real type.
    fn epsilon() -> Real<Self>;
}

/// Convert an `f64` constant into the real field of `K`.
#[inline]
pub fn real<K: Scalar>(value: f64) -> Real<K> {
    nalgebra::convert::<f64, Real<K>>(value)
}

macro_rules! impl_real_scalar {
    ($t:ty) => {
        impl Scalar for $t {
            const IS_COMPLEX: bool = false;

            #[inline]
            fn depenalize(self) -> Self {
                self / PEN as $t
            }

            #[inline]
            fn epsilon() -> $t {
                <$t>::EPSILON
            }
        }
    };
}

macro_rules! impl_complex_scalar {
    ($t:ty) => {
        impl Scalar for Complex<$t> {
            const IS_COMPLEX: bool = true;

            #[inline]
            fn depenalize(self) -> Self {
                self / Complex::new(PEN as $t, PEN as $t)
            }

            #[inline]
            fn epsilon() -> $t {
                <$t>::EPSILON
            }
        }
    };
}

impl_real_scalar!(f32);
impl_real_scalar!(f64);
impl_complex_scalar!(f32);
impl_complex_scalar!(f64);
