//! Typed affine transforms between coordinate systems.
//!
//! The main type provided by this module is [`AffineTransform`], a 4×4 double-precision affine
//! matrix that is generic over the [`CoordinateSystem`] it maps out of and the one it maps into.
//! Chaining transforms only compiles when the systems line up, which is what keeps the
//! globe↔render-world derivations in [`crate::anchor`] honest.
//!
//! Unlike rigid-body transforms, these may carry scale and shear: engine render worlds are rarely
//! in metres, and a parent dataset may be placed with an arbitrary linear transform.

use crate::error::AnchorError;
use crate::{CoordinateSystem, Matrix3, Matrix4, Point3, Vector3};
use std::fmt;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;
use std::ops::Mul;

#[cfg(any(test, feature = "approx"))]
use approx::{AbsDiffEq, RelativeEq};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of doubles in the persisted layout of an [`AffineTransform`].
pub const MATRIX_LEN: usize = 16;

/// An affine transform that maps points in `From` to points in `To`.
///
/// Invariants, enforced by every constructor:
///
/// - every element is finite;
/// - the bottom row is exactly `[0, 0, 0, 1]`;
/// - the upper-left 3×3 block is invertible.
///
/// Transforms compose with `*` in the usual mathematical order, so that
/// `b_to_c * a_to_b: AffineTransform<A, C>` first applies `a_to_b`. [`AffineTransform::and_then`]
/// spells the same thing in application order.
///
/// # Persistence layout
///
/// With the `serde` feature, a transform (de)serializes as a flat sequence of 16 doubles in
/// **column-major** order: elements 0..4 are the first column, and elements 12..15 are the
/// translation followed by the homogeneous 1. [`AffineTransform::to_column_major`] and
/// [`AffineTransform::from_column_major`] expose the same layout. Deserializing a matrix that
/// breaks the invariants above fails.
///
/// <div class="warning">
///
/// When deserializing, the coordinate systems of the value are _not_ checked, so make sure to
/// deserialize into the same `From` and `To` that were serialized.
///
/// </div>
#[derive(Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
// don't require From/To: Serialize/Deserialize since they are markers only
#[cfg_attr(
    feature = "serde",
    serde(bound = "", try_from = "[f64; 16]", into = "[f64; 16]")
)]
pub struct AffineTransform<From, To> {
    pub(crate) matrix: Matrix4,
    from: PhantomData<From>,
    to: PhantomData<To>,
}

// manual impls of Clone and Copy to avoid requiring From/To: Copy + Clone
impl<From, To> Clone for AffineTransform<From, To> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<From, To> Copy for AffineTransform<From, To> {}

impl<From, To> Default for AffineTransform<From, To> {
    fn default() -> Self {
        Self::identity()
    }
}

impl<From, To> PartialEq<Self> for AffineTransform<From, To> {
    fn eq(&self, other: &Self) -> bool {
        self.matrix.eq(&other.matrix)
    }
}

fn is_affine(matrix: &Matrix4) -> bool {
    let bottom_row_is_homogeneous = matrix[(3, 0)] == 0.
        && matrix[(3, 1)] == 0.
        && matrix[(3, 2)] == 0.
        && matrix[(3, 3)] == 1.;
    bottom_row_is_homogeneous
        && matrix.iter().all(|v| v.is_finite())
        && matrix.fixed_view::<3, 3>(0, 0).determinant().is_normal()
}

impl<From, To> AffineTransform<From, To> {
    fn from_matrix_unchecked(matrix: Matrix4) -> Self {
        Self {
            matrix,
            from: PhantomData,
            to: PhantomData,
        }
    }

    /// Wraps a homogeneous matrix that maps `From` points to `To` points.
    ///
    /// Returns `None` if the matrix breaks one of the [type invariants](AffineTransform).
    #[must_use]
    pub fn from_matrix(matrix: Matrix4) -> Option<Self> {
        is_affine(&matrix).then(|| Self::from_matrix_unchecked(matrix))
    }

    /// Builds a transform that applies `linear` and then translates by `translation`.
    ///
    /// Returns `None` if `linear` is singular or anything is non-finite.
    #[must_use]
    pub fn from_parts(linear: Matrix3, translation: Vector3) -> Option<Self> {
        let mut matrix = linear.to_homogeneous();
        matrix.fixed_view_mut::<3, 1>(0, 3).copy_from(&translation);
        Self::from_matrix(matrix)
    }

    /// The transform that maps every point of `From` onto the same numbers in `To`.
    #[must_use]
    pub fn identity() -> Self {
        Self::from_matrix_unchecked(Matrix4::identity())
    }

    /// A pure translation from `From` into `To`.
    ///
    /// Returns `None` if `translation` is not finite.
    #[must_use]
    pub fn from_translation(translation: Vector3) -> Option<Self> {
        Self::from_parts(Matrix3::identity(), translation)
    }

    /// A uniform scale about the origin.
    ///
    /// Returns `None` for a zero or non-finite factor.
    #[must_use]
    pub fn from_scale(factor: f64) -> Option<Self> {
        Self::from_parts(Matrix3::from_diagonal_element(factor), Vector3::zeros())
    }

    /// Reads a transform from 16 doubles in column-major order.
    ///
    /// See the [persistence layout](AffineTransform#persistence-layout).
    #[must_use]
    pub fn from_column_major(values: [f64; MATRIX_LEN]) -> Option<Self> {
        Self::from_matrix(Matrix4::from_column_slice(&values))
    }

    /// Writes the transform as 16 doubles in column-major order.
    ///
    /// See the [persistence layout](AffineTransform#persistence-layout).
    #[must_use]
    pub fn to_column_major(&self) -> [f64; MATRIX_LEN] {
        let mut values = [0.; MATRIX_LEN];
        values.copy_from_slice(self.matrix.as_slice());
        values
    }

    /// Returns the full homogeneous matrix.
    #[must_use]
    pub fn matrix(&self) -> &Matrix4 {
        &self.matrix
    }

    /// Returns the upper-left 3×3 block, ie, rotation, scale, and shear.
    #[must_use]
    pub fn linear(&self) -> Matrix3 {
        self.matrix.fixed_view::<3, 3>(0, 0).into_owned()
    }

    /// Returns where the origin of `From` ends up in `To`.
    #[must_use]
    pub fn translation(&self) -> Vector3 {
        self.matrix.fixed_view::<3, 1>(0, 3).into_owned()
    }

    /// Returns the same transform with its translation replaced.
    ///
    /// Returns `None` if `translation` is not finite.
    #[must_use]
    pub fn with_translation(&self, translation: Vector3) -> Option<Self> {
        Self::from_parts(self.linear(), translation)
    }

    /// Returns the same transform with its linear part replaced.
    ///
    /// Returns `None` if `linear` is singular or non-finite.
    #[must_use]
    pub fn with_linear(&self, linear: Matrix3) -> Option<Self> {
        Self::from_parts(linear, self.translation())
    }

    /// Chains two transforms to produce one that goes directly from `From` to `NewTo`.
    ///
    /// `a.and_then(b)` first applies `a`, then `b`; it is equivalent to `b * a`.
    pub fn and_then<NewTo>(self, rhs: AffineTransform<To, NewTo>) -> AffineTransform<From, NewTo> {
        rhs * self
    }

    /// Returns the transform that undoes this one.
    ///
    /// Returns `None` only if the linear part has become numerically singular, which the type
    /// invariants otherwise rule out.
    #[must_use]
    pub fn inverse(&self) -> Option<AffineTransform<To, From>> {
        let inverse_linear = self.linear().try_inverse()?;
        let translation = -(inverse_linear * self.translation());
        AffineTransform::from_parts(inverse_linear, translation)
    }

    /// Maps a point from `From` into `To`.
    #[doc(alias = "apply")]
    #[must_use]
    pub fn transform_point(&self, point: &Point3) -> Point3 {
        self.matrix.transform_point(point)
    }

    /// Maps a displacement from `From` into `To`; translation does not apply.
    #[must_use]
    pub fn transform_vector(&self, vector: &Vector3) -> Vector3 {
        self.matrix.transform_vector(vector)
    }
}

impl<From, To> TryFrom<[f64; MATRIX_LEN]> for AffineTransform<From, To> {
    type Error = AnchorError;

    fn try_from(values: [f64; MATRIX_LEN]) -> Result<Self, Self::Error> {
        Self::from_column_major(values).ok_or(AnchorError::DegenerateTransform)
    }
}

impl<From, To> std::convert::From<AffineTransform<From, To>> for [f64; MATRIX_LEN] {
    fn from(transform: AffineTransform<From, To>) -> Self {
        transform.to_column_major()
    }
}

impl<From, To> Display for AffineTransform<From, To>
where
    From: CoordinateSystem,
    To: CoordinateSystem,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}: {}", From::NAME, To::NAME, self.matrix)
    }
}

// `b_to_c * a_to_b` eliminates the shared middle system, like a matrix product does.
impl<From, Over, To> Mul<AffineTransform<From, Over>> for AffineTransform<Over, To> {
    type Output = AffineTransform<From, To>;

    fn mul(self, rhs: AffineTransform<From, Over>) -> Self::Output {
        AffineTransform::from_matrix_unchecked(self.matrix * rhs.matrix)
    }
}

#[cfg(any(test, feature = "approx"))]
impl<From, To> AbsDiffEq<Self> for AffineTransform<From, To> {
    type Epsilon = <f64 as AbsDiffEq>::Epsilon;

    fn default_epsilon() -> Self::Epsilon {
        Matrix4::default_epsilon()
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        self.matrix.abs_diff_eq(&other.matrix, epsilon)
    }
}

#[cfg(any(test, feature = "approx"))]
impl<From, To> RelativeEq for AffineTransform<From, To> {
    fn default_max_relative() -> Self::Epsilon {
        Matrix4::default_max_relative()
    }

    fn relative_eq(
        &self,
        other: &Self,
        epsilon: Self::Epsilon,
        max_relative: Self::Epsilon,
    ) -> bool {
        self.matrix.relative_eq(&other.matrix, epsilon, max_relative)
    }
}

#[cfg(test)]
mod tests {
    use super::AffineTransform;
    use crate::systems::{AbsoluteWorld, AnchorLocal, Ecef, RelativeWorld};
    use crate::{Matrix3, Matrix4, Point3, Vector3};
    use approx::assert_relative_eq;
    use quickcheck::quickcheck;
    use rstest::rstest;

    fn rotation_about_z(degrees: f64) -> Matrix3 {
        *nalgebra::Rotation3::from_axis_angle(&Vector3::z_axis(), degrees.to_radians()).matrix()
    }

    #[test]
    fn composition_applies_right_operand_first() {
        let scale = AffineTransform::<AnchorLocal, RelativeWorld>::from_scale(2.).unwrap();
        let shift = AffineTransform::<RelativeWorld, AbsoluteWorld>::from_translation(
            Vector3::new(10., 0., 0.),
        )
        .unwrap();

        let combined = shift * scale;
        assert_eq!(combined, scale.and_then(shift));
        assert_relative_eq!(
            combined.transform_point(&Point3::new(1., 1., 1.)),
            Point3::new(12., 2., 2.)
        );
        // displacements ignore the translation
        assert_relative_eq!(
            combined.transform_vector(&Vector3::new(1., 0., 0.)),
            Vector3::new(2., 0., 0.)
        );
    }

    #[test]
    fn inverse_undoes_the_transform() {
        let transform = AffineTransform::<AnchorLocal, Ecef>::from_parts(
            rotation_about_z(30.) * Matrix3::from_diagonal(&Vector3::new(1., 2., 3.)),
            Vector3::new(6_378_137., 12., -7.),
        )
        .unwrap();
        let inverse = transform.inverse().unwrap();
        assert_relative_eq!(
            inverse * transform,
            AffineTransform::identity(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn column_major_layout_puts_translation_last() {
        let transform = AffineTransform::<AnchorLocal, Ecef>::from_parts(
            Matrix3::from_diagonal(&Vector3::new(2., 3., 4.)),
            Vector3::new(5., 6., 7.),
        )
        .unwrap();
        assert_eq!(
            transform.to_column_major(),
            [2., 0., 0., 0., 0., 3., 0., 0., 0., 0., 4., 0., 5., 6., 7., 1.]
        );
        assert_eq!(
            AffineTransform::from_column_major(transform.to_column_major()),
            Some(transform)
        );
    }

    #[rstest]
    #[case::singular([0.; 16])]
    #[case::projective([1., 0., 0., 0.5, 0., 1., 0., 0., 0., 0., 1., 0., 0., 0., 0., 1.])]
    #[case::homogeneous_not_one([1., 0., 0., 0., 0., 1., 0., 0., 0., 0., 1., 0., 0., 0., 0., 2.])]
    #[case::not_finite([1., 0., 0., 0., 0., 1., 0., 0., 0., 0., 1., 0., f64::NAN, 0., 0., 1.])]
    fn rejects_non_affine_matrices(#[case] values: [f64; 16]) {
        assert_eq!(
            AffineTransform::<AnchorLocal, Ecef>::from_column_major(values),
            None
        );
    }

    #[test]
    fn replacing_parts_keeps_the_other() {
        let transform = AffineTransform::<AnchorLocal, Ecef>::from_parts(
            rotation_about_z(90.),
            Vector3::new(1., 2., 3.),
        )
        .unwrap();
        let moved = transform.with_translation(Vector3::new(4., 5., 6.)).unwrap();
        assert_eq!(moved.linear(), transform.linear());
        assert_eq!(moved.translation(), Vector3::new(4., 5., 6.));
        assert_eq!(moved.with_linear(Matrix3::zeros()), None);
        assert_eq!(
            *AffineTransform::<Ecef, Ecef>::identity().matrix(),
            Matrix4::identity()
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serde_uses_the_column_major_layout() {
        let transform = AffineTransform::<AnchorLocal, Ecef>::from_parts(
            rotation_about_z(45.),
            Vector3::new(-2_000_000., 3_000_000., 5_000_000.),
        )
        .unwrap();

        let ser = serde_yaml::to_string(&transform).unwrap();
        let values = serde_yaml::from_str::<Vec<f64>>(&ser).unwrap();
        assert_eq!(values, transform.to_column_major().to_vec());

        let de = serde_yaml::from_str::<AffineTransform<AnchorLocal, Ecef>>(&ser).unwrap();
        assert_eq!(transform, de);

        let degenerate = serde_yaml::to_string(&[0.; 16]).unwrap();
        assert!(serde_yaml::from_str::<AffineTransform<AnchorLocal, Ecef>>(&degenerate).is_err());
    }

    quickcheck! {
        fn inverse_of_inverse_is_original(yaw: u16, scale: u8, x: i32, y: i32, z: i32) -> bool {
            let transform = AffineTransform::<AnchorLocal, Ecef>::from_parts(
                rotation_about_z(f64::from(yaw % 360)) * (1. + f64::from(scale) / 16.),
                Vector3::new(f64::from(x), f64::from(y), f64::from(z)),
            )
            .unwrap();
            let round_trip = transform.inverse().unwrap().inverse().unwrap();
            approx::relative_eq!(round_trip, transform, epsilon = 1e-6, max_relative = 1e-12)
        }
    }
}
