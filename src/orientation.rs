//! Keeping objects upright when they are moved across the globe.
//!
//! "Up" at one place on the globe is not "up" on the other side of it. When an anchored object is
//! moved by setting its globe position, [`OrientationPolicy::AdjustForGlobe`] rotates it by however
//! much the local surface frame rotated between the old and the new position, so that an object
//! standing upright in Denver still stands upright after being sent to Sydney.
//!
//! The surface frame is sampled numerically, in render-world space, so that any scale or shear
//! introduced by the reference frame or a parent placement is accounted for:
//!
//! - "up" is the direction from a point [`HEIGHT_PROBE_DELTA_METERS`] below the position to the
//!   position itself;
//! - "forward" (north) is the direction towards a point [`LATITUDE_PROBE_DELTA_DEGREES`] further
//!   north.

use crate::systems::{Ecef, RelativeWorld};
use crate::transform::AffineTransform;
use crate::{Ellipsoid, Llh, Matrix3};
use uom::si::angle::degree;
use uom::si::f64::{Angle, Length};
use uom::si::length::meter;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How far below a position "up" is sampled from.
pub const HEIGHT_PROBE_DELTA_METERS: f64 = 100.;

/// How far north of a position "forward" is sampled at.
pub const LATITUDE_PROBE_DELTA_DEGREES: f64 = 1e-4;

/// What happens to an anchored object's orientation when its globe position is set explicitly.
///
/// Only explicit globe moves are affected; reference frame changes, parent moves and origin
/// rebases never touch orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum OrientationPolicy {
    /// Keep the orientation the object had in render-world space.
    #[default]
    Preserve,
    /// Rotate the object along with the surface of the globe.
    AdjustForGlobe,
}

impl OrientationPolicy {
    /// The render-world rotation to apply to an object moved from `from` to `to`.
    ///
    /// `ecef_to_world` maps ECEF into the space the object's transform lives in. Returns `None`
    /// when the orientation should be left alone, which is always the case for
    /// [`OrientationPolicy::Preserve`], and otherwise happens when the surface frame cannot be
    /// sampled at either end.
    #[must_use]
    pub fn correction(
        self,
        ellipsoid: &Ellipsoid,
        ecef_to_world: &AffineTransform<Ecef, RelativeWorld>,
        from: &Llh,
        to: &Llh,
    ) -> Option<Matrix3> {
        match self {
            Self::Preserve => None,
            Self::AdjustForGlobe => {
                let before = surface_basis(ellipsoid, ecef_to_world, from)?;
                let after = surface_basis(ellipsoid, ecef_to_world, to)?;
                // both bases are orthonormal, so the transpose is the inverse
                Some(after * before.transpose())
            }
        }
    }
}

/// An orthonormal render-world basis at `position`: columns are right, forward (north), and up.
pub(crate) fn surface_basis(
    ellipsoid: &Ellipsoid,
    ecef_to_world: &AffineTransform<Ecef, RelativeWorld>,
    position: &Llh,
) -> Option<Matrix3> {
    let to_world = |llh: &Llh| {
        ecef_to_world.transform_point(&ellipsoid.longitude_latitude_height_to_ecef(llh))
    };

    let here = to_world(position);
    let below = to_world(
        &position.with_height(position.height() - Length::new::<meter>(HEIGHT_PROBE_DELTA_METERS)),
    );

    // step south instead when north would go over the pole
    let latitude = position.latitude().get::<degree>();
    let (step, sign) = if latitude + LATITUDE_PROBE_DELTA_DEGREES <= 90. {
        (LATITUDE_PROBE_DELTA_DEGREES, 1.)
    } else {
        (-LATITUDE_PROBE_DELTA_DEGREES, -1.)
    };
    let probe = Llh::builder()
        .longitude(position.longitude())
        .latitude(Angle::new::<degree>(latitude + step))?
        .height(position.height())
        .build();
    let north = to_world(&probe);

    let up = (here - below).try_normalize(f64::EPSILON)?;
    let forward = (north - here) * sign;
    let forward = (forward - up * forward.dot(&up)).try_normalize(f64::EPSILON)?;
    let right = forward.cross(&up);

    Some(Matrix3::from_columns(&[right, forward, up]))
}
