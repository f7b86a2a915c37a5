use std::fmt;
use std::fmt::Display;
use std::marker::PhantomData;
use uom::si::f64::{Angle, Length};
use uom::si::{
    angle::{degree, radian},
    length::meter,
};
use uom::ConstZero;

#[cfg(any(test, feature = "approx"))]
use approx::{AbsDiffEq, RelativeEq};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A longitude, latitude, and height relative to a reference
/// [`Ellipsoid`](crate::Ellipsoid).
///
/// The components are always given in that order (longitude first), matching the convention of
/// the `x`, `y`, `z` of a position vector: longitude is the easting, latitude the northing, and
/// height the distance along the ellipsoid normal.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Llh {
    // NOTE: uom does not guarantee how angles are normalized, so we normalize on output instead.
    pub(crate) longitude: Angle,
    pub(crate) latitude: Angle,
    height: Length,
}

impl Llh {
    /// Constructs a position from longitude, latitude, and height.
    ///
    /// The latitude must be in [-90°,90°] % 360°. If it is not, this function returns `None`.
    #[must_use]
    pub fn build(
        Components {
            longitude,
            latitude,
            height,
        }: Components,
    ) -> Option<Self> {
        Some(
            Self::builder()
                .longitude(longitude)
                .latitude(latitude)?
                .height(height)
                .build(),
        )
    }

    /// Provides a constructor for an [`Llh`] position.
    pub fn builder() -> Builder<MissingLongitude, MissingLatitude, MissingHeight> {
        Builder {
            under_construction: Llh {
                longitude: Angle::ZERO,
                latitude: Angle::ZERO,
                height: Length::ZERO,
            },
            has: (PhantomData, PhantomData, PhantomData),
        }
    }

    /// Constructs a position from longitude and latitude in degrees and height in metres.
    ///
    /// Returns `None` if the latitude is outside [-90°,90°] % 360°.
    #[must_use]
    pub fn from_degrees(longitude: f64, latitude: f64, height: f64) -> Option<Self> {
        Self::build(Components {
            longitude: Angle::new::<degree>(longitude),
            latitude: Angle::new::<degree>(latitude),
            height: Length::new::<meter>(height),
        })
    }

    /// Returns the angle east of the prime meridian, in [-180°, 180°).
    #[must_use]
    pub fn longitude(&self) -> Angle {
        Angle::new::<radian>(signed_half_turn(self.longitude))
    }

    /// Returns the angle north of the equator, in [-90°, 90°].
    #[must_use]
    pub fn latitude(&self) -> Angle {
        Angle::new::<radian>(signed_half_turn(self.latitude))
    }

    /// Returns the distance above the ellipsoid along its surface normal.
    ///
    /// This is not height above mean sea level; the geoid can be tens of metres above or below
    /// the ellipsoid depending on where on the globe the position is.
    #[must_use]
    pub fn height(&self) -> Length {
        self.height
    }

    /// Returns `(longitude°, latitude°, height m)`, the layout hosts usually store.
    #[must_use]
    pub fn to_degrees(&self) -> [f64; 3] {
        [
            self.longitude().get::<degree>(),
            self.latitude().get::<degree>(),
            self.height.get::<meter>(),
        ]
    }

    /// Returns the same longitude and latitude at a different height.
    #[must_use]
    pub fn with_height(mut self, height: impl Into<Length>) -> Self {
        self.height = height.into();
        self
    }
}

impl Default for Llh {
    /// 0°E, 0°N on the ellipsoid surface.
    fn default() -> Self {
        Self {
            longitude: Angle::ZERO,
            latitude: Angle::ZERO,
            height: Length::ZERO,
        }
    }
}

/// Maps an angle into [-180°, 180°) radians.
pub(crate) fn signed_half_turn(angle: Angle) -> f64 {
    let full = Angle::FULL_TURN.get::<radian>();
    let bounded = angle.get::<radian>().rem_euclid(full);
    if bounded < Angle::HALF_TURN.get::<radian>() {
        bounded
    } else {
        bounded - full
    }
}

impl Display for Llh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lon = self.longitude();
        let lon_is_positive = lon.is_sign_positive();
        let lon = lon.abs().get::<degree>();
        let lat = self.latitude();
        let lat_is_positive = lat.is_sign_positive();
        let lat = lat.abs().get::<degree>();
        let height = self.height.get::<meter>();
        let east_west = if lon_is_positive { 'E' } else { 'W' };
        let north_south = if lat_is_positive { 'N' } else { 'S' };
        write!(f, "{lon}°{east_west}, {lat}°{north_south}, {height}m")
    }
}

#[cfg(any(test, feature = "approx"))]
impl AbsDiffEq<Self> for Llh {
    type Epsilon = f64;

    fn default_epsilon() -> Self::Epsilon {
        // in degrees for the angles and metres for the height; 1e-9° is roughly 0.1mm on the
        // surface of the earth.
        1e-9
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        let lon_delta = Angle::new::<radian>(signed_half_turn(self.longitude - other.longitude));
        // longitude is meaningless at the poles
        let at_pole = (self.latitude().get::<degree>().abs() - 90.).abs() <= epsilon;
        (at_pole || lon_delta.get::<degree>().abs() <= epsilon)
            && self
                .latitude()
                .get::<degree>()
                .abs_diff_eq(&other.latitude().get::<degree>(), epsilon)
            && self
                .height
                .get::<meter>()
                .abs_diff_eq(&other.height.get::<meter>(), epsilon)
    }
}

#[cfg(any(test, feature = "approx"))]
impl RelativeEq for Llh {
    fn default_max_relative() -> Self::Epsilon {
        f64::default_max_relative()
    }

    fn relative_eq(
        &self,
        other: &Self,
        epsilon: Self::Epsilon,
        max_relative: Self::Epsilon,
    ) -> bool {
        let lon_delta = Angle::new::<radian>(signed_half_turn(self.longitude - other.longitude));
        let at_pole = (self.latitude().get::<degree>().abs() - 90.).abs() <= epsilon;
        (at_pole || lon_delta.get::<degree>().abs() <= epsilon)
            && self.latitude().get::<degree>().relative_eq(
                &other.latitude().get::<degree>(),
                epsilon,
                max_relative,
            )
            && self.height.get::<meter>().relative_eq(
                &other.height.get::<meter>(),
                epsilon,
                max_relative,
            )
    }
}

/// Argument type for [`Llh::build`].
#[derive(Debug, Default)]
#[must_use]
pub struct Components {
    /// The angle east of the prime meridian.
    pub longitude: Angle,

    /// The angle north of the equator; must be in [-90°,90°] % 360°.
    pub latitude: Angle,

    /// The height above the ellipsoid.
    pub height: Length,
}

/// Used to indicate that a partially-constructed [`Llh`] is missing the longitude component.
pub struct MissingLongitude;
/// Used to indicate that a partially-constructed [`Llh`] has the longitude component set.
pub struct HasLongitude;
/// Used to indicate that a partially-constructed [`Llh`] is missing the latitude component.
pub struct MissingLatitude;
/// Used to indicate that a partially-constructed [`Llh`] has the latitude component set.
pub struct HasLatitude;
/// Used to indicate that a partially-constructed [`Llh`] is missing the height component.
pub struct MissingHeight;
/// Used to indicate that a partially-constructed [`Llh`] has the height component set.
pub struct HasHeight;

/// [Builder] for an [`Llh`] position.
///
/// Construct one through [`Llh::builder`], and finalize with [`Builder::build`].
///
/// [Builder]: https://rust-unofficial.github.io/patterns/patterns/creational/builder.html
#[derive(Debug)]
#[must_use]
pub struct Builder<Longitude, Latitude, Height> {
    under_construction: Llh,
    has: (
        PhantomData<Longitude>,
        PhantomData<Latitude>,
        PhantomData<Height>,
    ),
}

// manual impls of Clone and Copy to avoid requiring the markers to be Copy + Clone
impl<L1, L2, H> Clone for Builder<L1, L2, H> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<L1, L2, H> Copy for Builder<L1, L2, H> {}

impl<L1, L2, H> Builder<L1, L2, H> {
    /// Sets the longitude of the [`Llh`]-to-be.
    pub fn longitude(mut self, longitude: impl Into<Angle>) -> Builder<HasLongitude, L2, H> {
        self.under_construction.longitude = longitude.into();
        Builder {
            under_construction: self.under_construction,
            has: (PhantomData::<HasLongitude>, self.has.1, self.has.2),
        }
    }

    /// Sets the latitude of the [`Llh`]-to-be.
    ///
    /// The latitude must be in [-90°,90°] % 360°. If it is not, this function returns `None`.
    pub fn latitude(mut self, latitude: impl Into<Angle>) -> Option<Builder<L1, HasLatitude, H>> {
        let latitude = latitude.into();
        if !(-std::f64::consts::FRAC_PI_2..=std::f64::consts::FRAC_PI_2)
            .contains(&signed_half_turn(latitude))
        {
            return None;
        }
        self.under_construction.latitude = latitude;
        Some(Builder {
            under_construction: self.under_construction,
            has: (self.has.0, PhantomData::<HasLatitude>, self.has.2),
        })
    }

    /// Sets the height of the [`Llh`]-to-be.
    pub fn height(mut self, height: impl Into<Length>) -> Builder<L1, L2, HasHeight> {
        self.under_construction.height = height.into();
        Builder {
            under_construction: self.under_construction,
            has: (self.has.0, self.has.1, PhantomData::<HasHeight>),
        }
    }
}

impl Builder<HasLongitude, HasLatitude, HasHeight> {
    #[must_use]
    pub fn build(self) -> Llh {
        self.under_construction
    }
}
