#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg(doc)]
use crate::transform::AffineTransform;

/// Names a space that an [`AffineTransform`] maps out of or into.
///
/// Coordinate systems carry no data; they only exist so that, say, a transform into
/// [`RelativeWorld`] cannot be used where a transform into [`Ecef`] is expected.
///
/// While you _can_ implement this trait directly, prefer using [`system!`](crate::system).
pub trait CoordinateSystem {
    /// Human-readable name used in `Debug` and `Display` output of transforms.
    const NAME: &'static str;
}

/// Defines a new coordinate system marker.
///
/// Note that the coordinate system is a zero-sized type used only to mark things like
/// [`AffineTransform`] with which space they are in. A coordinate system does not know its
/// relation to any other coordinate system.
///
/// ```rust
/// # use globe_anchor::system;
/// system!(pub struct DatasetLocal);
/// ```
///
/// Doc comments and attributes can be included directly in the invocation:
///
/// ```rust
/// globe_anchor::system! {
///     /// The space of a sensor rig mounted on an anchored vehicle.
///     #[derive(Hash)]
///     pub(crate) struct SensorRig
/// }
/// ```
#[macro_export]
macro_rules! system {
    ($(#[$attr:meta])* $vis:vis struct $name:ident) => {
        $(#[$attr])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        $vis struct $name;

        impl $crate::CoordinateSystem for $name {
            const NAME: &'static str = stringify!($name);
        }
    };
}

system! {
    /// The [Earth-centered, Earth-fixed (ECEF)][ecef] coordinate system, in metres.
    ///
    /// Right-handed, origin at the centre of the reference ellipsoid:
    ///
    /// - Positive Z is towards the North pole.
    /// - Positive X is towards the prime meridian on the equator.
    /// - Positive Y is towards 90°E on the equator.
    ///
    /// [ecef]: https://en.wikipedia.org/wiki/Earth-centered,_Earth-fixed_coordinate_system
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    #[allow(clippy::upper_case_acronyms)]
    pub struct Ecef
}

system! {
    /// Engine world coordinates that do not depend on the floating origin.
    ///
    /// A reference frame maps between this system and [`Ecef`].
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct AbsoluteWorld
}

system! {
    /// Engine world coordinates relative to the current floating origin.
    ///
    /// This is what scene nodes are positioned in. A point's [`AbsoluteWorld`] position is its
    /// `RelativeWorld` position plus the world origin.
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct RelativeWorld
}

system! {
    /// The body space of an anchored object; its origin is the object's pivot.
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct AnchorLocal
}
