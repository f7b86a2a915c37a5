//! Runtime settings for anchors and georeferences.
//!
//! Both settings types deserialize with every field optional, so a host configuration file only
//! needs to mention what it changes:
//!
//! ```rust
//! # #[cfg(feature = "serde")] {
//! use globe_anchor::{AnchorSettings, OrientationPolicy};
//!
//! let settings: AnchorSettings = serde_yaml::from_str("orientation_policy: adjust_for_globe").unwrap();
//! assert_eq!(settings.orientation_policy, OrientationPolicy::AdjustForGlobe);
//! assert!(settings.teleport_when_updating_transform);
//! # }
//! ```

use crate::{Ellipsoid, Llh, OrientationPolicy, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The registry tag an anchor resolves when none is configured.
pub const DEFAULT_FRAME_TAG: &str = "World";

/// Per-anchor behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AnchorSettings {
    /// Whether pushes to the scene node move it instantaneously rather than sweep it through the
    /// world. Forwarded to [`SceneNode::set_local_transform`](crate::SceneNode::set_local_transform).
    pub teleport_when_updating_transform: bool,

    /// What happens to the node's orientation when its globe position is set explicitly.
    pub orientation_policy: OrientationPolicy,

    /// Registry tag used when the anchor resolves its reference frame by tag.
    pub frame_tag: String,
}

impl Default for AnchorSettings {
    fn default() -> Self {
        Self {
            teleport_when_updating_transform: true,
            orientation_policy: OrientationPolicy::default(),
            frame_tag: DEFAULT_FRAME_TAG.to_owned(),
        }
    }
}

/// How to construct a [`Georeference`](crate::Georeference).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct GeoreferenceSettings {
    /// Longitude of the absolute-world origin, in degrees.
    pub origin_longitude: f64,
    /// Latitude of the absolute-world origin, in degrees.
    pub origin_latitude: f64,
    /// Height of the absolute-world origin above the ellipsoid, in metres.
    pub origin_height: f64,
    /// How many world units make up one metre.
    pub units_per_meter: f64,
    /// Semi-axes of the reference ellipsoid, in metres.
    pub ellipsoid_radii: [f64; 3],
    /// Initial floating origin, in absolute world units.
    pub world_origin: [f64; 3],
}

impl Default for GeoreferenceSettings {
    fn default() -> Self {
        let radii = Ellipsoid::WGS84.radii();
        Self {
            origin_longitude: 0.,
            origin_latitude: 0.,
            origin_height: 0.,
            units_per_meter: 1.,
            ellipsoid_radii: [radii.x, radii.y, radii.z],
            world_origin: [0.; 3],
        }
    }
}

impl GeoreferenceSettings {
    /// Returns the georeference origin, or `None` if the latitude is out of range.
    #[must_use]
    pub fn origin(&self) -> Option<Llh> {
        Llh::from_degrees(
            self.origin_longitude,
            self.origin_latitude,
            self.origin_height,
        )
    }

    /// Returns the ellipsoid, or `None` if a radius is not strictly positive.
    #[must_use]
    pub fn ellipsoid(&self) -> Option<Ellipsoid> {
        let [x, y, z] = self.ellipsoid_radii;
        Ellipsoid::new(x, y, z)
    }

    pub(crate) fn world_origin_vector(&self) -> Vector3 {
        Vector3::from(self.world_origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_defaults() {
        let settings = AnchorSettings::default();
        assert!(settings.teleport_when_updating_transform);
        assert_eq!(settings.orientation_policy, OrientationPolicy::Preserve);
        assert_eq!(settings.frame_tag, "World");
    }

    #[test]
    fn partial_anchor_settings_fill_in_defaults() {
        let settings: AnchorSettings = serde_yaml::from_str(
            "teleport_when_updating_transform: false\nframe_tag: Moon\n",
        )
        .unwrap();
        assert_eq!(
            settings,
            AnchorSettings {
                teleport_when_updating_transform: false,
                orientation_policy: OrientationPolicy::Preserve,
                frame_tag: "Moon".into(),
            }
        );
    }

    #[test]
    fn georeference_settings_from_yaml() {
        let settings: GeoreferenceSettings = serde_yaml::from_str(
            "origin_longitude: -105.25737\norigin_latitude: 39.736401\norigin_height: 2250\nunits_per_meter: 100\n",
        )
        .unwrap();
        assert_eq!(settings.units_per_meter, 100.);
        assert_eq!(settings.ellipsoid(), Some(Ellipsoid::WGS84));
        assert_eq!(settings.world_origin_vector(), Vector3::zeros());
        let origin = settings.origin().unwrap().to_degrees();
        approx::assert_relative_eq!(origin[0], -105.25737, epsilon = 1e-9);
        approx::assert_relative_eq!(origin[1], 39.736401, epsilon = 1e-9);
        approx::assert_relative_eq!(origin[2], 2250., epsilon = 1e-9);
    }

    #[test]
    fn invalid_georeference_settings_are_detected() {
        let settings = GeoreferenceSettings {
            origin_latitude: 120.,
            ellipsoid_radii: [1., 0., 1.],
            ..GeoreferenceSettings::default()
        };
        assert_eq!(settings.origin(), None);
        assert_eq!(settings.ellipsoid(), None);
    }
}
