//! The data an anchor owns, and the two derivations between its representations.

use crate::error::{AnchorError, Result};
use crate::reference_frame::ReferenceFrame;
use crate::systems::{Ecef, RelativeWorld};
use crate::transform::{AffineTransform, MATRIX_LEN};
use crate::{Ellipsoid, GlobeTransform, Llh, LocalTransform, ParentTransform, Point3, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The first [`AnchorRecord::version`] that stores [`AnchorRecord::globe_transform_is_valid`].
///
/// Anchors saved before then always had a valid globe transform.
pub const VALIDITY_FLAG_VERSION: u32 = 1;

/// The [`AnchorRecord::version`] written by this crate.
pub const CURRENT_RECORD_VERSION: u32 = VALIDITY_FLAG_VERSION;

/// How globe coordinates map into the render world, and back, for one reference frame state.
///
/// ```text
/// globe = absolute_world_to_ecef · parent⁻¹ · T(+origin) · local
/// local = T(−origin) · parent · ecef_to_absolute_world · globe
/// ```
///
/// The two directions are built from the same inputs and are exact inverses of each other.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameChain {
    ecef_to_world: AffineTransform<Ecef, RelativeWorld>,
    world_to_ecef: AffineTransform<RelativeWorld, Ecef>,
}

impl FrameChain {
    /// Captures the current state of `frame` and `parent`.
    ///
    /// `origin` overrides the frame's committed world origin.
    pub fn new(
        frame: &dyn ReferenceFrame,
        parent: Option<&ParentTransform>,
        origin: Option<Vector3>,
    ) -> Result<Self> {
        let origin = origin.unwrap_or_else(|| frame.world_origin());
        let ecef_to_relative = frame.ecef_to_relative_world(Some(origin))?;
        let relative_to_ecef = frame.relative_world_to_ecef(Some(origin))?;
        let Some(parent) = parent else {
            return Ok(Self {
                ecef_to_world: ecef_to_relative,
                world_to_ecef: relative_to_ecef,
            });
        };

        // T(−origin) · parent · T(+origin), the parent as seen from the relative world
        let linear = parent.linear();
        let around_origin = AffineTransform::<RelativeWorld, RelativeWorld>::from_parts(
            linear,
            linear * origin + parent.translation() - origin,
        )
        .ok_or(AnchorError::DegenerateTransform)?;
        let around_origin_inverse = around_origin
            .inverse()
            .ok_or(AnchorError::DegenerateTransform)?;

        Ok(Self {
            ecef_to_world: around_origin * ecef_to_relative,
            world_to_ecef: relative_to_ecef * around_origin_inverse,
        })
    }

    /// Maps ECEF into the space scene nodes live in.
    #[must_use]
    pub fn ecef_to_world(&self) -> &AffineTransform<Ecef, RelativeWorld> {
        &self.ecef_to_world
    }

    /// The globe transform that places an object where `local` puts it.
    #[must_use]
    pub fn globe_from_local(&self, local: &LocalTransform) -> GlobeTransform {
        self.world_to_ecef * *local
    }

    /// The local transform that puts an object where `globe` places it.
    #[must_use]
    pub fn local_from_globe(&self, globe: &GlobeTransform) -> LocalTransform {
        self.ecef_to_world * *globe
    }
}

/// The anchor's globe position in the forms hosts like to display.
///
/// Re-derived every time the globe transform changes. While the anchor is not valid, it holds
/// zeroes (or whatever was last derived).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CartographicMirror {
    ecef: Point3,
    geodetic: Llh,
}

impl CartographicMirror {
    fn of(ecef: Point3, ellipsoid: &Ellipsoid) -> Self {
        Self {
            ecef,
            // the centre of the earth has no latitude; report it as the origin of the grid
            geodetic: ellipsoid
                .ecef_to_longitude_latitude_height(&ecef)
                .unwrap_or_default(),
        }
    }

    /// The globe position in ECEF metres.
    #[must_use]
    pub fn ecef(&self) -> Point3 {
        self.ecef
    }

    /// The globe position as longitude, latitude and height.
    #[must_use]
    pub fn geodetic(&self) -> Llh {
        self.geodetic
    }
}

impl Default for CartographicMirror {
    fn default() -> Self {
        Self {
            ecef: Point3::origin(),
            geodetic: Llh::default(),
        }
    }
}

/// What an anchor saves and restores.
///
/// The globe transform is stored as 16 doubles in column-major order, matching
/// [`AffineTransform::to_column_major`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AnchorRecord {
    /// Format version; records without one predate the validity flag.
    #[cfg_attr(feature = "serde", serde(default))]
    pub version: u32,
    /// The globe transform, column-major.
    pub globe_transform: [f64; MATRIX_LEN],
    /// Whether `globe_transform` is authoritative. Ignored before [`VALIDITY_FLAG_VERSION`].
    #[cfg_attr(feature = "serde", serde(default))]
    pub globe_transform_is_valid: bool,
}

/// The authoritative half of an anchor: its cached globe transform and whether to trust it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AnchorState {
    globe: GlobeTransform,
    valid: bool,
    mirror: CartographicMirror,
}

impl AnchorState {
    /// Whether the globe transform is authoritative.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// The globe transform, if it is authoritative.
    #[must_use]
    pub fn globe(&self) -> Option<GlobeTransform> {
        self.valid.then_some(self.globe)
    }

    #[must_use]
    pub fn mirror(&self) -> &CartographicMirror {
        &self.mirror
    }

    /// Makes `globe` authoritative; returns whether anything changed.
    pub fn set_globe(&mut self, globe: GlobeTransform, ellipsoid: &Ellipsoid) -> bool {
        if self.valid && self.globe == globe {
            return false;
        }
        self.globe = globe;
        self.valid = true;
        self.refresh_mirror(ellipsoid);
        true
    }

    /// Stops trusting the globe transform; the scene node becomes the source of truth.
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    pub(crate) fn refresh_mirror(&mut self, ellipsoid: &Ellipsoid) {
        if self.valid {
            self.mirror = CartographicMirror::of(Point3::from(self.globe.translation()), ellipsoid);
        }
    }

    /// Captures the state for persistence.
    #[must_use]
    pub fn to_record(&self) -> AnchorRecord {
        AnchorRecord {
            version: CURRENT_RECORD_VERSION,
            globe_transform: self.globe.to_column_major(),
            globe_transform_is_valid: self.valid,
        }
    }

    /// Rebuilds a state from a record.
    ///
    /// The mirror is left zeroed; it is re-derived once a reference frame is known.
    pub fn from_record(record: &AnchorRecord) -> Result<Self> {
        if record.version > CURRENT_RECORD_VERSION {
            return Err(AnchorError::UnsupportedRecordVersion(record.version));
        }
        Ok(Self {
            globe: GlobeTransform::try_from(record.globe_transform)?,
            valid: record.version < VALIDITY_FLAG_VERSION || record.globe_transform_is_valid,
            mirror: CartographicMirror::default(),
        })
    }
}
