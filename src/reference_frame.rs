//! Where the render world sits on the globe.
//!
//! A [`ReferenceFrame`] answers two questions for anchors: how absolute world coordinates map to
//! [`Ecef`], and where the floating origin currently is. [`Georeference`] is the in-memory
//! implementation: an East-North-Up frame tangent to the ellipsoid at a chosen origin, optionally
//! scaled to engine units.
//!
//! Anchors usually do not hold a frame directly but a [`FrameSource`], which is resolved lazily
//! (once) against a [`FrameRegistry`] of named georeferences.

use crate::config::GeoreferenceSettings;
use crate::error::{AnchorError, Result};
use crate::events::{Broadcaster, ChangeHandler, Subscription};
use crate::systems::{AbsoluteWorld, Ecef, RelativeWorld};
use crate::transform::AffineTransform;
use crate::{Ellipsoid, Llh, Matrix3, Point3, Vector3};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use uom::si::angle::radian;

/// The capability anchors need from whatever positions the world on the globe.
///
/// Implementations must keep [`ReferenceFrame::absolute_world_to_ecef`] and
/// [`ReferenceFrame::ecef_to_absolute_world`] mutually inverse, and must notify subscribers
/// synchronously, before the mutating call returns, whenever either of them (or the ellipsoid)
/// changes.
pub trait ReferenceFrame {
    /// The ellipsoid geodetic positions are relative to.
    fn ellipsoid(&self) -> Ellipsoid;

    /// The absolute-world position of the relative-world origin, in world units.
    fn world_origin(&self) -> Vector3;

    /// Maps absolute world coordinates into ECEF.
    fn absolute_world_to_ecef(&self) -> AffineTransform<AbsoluteWorld, Ecef>;

    /// Maps ECEF into absolute world coordinates.
    fn ecef_to_absolute_world(&self) -> AffineTransform<Ecef, AbsoluteWorld>;

    /// Calls `handler` every time the frame changes, for as long as the returned
    /// [`Subscription`] is alive.
    fn subscribe(&self, handler: ChangeHandler) -> Subscription;

    /// Converts a geodetic position to ECEF on this frame's ellipsoid.
    fn longitude_latitude_height_to_ecef(&self, position: &Llh) -> Point3 {
        self.ellipsoid().longitude_latitude_height_to_ecef(position)
    }

    /// Converts an ECEF position to geodetic on this frame's ellipsoid.
    ///
    /// Returns `None` at the centre of the ellipsoid.
    fn ecef_to_longitude_latitude_height(&self, position: &Point3) -> Option<Llh> {
        self.ellipsoid().ecef_to_longitude_latitude_height(position)
    }

    /// Maps relative world coordinates into ECEF.
    ///
    /// `origin` overrides [`ReferenceFrame::world_origin`]; an origin rebase uses this to derive
    /// transforms against an origin the frame has not committed yet.
    fn relative_world_to_ecef(
        &self,
        origin: Option<Vector3>,
    ) -> Result<AffineTransform<RelativeWorld, Ecef>> {
        let origin = origin.unwrap_or_else(|| self.world_origin());
        let shift = AffineTransform::<RelativeWorld, AbsoluteWorld>::from_translation(origin)
            .ok_or(AnchorError::DegenerateTransform)?;
        Ok(self.absolute_world_to_ecef() * shift)
    }

    /// Maps ECEF into relative world coordinates; see
    /// [`ReferenceFrame::relative_world_to_ecef`] for `origin`.
    fn ecef_to_relative_world(
        &self,
        origin: Option<Vector3>,
    ) -> Result<AffineTransform<Ecef, RelativeWorld>> {
        let origin = origin.unwrap_or_else(|| self.world_origin());
        let shift = AffineTransform::<AbsoluteWorld, RelativeWorld>::from_translation(-origin)
            .ok_or(AnchorError::DegenerateTransform)?;
        Ok(shift * self.ecef_to_absolute_world())
    }
}

#[derive(Debug, Clone, Copy)]
struct GeoreferenceState {
    origin: Llh,
    ellipsoid: Ellipsoid,
    units_per_meter: f64,
    world_origin: Vector3,
    absolute_to_ecef: AffineTransform<AbsoluteWorld, Ecef>,
    ecef_to_absolute: AffineTransform<Ecef, AbsoluteWorld>,
}

impl GeoreferenceState {
    fn new(
        origin: Llh,
        ellipsoid: Ellipsoid,
        units_per_meter: f64,
        world_origin: Vector3,
    ) -> Result<Self> {
        if !(units_per_meter.is_finite() && units_per_meter > 0.) {
            return Err(AnchorError::Configuration(format!(
                "units per meter must be positive and finite, got {units_per_meter}"
            )));
        }
        if !world_origin.iter().all(|c| c.is_finite()) {
            return Err(AnchorError::Configuration(format!(
                "world origin must be finite, got {world_origin:?}"
            )));
        }

        let absolute_to_ecef = east_north_up(&ellipsoid, &origin, units_per_meter)
            .ok_or_else(|| {
                AnchorError::Configuration(format!("cannot place a georeference at {origin}"))
            })?;
        let ecef_to_absolute = absolute_to_ecef
            .inverse()
            .ok_or(AnchorError::DegenerateTransform)?;

        Ok(Self {
            origin,
            ellipsoid,
            units_per_meter,
            world_origin,
            absolute_to_ecef,
            ecef_to_absolute,
        })
    }
}

/// The East-North-Up frame tangent to `ellipsoid` at `origin`, taking world units to ECEF metres.
fn east_north_up(
    ellipsoid: &Ellipsoid,
    origin: &Llh,
    units_per_meter: f64,
) -> Option<AffineTransform<AbsoluteWorld, Ecef>> {
    let lambda = origin.longitude.get::<radian>();
    let up = ellipsoid.geodetic_surface_normal_at(origin);
    let east = Vector3::new(-lambda.sin(), lambda.cos(), 0.);
    let north = up.cross(&east);

    let basis = Matrix3::from_columns(&[east, north, up]) / units_per_meter;
    let center = ellipsoid.longitude_latitude_height_to_ecef(origin);
    AffineTransform::from_parts(basis, center.coords)
}

/// An in-memory [`ReferenceFrame`]: an East-North-Up world placed at a geodetic origin.
///
/// The absolute world's +X points east, +Y north and +Z up at [`Georeference::origin`], and one
/// world unit is `1 / units_per_meter` metres. Every setter recomputes both matrices and then
/// notifies subscribers.
pub struct Georeference {
    state: RefCell<GeoreferenceState>,
    changed: Broadcaster,
}

impl Georeference {
    /// Places a metre-scaled world at `origin` on `ellipsoid`, with the floating origin at zero.
    pub fn new(origin: Llh, ellipsoid: Ellipsoid) -> Result<Self> {
        Ok(Self {
            state: RefCell::new(GeoreferenceState::new(
                origin,
                ellipsoid,
                1.,
                Vector3::zeros(),
            )?),
            changed: Broadcaster::new(),
        })
    }

    /// Builds a georeference from configuration.
    pub fn from_settings(settings: &GeoreferenceSettings) -> Result<Self> {
        let origin = settings.origin().ok_or_else(|| {
            AnchorError::Configuration(format!(
                "georeference origin latitude {} is out of range",
                settings.origin_latitude
            ))
        })?;
        let ellipsoid = settings.ellipsoid().ok_or_else(|| {
            AnchorError::Configuration(format!(
                "invalid ellipsoid radii {:?}",
                settings.ellipsoid_radii
            ))
        })?;
        Ok(Self {
            state: RefCell::new(GeoreferenceState::new(
                origin,
                ellipsoid,
                settings.units_per_meter,
                settings.world_origin_vector(),
            )?),
            changed: Broadcaster::new(),
        })
    }

    /// The geodetic position of the absolute-world origin.
    #[must_use]
    pub fn origin(&self) -> Llh {
        self.state.borrow().origin
    }

    /// How many world units make up one metre.
    #[must_use]
    pub fn units_per_meter(&self) -> f64 {
        self.state.borrow().units_per_meter
    }

    /// Moves the absolute-world origin to a new geodetic position.
    pub fn set_origin_longitude_latitude_height(&self, origin: Llh) -> Result<()> {
        self.update(|state| {
            GeoreferenceState::new(origin, state.ellipsoid, state.units_per_meter, state.world_origin)
        })
    }

    /// Switches to a different reference ellipsoid.
    pub fn set_ellipsoid(&self, ellipsoid: Ellipsoid) -> Result<()> {
        self.update(|state| {
            GeoreferenceState::new(state.origin, ellipsoid, state.units_per_meter, state.world_origin)
        })
    }

    /// Changes the world scale.
    pub fn set_units_per_meter(&self, units_per_meter: f64) -> Result<()> {
        self.update(|state| {
            GeoreferenceState::new(state.origin, state.ellipsoid, units_per_meter, state.world_origin)
        })
    }

    /// Moves the floating origin and notifies subscribers.
    ///
    /// To move the origin together with all anchored objects in one step, go through an
    /// [`OriginRebaser`](crate::OriginRebaser) instead.
    pub fn set_world_origin(&self, world_origin: Vector3) -> Result<()> {
        self.update(|state| {
            GeoreferenceState::new(state.origin, state.ellipsoid, state.units_per_meter, world_origin)
        })
    }

    /// Moves the floating origin without notifying anyone; the caller has already brought every
    /// dependent up to date.
    pub(crate) fn commit_world_origin(&self, world_origin: Vector3) {
        self.state.borrow_mut().world_origin = world_origin;
    }

    fn update(
        &self,
        next: impl FnOnce(&GeoreferenceState) -> Result<GeoreferenceState>,
    ) -> Result<()> {
        let state = next(&self.state.borrow())?;
        *self.state.borrow_mut() = state;
        tracing::debug!(origin = %state.origin, units_per_meter = state.units_per_meter, "georeference changed");
        // the borrow is released, so handlers are free to read the new state back
        self.changed.broadcast();
        Ok(())
    }
}

impl ReferenceFrame for Georeference {
    fn ellipsoid(&self) -> Ellipsoid {
        self.state.borrow().ellipsoid
    }

    fn world_origin(&self) -> Vector3 {
        self.state.borrow().world_origin
    }

    fn absolute_world_to_ecef(&self) -> AffineTransform<AbsoluteWorld, Ecef> {
        self.state.borrow().absolute_to_ecef
    }

    fn ecef_to_absolute_world(&self) -> AffineTransform<Ecef, AbsoluteWorld> {
        self.state.borrow().ecef_to_absolute
    }

    fn subscribe(&self, handler: ChangeHandler) -> Subscription {
        self.changed.subscribe(handler)
    }
}

impl fmt::Debug for Georeference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Georeference")
            .field("origin", &state.origin)
            .field("ellipsoid", &state.ellipsoid)
            .field("units_per_meter", &state.units_per_meter)
            .field("world_origin", &state.world_origin)
            .field("changed", &self.changed)
            .finish()
    }
}

/// Named georeferences shared between anchors.
///
/// A registry built [`with_default`](FrameRegistry::with_default) creates a georeference on first
/// use of an unknown tag; otherwise looking up an unknown tag is a configuration error.
#[derive(Debug, Default)]
pub struct FrameRegistry {
    frames: RefCell<HashMap<String, Rc<Georeference>>>,
    default_settings: Option<GeoreferenceSettings>,
}

impl FrameRegistry {
    /// A registry that only knows the frames explicitly [inserted](FrameRegistry::insert).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that creates missing frames from `settings`.
    #[must_use]
    pub fn with_default(settings: GeoreferenceSettings) -> Self {
        Self {
            frames: RefCell::default(),
            default_settings: Some(settings),
        }
    }

    /// Registers `frame` under `tag`, returning the frame it replaces.
    pub fn insert(
        &self,
        tag: impl Into<String>,
        frame: Rc<Georeference>,
    ) -> Option<Rc<Georeference>> {
        self.frames.borrow_mut().insert(tag.into(), frame)
    }

    /// Returns the frame registered under `tag`, if any.
    #[must_use]
    pub fn find(&self, tag: &str) -> Option<Rc<Georeference>> {
        self.frames.borrow().get(tag).cloned()
    }

    /// Returns the frame registered under `tag`, creating it from the default settings if needed.
    pub fn find_or_create(&self, tag: &str) -> Result<Rc<Georeference>> {
        if let Some(frame) = self.find(tag) {
            return Ok(frame);
        }
        let Some(settings) = &self.default_settings else {
            return Err(AnchorError::Configuration(format!(
                "no georeference tagged {tag:?} and no default to create one from"
            )));
        };
        let frame = Rc::new(Georeference::from_settings(settings)?);
        tracing::info!(tag, "created default georeference");
        self.insert(tag, Rc::clone(&frame));
        Ok(frame)
    }

    /// Returns how many frames are registered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.borrow().len()
    }

    /// Returns whether no frame is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How an anchor finds its reference frame.
#[derive(Clone)]
pub enum FrameSource {
    /// Use exactly this frame.
    Direct(Rc<dyn ReferenceFrame>),
    /// Look a georeference up by tag, creating it if the registry has a default.
    Tagged {
        registry: Rc<FrameRegistry>,
        tag: String,
    },
}

impl FrameSource {
    /// Looks `tag` up in `registry`.
    pub fn tagged(registry: Rc<FrameRegistry>, tag: impl Into<String>) -> Self {
        Self::Tagged {
            registry,
            tag: tag.into(),
        }
    }

    /// Produces the frame this source designates.
    pub fn resolve(&self) -> Result<Rc<dyn ReferenceFrame>> {
        match self {
            Self::Direct(frame) => Ok(Rc::clone(frame)),
            Self::Tagged { registry, tag } => {
                let frame: Rc<dyn ReferenceFrame> = registry.find_or_create(tag)?;
                Ok(frame)
            }
        }
    }
}

impl From<Rc<Georeference>> for FrameSource {
    fn from(frame: Rc<Georeference>) -> Self {
        Self::Direct(frame)
    }
}

impl fmt::Debug for FrameSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(frame) => f
                .debug_struct("Direct")
                .field("world_origin", &frame.world_origin())
                .finish_non_exhaustive(),
            Self::Tagged { tag, .. } => f.debug_struct("Tagged").field("tag", tag).finish(),
        }
    }
}
