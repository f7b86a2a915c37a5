//! Anchoring scene nodes to the globe.
//!
//! A [`GlobeAnchor`] keeps one [`SceneNode`] at a precise position on the globe while everything
//! around it moves: the reference frame can be re-targeted, the floating origin rebased, and a
//! parent placement moved, and the node is re-positioned so that it stays where it was on Earth.
//!
//! The anchor holds two representations of the node's placement and tracks which one to trust:
//!
//! - the node's local transform, in the origin-relative render world, and
//! - a [`GlobeTransform`] from the node's space into [`Ecef`](crate::systems::Ecef).
//!
//! While the anchor is [`AnchorPhase::Invalid`], the local transform is the source of truth and
//! the globe transform is derived from it the first time it is needed. Once
//! [`AnchorPhase::Valid`], the globe transform is authoritative and the local transform is only
//! ever re-derived from it, which is what keeps full double precision on the globe no matter how
//! often the render world shifts.
//!
//! ```rust
//! use globe_anchor::{
//!     AnchorSettings, Ellipsoid, Georeference, GlobeAnchor, Llh, LocalTransform, SceneNode,
//!     TransformNode,
//! };
//! use std::rc::Rc;
//!
//! let denver = Llh::from_degrees(-105.25737, 39.736401, 2250.).unwrap();
//! let frame = Rc::new(Georeference::new(denver, Ellipsoid::WGS84).unwrap());
//! let node = Rc::new(TransformNode::new(LocalTransform::identity()));
//!
//! let anchor = GlobeAnchor::new("truck", AnchorSettings::default());
//! anchor.borrow_mut().set_frame_source(frame.into()).unwrap();
//! anchor.borrow_mut().set_scene_node(Some(node.clone())).unwrap();
//! anchor.borrow_mut().attach().unwrap();
//!
//! // the node sat at the georeference origin, so that is where it is anchored
//! let position = anchor.borrow().geodetic_position().unwrap();
//! approx::assert_relative_eq!(position, denver, epsilon = 1e-6);
//! ```

mod state;

pub use state::{
    AnchorRecord, AnchorState, CartographicMirror, FrameChain, CURRENT_RECORD_VERSION,
    VALIDITY_FLAG_VERSION,
};

use crate::config::AnchorSettings;
use crate::error::{AnchorError, Result};
use crate::events::{ChangeHandler, Subscription};
use crate::reference_frame::{FrameRegistry, FrameSource, ReferenceFrame};
use crate::scene::{ParentPlacement, SceneNode, Teleport};
use crate::{GlobeTransform, Llh, LocalTransform, OrientationPolicy, Point3, Vector3};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

/// A shared handle to an anchor; change notifications reach the anchor through it.
pub type AnchorHandle = Rc<RefCell<GlobeAnchor>>;

/// Which of its representations an anchor currently trusts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorPhase {
    /// No reference frame has been resolved, so nothing can be converted.
    Unresolved,
    /// A frame is known but the globe transform is not; the scene node is the source of truth.
    Invalid,
    /// The globe transform is authoritative.
    Valid,
}

/// A target for [`GlobeAnchor::set_globe_position`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GlobePosition {
    /// ECEF metres.
    Ecef(Point3),
    /// Longitude, latitude and height on the frame's ellipsoid.
    Geodetic(Llh),
}

impl From<Llh> for GlobePosition {
    fn from(position: Llh) -> Self {
        Self::Geodetic(position)
    }
}

impl From<Point3> for GlobePosition {
    fn from(position: Point3) -> Self {
        Self::Ecef(position)
    }
}

#[derive(Default)]
struct Subscriptions {
    frame: Option<Subscription>,
    node: Option<Subscription>,
    parent: Option<Subscription>,
}

/// Keeps a [`SceneNode`] at a fixed position on the globe.
///
/// Anchors are created behind an [`AnchorHandle`] so that the reference frame, scene node and
/// parent placement can notify them. Notifications that arrive while the anchor is already
/// borrowed are dropped (with a `trace` event): they can only be echoes of the anchor's own
/// writes.
pub struct GlobeAnchor {
    name: String,
    settings: AnchorSettings,
    source: Option<FrameSource>,
    node: Option<Rc<dyn SceneNode>>,
    parent: Option<Rc<dyn ParentPlacement>>,
    frame: Option<Rc<dyn ReferenceFrame>>,
    subscriptions: Subscriptions,
    attached: bool,
    state: AnchorState,
    this: Weak<RefCell<GlobeAnchor>>,
}

impl GlobeAnchor {
    /// Creates a detached, unresolved anchor.
    pub fn new(name: impl Into<String>, settings: AnchorSettings) -> AnchorHandle {
        let name = name.into();
        Rc::new_cyclic(|this| {
            RefCell::new(Self {
                name,
                settings,
                source: None,
                node: None,
                parent: None,
                frame: None,
                subscriptions: Subscriptions::default(),
                attached: false,
                state: AnchorState::default(),
                this: this.clone(),
            })
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn settings(&self) -> &AnchorSettings {
        &self.settings
    }

    /// Changes how future explicit globe moves treat orientation.
    pub fn set_orientation_policy(&mut self, policy: OrientationPolicy) {
        self.settings.orientation_policy = policy;
    }

    /// Changes how future pushes move the scene node.
    pub fn set_teleport_when_updating_transform(&mut self, teleport: bool) {
        self.settings.teleport_when_updating_transform = teleport;
    }

    /// Which representation the anchor currently trusts.
    #[must_use]
    pub fn phase(&self) -> AnchorPhase {
        match (&self.frame, self.state.is_valid()) {
            (None, _) => AnchorPhase::Unresolved,
            (Some(_), false) => AnchorPhase::Invalid,
            (Some(_), true) => AnchorPhase::Valid,
        }
    }

    /// Whether [`GlobeAnchor::attach`] has been called without a matching detach.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// The anchor's cached globe position in displayable forms.
    #[must_use]
    pub fn mirror(&self) -> &CartographicMirror {
        self.state.mirror()
    }

    /// Starts tracking the scene node.
    ///
    /// Resolves the reference frame and subscribes to the frame, the node and the parent
    /// placement. An anchor that already has an authoritative globe transform (restored, or
    /// re-attached) moves its node there; otherwise the globe transform is derived from where the
    /// node currently is.
    pub fn attach(&mut self) -> Result<()> {
        let result = self.attach_inner();
        self.report("attach", result)
    }

    fn attach_inner(&mut self) -> Result<()> {
        self.resolve_reference_frame()?;
        self.attached = true;
        self.subscribe_to_node();
        self.subscribe_to_parent();
        tracing::debug!(anchor = %self.name, valid = self.state.is_valid(), "attached");

        if self.state.is_valid() {
            match self.push_local_from_globe(None) {
                Ok(_) | Err(AnchorError::MissingSceneNode) => Ok(()),
                Err(error) => Err(error),
            }
        } else {
            match self.node.clone() {
                Some(node) => {
                    let local = node.local_transform();
                    self.update_globe_from_local(&local).map(|_| ())
                }
                None => Ok(()),
            }
        }
    }

    /// Stops tracking: every subscription is dropped and the resolved frame forgotten.
    ///
    /// The globe transform is kept, so attaching again puts the node back where it was on the
    /// globe.
    pub fn detach(&mut self) {
        self.subscriptions = Subscriptions::default();
        self.frame = None;
        self.attached = false;
        tracing::debug!(anchor = %self.name, "detached");
    }

    /// Returns the reference frame, resolving and subscribing to it on first use.
    ///
    /// A parent placement that carries its own frame wins over the anchor's
    /// [`FrameSource`].
    pub fn resolve_reference_frame(&mut self) -> Result<Rc<dyn ReferenceFrame>> {
        if let Some(frame) = &self.frame {
            return Ok(Rc::clone(frame));
        }

        let from_parent = self.parent.as_ref().and_then(|parent| parent.reference_frame());
        let frame = match (from_parent, &self.source) {
            (Some(frame), _) => frame,
            (None, Some(source)) => source.resolve()?,
            (None, None) => {
                return Err(AnchorError::Configuration(format!(
                    "anchor {:?} has nowhere to find a reference frame",
                    self.name
                )))
            }
        };

        self.subscriptions.frame = Some(frame.subscribe(
            self.callback("reference frame changed", Self::on_reference_frame_changed),
        ));
        self.state.refresh_mirror(&frame.ellipsoid());
        self.frame = Some(Rc::clone(&frame));
        tracing::debug!(anchor = %self.name, "resolved reference frame");
        Ok(frame)
    }

    /// The reference frame the anchor is currently bound to, without resolving one.
    #[must_use]
    pub fn resolved_frame(&self) -> Option<Rc<dyn ReferenceFrame>> {
        self.frame.clone()
    }

    /// Forgets the resolved frame. An attached anchor resolves again straight away and moves its
    /// node to match the new frame.
    pub fn invalidate_resolved_frame(&mut self) -> Result<()> {
        self.subscriptions.frame = None;
        self.frame = None;
        if !self.attached {
            return Ok(());
        }
        let result = self
            .resolve_reference_frame()
            .and_then(|_| self.on_reference_frame_changed());
        self.report("re-resolve reference frame", result)
    }

    /// Looks the reference frame up somewhere else from now on.
    pub fn set_frame_source(&mut self, source: FrameSource) -> Result<()> {
        self.source = Some(source);
        self.invalidate_resolved_frame()
    }

    /// Resolves the reference frame by [`AnchorSettings::frame_tag`] in `registry`.
    pub fn use_registry(&mut self, registry: Rc<FrameRegistry>) -> Result<()> {
        let tag = self.settings.frame_tag.clone();
        self.set_frame_source(FrameSource::tagged(registry, tag))
    }

    /// Drives a different scene node, or none.
    ///
    /// A valid anchor moves the new node to its globe position; an invalid one adopts the node's
    /// current position.
    pub fn set_scene_node(&mut self, node: Option<Rc<dyn SceneNode>>) -> Result<()> {
        self.node = node;
        self.subscriptions.node = None;
        if !self.attached {
            return Ok(());
        }
        self.subscribe_to_node();
        let result = if self.state.is_valid() {
            self.push_local_from_globe(None).map(|_| ())
        } else {
            self.sync_from_node()
        };
        match result {
            Err(AnchorError::MissingSceneNode) => Ok(()),
            other => self.report("set scene node", other),
        }
    }

    /// Places the anchor inside a different parent, or none.
    ///
    /// The parent may bring its own reference frame, so the frame is re-resolved.
    pub fn set_parent_placement(&mut self, parent: Option<Rc<dyn ParentPlacement>>) -> Result<()> {
        self.parent = parent;
        self.subscriptions.parent = None;
        if self.attached {
            self.subscribe_to_parent();
        }
        self.invalidate_resolved_frame()
    }

    /// The globe transform, if it is known.
    pub fn globe_transform(&self) -> Result<GlobeTransform> {
        let result = self.state.globe().ok_or(AnchorError::NotYetValid);
        self.report("globe transform", result)
    }

    /// The anchor's position in ECEF metres.
    ///
    /// Fails with [`AnchorError::NotYetValid`] until a globe transform has been derived or set;
    /// [`GlobeAnchor::mirror`] then still reads as zeroes.
    pub fn globe_position(&self) -> Result<Point3> {
        self.globe_transform()
            .map(|globe| Point3::from(globe.translation()))
    }

    /// The anchor's position as longitude, latitude and height.
    pub fn geodetic_position(&self) -> Result<Llh> {
        let result = self.frame.as_ref().ok_or(AnchorError::NotYetResolved).and_then(|frame| {
            let globe = self.state.globe().ok_or(AnchorError::NotYetValid)?;
            frame
                .ecef_to_longitude_latitude_height(&Point3::from(globe.translation()))
                .ok_or(AnchorError::DegenerateTransform)
        });
        self.report("geodetic position", result)
    }

    /// Moves the anchor to a new position on the globe and returns the node's new local
    /// transform.
    ///
    /// An invalid anchor first adopts the node's current placement so that only the position
    /// changes. Orientation is kept in render-world space or adjusted for the curvature of the
    /// globe, depending on [`AnchorSettings::orientation_policy`].
    pub fn set_globe_position(&mut self, position: impl Into<GlobePosition>) -> Result<LocalTransform> {
        let position = position.into();
        let result = self.set_globe_position_inner(position);
        self.report("set globe position", result)
    }

    fn set_globe_position_inner(&mut self, position: GlobePosition) -> Result<LocalTransform> {
        let frame = self.resolve_reference_frame()?;
        let node = self.node.clone().ok_or(AnchorError::MissingSceneNode)?;
        let chain = self.chain(&*frame, None)?;
        let ellipsoid = frame.ellipsoid();

        let current = match self.state.globe() {
            Some(globe) => globe,
            None => chain.globe_from_local(&node.local_transform()),
        };
        let target = match position {
            GlobePosition::Ecef(ecef) => ecef,
            GlobePosition::Geodetic(llh) => frame.longitude_latitude_height_to_ecef(&llh),
        };

        let mut globe = current
            .with_translation(target.coords)
            .ok_or(AnchorError::DegenerateTransform)?;

        let from = ellipsoid.ecef_to_longitude_latitude_height(&Point3::from(current.translation()));
        let to = ellipsoid.ecef_to_longitude_latitude_height(&target);
        if let (Some(from), Some(to)) = (from, to) {
            let correction = self.settings.orientation_policy.correction(
                &ellipsoid,
                chain.ecef_to_world(),
                &from,
                &to,
            );
            if let Some(correction) = correction {
                let local = chain.local_from_globe(&globe);
                let adjusted = local
                    .with_linear(correction * local.linear())
                    .ok_or(AnchorError::DegenerateTransform)?;
                // keep the requested position exact
                globe = chain
                    .globe_from_local(&adjusted)
                    .with_translation(target.coords)
                    .ok_or(AnchorError::DegenerateTransform)?;
            }
        }

        self.state.set_globe(globe, &ellipsoid);
        tracing::debug!(anchor = %self.name, position = %self.state.mirror().geodetic(), "moved on the globe");

        let local = chain.local_from_globe(&globe);
        node.set_local_transform(local, self.teleport());
        Ok(local)
    }

    /// Adopts `local` as the node's placement and derives the globe transform from it.
    ///
    /// Calling this again with the same transform changes nothing.
    pub fn on_local_transform_changed(&mut self, local: &LocalTransform) -> Result<GlobeTransform> {
        let result = self.update_globe_from_local(local);
        self.report("local transform change", result)
    }

    fn update_globe_from_local(&mut self, local: &LocalTransform) -> Result<GlobeTransform> {
        let frame = self.resolve_reference_frame()?;
        let globe = self.chain(&*frame, None)?.globe_from_local(local);
        if self.state.set_globe(globe, &frame.ellipsoid()) {
            tracing::debug!(anchor = %self.name, "globe transform derived from the scene node");
        }
        Ok(globe)
    }

    fn sync_from_node(&mut self) -> Result<()> {
        let node = self.node.clone().ok_or(AnchorError::MissingSceneNode)?;
        self.update_globe_from_local(&node.local_transform())
            .map(|_| ())
    }

    /// Re-derives the node's placement after the reference frame changed.
    ///
    /// Orientation is not adjusted; an invalid anchor has nothing to re-derive.
    pub fn on_reference_frame_changed(&mut self) -> Result<()> {
        if !self.state.is_valid() {
            return Ok(());
        }
        if let Some(frame) = &self.frame {
            self.state.refresh_mirror(&frame.ellipsoid());
        }
        self.push_local_from_globe(None).map(|_| ())
    }

    /// Re-derives the node's placement after the parent placement moved.
    pub fn on_parent_placement_changed(&mut self) -> Result<()> {
        if !self.state.is_valid() {
            return Ok(());
        }
        self.push_local_from_globe(None).map(|_| ())
    }

    /// Keeps the node in place on the globe while the floating origin moves by `-delta`.
    ///
    /// Called before the frame commits the new origin: a valid anchor re-derives its local
    /// transform against `world_origin - delta` without touching the globe transform, so its
    /// local translation moves by `+delta`. An anchor that does not trust its globe transform
    /// simply shifts its node by `delta`.
    ///
    /// A valid anchor needs an already resolved frame and fails with
    /// [`AnchorError::NotYetResolved`] otherwise.
    pub fn apply_world_offset(&mut self, delta: &Vector3) -> Result<LocalTransform> {
        let result = self.apply_world_offset_inner(delta);
        self.report("apply world offset", result)
    }

    fn apply_world_offset_inner(&mut self, delta: &Vector3) -> Result<LocalTransform> {
        if self.state.is_valid() {
            // never resolve here; a detached anchor stays unsubscribed
            let frame = self.frame.clone().ok_or(AnchorError::NotYetResolved)?;
            let origin = crate::rebase::rebased_world_origin(&frame.world_origin(), delta);
            return self.push_local_from_globe(Some(origin));
        }
        let node = self.node.clone().ok_or(AnchorError::MissingSceneNode)?;
        let local = node.local_transform();
        let shifted = local
            .with_translation(local.translation() + delta)
            .ok_or(AnchorError::DegenerateTransform)?;
        node.set_local_transform(shifted, self.teleport());
        Ok(shifted)
    }

    /// Captures the anchor for persistence.
    #[must_use]
    pub fn save(&self) -> AnchorRecord {
        self.state.to_record()
    }

    /// Replaces the anchor's state with a saved one. An attached anchor moves its node there.
    pub fn restore(&mut self, record: &AnchorRecord) -> Result<()> {
        let result = AnchorState::from_record(record).and_then(|state| {
            self.state = state;
            if let Some(frame) = &self.frame {
                self.state.refresh_mirror(&frame.ellipsoid());
            }
            if self.attached && self.state.is_valid() {
                self.push_local_from_globe(None)?;
            }
            Ok(())
        });
        self.report("restore", result)
    }

    /// Marks the anchor as freshly created (or pasted): whatever globe transform it carries is
    /// not trusted, and the node's placement wins.
    pub fn mark_created(&mut self) {
        self.state.invalidate();
    }

    /// Logs and returns a one-line description of the anchor's full state.
    pub fn debug_summary(&self) -> String {
        let summary = self.to_string();
        tracing::info!(anchor = %self.name, "{summary}");
        summary
    }

    fn chain(&self, frame: &dyn ReferenceFrame, origin: Option<Vector3>) -> Result<FrameChain> {
        let parent = self.parent.as_ref().map(|parent| parent.transform());
        FrameChain::new(frame, parent.as_ref(), origin)
    }

    fn push_local_from_globe(&mut self, origin: Option<Vector3>) -> Result<LocalTransform> {
        let frame = self.resolve_reference_frame()?;
        let globe = self.state.globe().ok_or(AnchorError::NotYetValid)?;
        let node = self.node.clone().ok_or(AnchorError::MissingSceneNode)?;
        let local = self.chain(&*frame, origin)?.local_from_globe(&globe);
        node.set_local_transform(local, self.teleport());
        Ok(local)
    }

    fn teleport(&self) -> Teleport {
        Teleport::from_setting(self.settings.teleport_when_updating_transform)
    }

    fn subscribe_to_node(&mut self) {
        self.subscriptions.node = self.node.as_ref().map(|node| {
            node.subscribe(self.callback("scene node moved", Self::sync_from_node))
        });
    }

    fn subscribe_to_parent(&mut self) {
        self.subscriptions.parent = self.parent.as_ref().map(|parent| {
            parent.subscribe(self.callback(
                "parent placement moved",
                Self::on_parent_placement_changed,
            ))
        });
    }

    fn callback(
        &self,
        event: &'static str,
        on_change: fn(&mut GlobeAnchor) -> Result<()>,
    ) -> ChangeHandler {
        let this = self.this.clone();
        Rc::new(move || {
            let Some(handle) = this.upgrade() else {
                return;
            };
            let Ok(mut anchor) = handle.try_borrow_mut() else {
                tracing::trace!(event, "anchor busy, skipping change notification");
                return;
            };
            if let Err(error) = on_change(&mut anchor) {
                tracing::warn!(anchor = %anchor.name, event, %error, "could not follow change");
            }
        })
    }

    fn report<T>(&self, operation: &'static str, result: Result<T>) -> Result<T> {
        if let Err(error) = &result {
            tracing::warn!(anchor = %self.name, operation, %error, "anchor operation failed");
        }
        result
    }
}

impl fmt::Display for GlobeAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {:?}, attached: {}, node: {}, parent: {}, ecef: {:?}, position: {}",
            self.name,
            self.phase(),
            self.attached,
            self.node.is_some(),
            self.parent.is_some(),
            self.state.mirror().ecef().coords.as_slice(),
            self.state.mirror().geodetic(),
        )
    }
}

impl fmt::Debug for GlobeAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobeAnchor")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .field("source", &self.source)
            .field("phase", &self.phase())
            .field("attached", &self.attached)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
