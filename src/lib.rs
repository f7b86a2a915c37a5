//! This library keeps objects in a floating-origin render world pinned to precise positions on the
//! globe.
//!
//! Game engines and other real-time renderers work in single- or double-precision coordinates
//! around a movable origin. Geospatial data, on the other hand, lives on a reference
//! [`Ellipsoid`] and needs the full precision of [`Ecef`](systems::Ecef) coordinates. A
//! [`GlobeAnchor`] bridges the two: it tracks a [`SceneNode`]'s placement both as a local
//! transform in the render world and as a [`GlobeTransform`] into ECEF, and keeps the two in
//! agreement as the node is moved, the [`ReferenceFrame`] is re-targeted, a [`ParentPlacement`]
//! is moved, or the world origin is rebased by an [`OriginRebaser`].
//!
//! Transforms are [`AffineTransform`]s, generic over the [`CoordinateSystem`] they map out of and
//! into, so that, say, a transform into the [`RelativeWorld`](systems::RelativeWorld) cannot be
//! used where one into [`Ecef`](systems::Ecef) is expected. The [`system!`] macro declares
//! additional coordinate systems.
//!
//! # Examples
//!
//! Anchor a node somewhere near Zürich, then move the floating origin to where the node is to
//! regain precision:
//!
//! ```
//! use globe_anchor::{
//!     AnchorSettings, Ellipsoid, Georeference, GlobeAnchor, Llh, LocalTransform, OriginRebaser,
//!     SceneNode, TransformNode, Vector3,
//! };
//! use std::rc::Rc;
//!
//! // the absolute world is East-North-Up at the georeference origin, in metres
//! let origin = Llh::from_degrees(8.5417, 47.3769, 408.).expect("latitude is in [-90, 90]");
//! let frame = Rc::new(Georeference::new(origin, Ellipsoid::WGS84)?);
//!
//! // a node 20km east of the origin
//! let node = Rc::new(TransformNode::new(
//!     LocalTransform::from_translation(Vector3::new(20_000., 0., 0.)).expect("finite"),
//! ));
//!
//! let anchor = GlobeAnchor::new("antenna", AnchorSettings::default());
//! {
//!     let mut anchor = anchor.borrow_mut();
//!     anchor.set_frame_source(Rc::clone(&frame).into())?;
//!     anchor.set_scene_node(Some(node.clone()))?;
//!     anchor.attach()?;
//! }
//! let on_the_globe = anchor.borrow().globe_position()?;
//!
//! // shifting the world by -20km puts the node back at the render origin...
//! let mut rebaser = OriginRebaser::new(Rc::clone(&frame));
//! rebaser.register(&anchor);
//! rebaser.rebase(&Vector3::new(-20_000., 0., 0.));
//! assert!(node.local_transform().translation().norm() < 1e-6);
//!
//! // ...without moving it on the globe at all
//! assert_eq!(anchor.borrow().globe_position()?, on_the_globe);
//! # Ok::<(), globe_anchor::AnchorError>(())
//! ```

#[macro_use]
mod coordinate_systems;

mod ellipsoid;
mod error;

pub mod anchor;
pub mod config;
pub mod events;
pub mod geodetic;
pub mod orientation;
pub mod rebase;
pub mod reference_frame;
pub mod scene;
pub mod transform;

/// A point in one of the Cartesian [`systems`], in that system's units.
pub type Point3 = nalgebra::Point3<f64>;
/// A displacement in one of the Cartesian [`systems`], in that system's units.
pub type Vector3 = nalgebra::Vector3<f64>;
/// The linear part (rotation, scale and shear) of an [`AffineTransform`].
pub type Matrix3 = nalgebra::Matrix3<f64>;
/// The homogeneous matrix of an [`AffineTransform`].
pub type Matrix4 = nalgebra::Matrix4<f64>;

/// Maps an anchored object's own space into ECEF; authoritative once the anchor is valid.
pub type GlobeTransform = AffineTransform<systems::AnchorLocal, systems::Ecef>;
/// A scene node's placement in the origin-relative render world.
pub type LocalTransform = AffineTransform<systems::AnchorLocal, systems::RelativeWorld>;
/// Where a parent placement puts its contents in the absolute world.
pub type ParentTransform = AffineTransform<systems::AbsoluteWorld, systems::AbsoluteWorld>;

// re-structure our imports slightly to better match user expectation
/// The coordinate systems anchors convert between.
pub mod systems {
    pub use super::coordinate_systems::{AbsoluteWorld, AnchorLocal, Ecef, RelativeWorld};
}
pub use anchor::{AnchorHandle, AnchorPhase, AnchorRecord, GlobeAnchor, GlobePosition};
pub use config::{AnchorSettings, GeoreferenceSettings};
pub use coordinate_systems::CoordinateSystem;
pub use ellipsoid::Ellipsoid;
pub use error::{AnchorError, Result};
pub use events::{Broadcaster, ChangeHandler, Subscription};
pub use geodetic::{Components, Llh};
pub use orientation::OrientationPolicy;
pub use rebase::OriginRebaser;
pub use reference_frame::{FrameRegistry, FrameSource, Georeference, ReferenceFrame};
pub use scene::{DatasetPlacement, ParentPlacement, SceneNode, Teleport, TransformNode};
pub use transform::AffineTransform;
