//! Moving the floating origin without moving anything on the globe.
//!
//! Render worlds lose precision far from their origin, so hosts periodically move the origin to
//! wherever the camera is. An [`OriginRebaser`] does that for one [`Georeference`]: every
//! registered anchor first re-derives its local transform against the new origin, and only then is
//! the origin committed, silently, so that anchors are not told about a change they already
//! followed.

use crate::anchor::{AnchorHandle, GlobeAnchor};
use crate::reference_frame::{Georeference, ReferenceFrame};
use crate::Vector3;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// The world origin after shifting the world by `delta`.
///
/// Shifting the world by `delta` moves every object by `+delta` relative to the origin, so the
/// origin itself moves by `-delta`.
#[must_use]
pub fn rebased_world_origin(old: &Vector3, delta: &Vector3) -> Vector3 {
    old - delta
}

/// Shifts the floating origin of a [`Georeference`] and keeps registered anchors on the globe.
#[derive(Debug)]
pub struct OriginRebaser {
    frame: Rc<Georeference>,
    anchors: Vec<Weak<RefCell<GlobeAnchor>>>,
}

impl OriginRebaser {
    #[must_use]
    pub fn new(frame: Rc<Georeference>) -> Self {
        Self {
            frame,
            anchors: Vec::new(),
        }
    }

    /// Includes `anchor` in future rebases until it is dropped.
    pub fn register(&mut self, anchor: &AnchorHandle) {
        self.anchors.push(Rc::downgrade(anchor));
    }

    /// How many registered anchors are still alive.
    #[must_use]
    pub fn live_anchors(&self) -> usize {
        self.anchors.iter().filter(|a| a.strong_count() > 0).count()
    }

    /// Shifts the world by `delta` and returns the new world origin.
    ///
    /// Only attached anchors bound to this frame follow. Anchors inside a placement that brings
    /// its own frame are skipped with a warning, and so are anchors that fail to follow (say,
    /// because they have no scene node); the origin moves regardless.
    pub fn rebase(&mut self, delta: &Vector3) -> Vector3 {
        let origin = rebased_world_origin(&self.frame.world_origin(), delta);
        self.anchors.retain(|anchor| anchor.strong_count() > 0);

        let mut followed = 0;
        for handle in self.anchors.iter().filter_map(Weak::upgrade) {
            let Ok(mut anchor) = handle.try_borrow_mut() else {
                tracing::warn!("anchor borrowed during origin rebase, skipping");
                continue;
            };
            if !anchor.is_attached() {
                tracing::debug!(anchor = %anchor.name(), "detached, left out of origin rebase");
                continue;
            }
            if !anchor
                .resolved_frame()
                .is_some_and(|frame| self.is_rebased_frame(&frame))
            {
                tracing::warn!(
                    anchor = %anchor.name(),
                    "anchor follows a different reference frame, skipping"
                );
                continue;
            }
            if anchor.apply_world_offset(delta).is_ok() {
                followed += 1;
            }
        }

        self.frame.commit_world_origin(origin);
        tracing::debug!(?delta, ?origin, followed, "rebased world origin");
        origin
    }

    fn is_rebased_frame(&self, frame: &Rc<dyn ReferenceFrame>) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(frame), Rc::as_ptr(&self.frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{DatasetPlacement, SceneNode, TransformNode};
    use crate::{AnchorPhase, AnchorSettings, Ellipsoid, Llh, LocalTransform};
    use approx::assert_relative_eq;
    use std::cell::Cell;

    #[test]
    fn origin_moves_against_the_world() {
        assert_eq!(
            rebased_world_origin(&Vector3::new(10., 0., 0.), &Vector3::new(3., -2., 1.)),
            Vector3::new(7., 2., -1.)
        );
    }

    #[test]
    fn rebase_keeps_anchors_on_the_globe() {
        let frame = Rc::new(
            Georeference::new(Llh::from_degrees(8.5, 47.4, 400.).unwrap(), Ellipsoid::WGS84)
                .unwrap(),
        );
        let notified = Rc::new(Cell::new(0));
        let _subscription = {
            let notified = Rc::clone(&notified);
            frame.subscribe(Rc::new(move || notified.set(notified.get() + 1)))
        };

        let node = Rc::new(TransformNode::new(
            LocalTransform::from_translation(Vector3::new(100., 200., 0.)).unwrap(),
        ));
        let anchor = GlobeAnchor::new("rebased", AnchorSettings::default());
        {
            let mut anchor = anchor.borrow_mut();
            anchor.set_frame_source(Rc::clone(&frame).into()).unwrap();
            anchor.set_scene_node(Some(node.clone())).unwrap();
            anchor.attach().unwrap();
        }
        let dropped = GlobeAnchor::new("dropped", AnchorSettings::default());

        let mut rebaser = OriginRebaser::new(Rc::clone(&frame));
        rebaser.register(&anchor);
        rebaser.register(&dropped);
        drop(dropped);
        assert_eq!(rebaser.live_anchors(), 1);

        let position = anchor.borrow().globe_position().unwrap();
        let origin = rebaser.rebase(&Vector3::new(-100., -200., 0.));

        assert_eq!(origin, Vector3::new(100., 200., 0.));
        assert_eq!(frame.world_origin(), origin);
        assert_eq!(notified.get(), 0);
        assert_eq!(anchor.borrow().globe_position(), Ok(position));
        assert_relative_eq!(
            node.local_transform().translation(),
            Vector3::zeros(),
            epsilon = 1e-6
        );
    }

    fn zurich() -> Rc<Georeference> {
        Rc::new(
            Georeference::new(Llh::from_degrees(8.5, 47.4, 400.).unwrap(), Ellipsoid::WGS84)
                .unwrap(),
        )
    }

    #[test]
    fn detached_anchors_stay_detached() {
        let frame = zurich();
        let node = Rc::new(TransformNode::new(
            LocalTransform::from_translation(Vector3::new(1., 2., 3.)).unwrap(),
        ));
        let anchor = GlobeAnchor::new("detached", AnchorSettings::default());
        {
            let mut anchor = anchor.borrow_mut();
            anchor.set_frame_source(Rc::clone(&frame).into()).unwrap();
            anchor.set_scene_node(Some(node.clone())).unwrap();
            anchor.attach().unwrap();
        }
        let mut rebaser = OriginRebaser::new(Rc::clone(&frame));
        rebaser.register(&anchor);
        anchor.borrow_mut().detach();

        rebaser.rebase(&Vector3::new(10., 0., 0.));
        frame.set_units_per_meter(2.).unwrap();

        let anchor = anchor.borrow();
        assert_eq!(anchor.phase(), AnchorPhase::Unresolved);
        assert!(!anchor.is_attached());
        assert_eq!(node.anchor_writes(), 0);
        assert_eq!(
            node.local_transform(),
            LocalTransform::from_translation(Vector3::new(1., 2., 3.)).unwrap()
        );
    }

    #[test]
    fn anchors_in_another_frame_are_left_alone() {
        let world = zurich();
        let dataset: Rc<dyn ReferenceFrame> = Rc::new(
            Georeference::new(Llh::from_degrees(8.6, 47.3, 500.).unwrap(), Ellipsoid::WGS84)
                .unwrap(),
        );
        let placement = Rc::new(DatasetPlacement::default());
        placement.set_reference_frame(Some(dataset));

        let node = Rc::new(TransformNode::new(
            LocalTransform::from_translation(Vector3::new(100., 0., 0.)).unwrap(),
        ));
        let anchor = GlobeAnchor::new("in a dataset", AnchorSettings::default());
        {
            let mut anchor = anchor.borrow_mut();
            anchor.set_frame_source(Rc::clone(&world).into()).unwrap();
            anchor.set_parent_placement(Some(placement)).unwrap();
            anchor.set_scene_node(Some(node.clone())).unwrap();
            anchor.attach().unwrap();
        }
        let position = anchor.borrow().globe_position().unwrap();
        let before = node.local_transform();

        let mut rebaser = OriginRebaser::new(Rc::clone(&world));
        rebaser.register(&anchor);
        rebaser.rebase(&Vector3::new(-100., 0., 0.));

        assert_eq!(node.local_transform(), before);
        assert_eq!(node.anchor_writes(), 0);

        // the dataset's own origin never moved, so a host move in place is still in place
        node.move_to(before);
        assert_relative_eq!(
            anchor.borrow().globe_position().unwrap(),
            position,
            epsilon = 1e-6
        );
    }
}
