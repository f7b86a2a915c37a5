//! The host engine as anchors see it.
//!
//! An anchor drives exactly one [`SceneNode`] and may sit inside a [`ParentPlacement`], such as a
//! georeferenced dataset that was itself moved around the world. [`TransformNode`] and
//! [`DatasetPlacement`] are in-memory implementations for hosts without a scene graph of their
//! own (and for tests).

use crate::events::{Broadcaster, ChangeHandler, Subscription};
use crate::reference_frame::ReferenceFrame;
use crate::{LocalTransform, ParentTransform};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How a scene node should get from its old transform to a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Teleport {
    /// Jump straight to the new transform; physics sees no motion in between.
    #[default]
    Instant,
    /// Sweep from the old transform to the new one, as if the node had moved there.
    Sweep,
}

impl Teleport {
    pub(crate) fn from_setting(teleport_when_updating_transform: bool) -> Self {
        if teleport_when_updating_transform {
            Self::Instant
        } else {
            Self::Sweep
        }
    }
}

/// The object an anchor positions.
pub trait SceneNode {
    /// The node's transform in the origin-relative render world.
    fn local_transform(&self) -> LocalTransform;

    /// Replaces the node's transform on behalf of its anchor.
    ///
    /// This is the anchor's own write path: implementations must **not** notify subscribers from
    /// here, or the anchor would be told about the change it just made.
    fn set_local_transform(&self, transform: LocalTransform, teleport: Teleport);

    /// Calls `handler` whenever something other than the anchor moves the node.
    fn subscribe(&self, handler: ChangeHandler) -> Subscription;
}

/// A containing object whose placement is composed on top of the globe to world conversion.
pub trait ParentPlacement {
    /// The parent's current placement, re-read on every recomputation.
    fn transform(&self) -> ParentTransform;

    /// A reference frame the parent carries itself, which anchors inside it prefer over their
    /// own.
    fn reference_frame(&self) -> Option<Rc<dyn ReferenceFrame>> {
        None
    }

    /// Calls `handler` whenever [`ParentPlacement::transform`] changes.
    fn subscribe(&self, handler: ChangeHandler) -> Subscription;
}

/// An in-memory [`SceneNode`].
#[derive(Default)]
pub struct TransformNode {
    transform: Cell<LocalTransform>,
    anchor_writes: Cell<usize>,
    last_teleport: Cell<Option<Teleport>>,
    moved: Broadcaster,
}

impl TransformNode {
    /// A node at `transform`.
    #[must_use]
    pub fn new(transform: LocalTransform) -> Self {
        Self {
            transform: Cell::new(transform),
            ..Self::default()
        }
    }

    /// Moves the node as the host would (an editor drag, a physics step), notifying subscribers.
    pub fn move_to(&self, transform: LocalTransform) {
        self.transform.set(transform);
        self.moved.broadcast();
    }

    /// How many times an anchor has written to this node.
    #[must_use]
    pub fn anchor_writes(&self) -> usize {
        self.anchor_writes.get()
    }

    /// The teleport mode of the most recent anchor write.
    #[must_use]
    pub fn last_teleport(&self) -> Option<Teleport> {
        self.last_teleport.get()
    }
}

impl SceneNode for TransformNode {
    fn local_transform(&self) -> LocalTransform {
        self.transform.get()
    }

    fn set_local_transform(&self, transform: LocalTransform, teleport: Teleport) {
        self.transform.set(transform);
        self.anchor_writes.set(self.anchor_writes.get() + 1);
        self.last_teleport.set(Some(teleport));
    }

    fn subscribe(&self, handler: ChangeHandler) -> Subscription {
        self.moved.subscribe(handler)
    }
}

impl fmt::Debug for TransformNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformNode")
            .field("transform", &self.transform.get())
            .field("anchor_writes", &self.anchor_writes.get())
            .field("last_teleport", &self.last_teleport.get())
            .finish()
    }
}

/// An in-memory [`ParentPlacement`], optionally carrying its own reference frame.
#[derive(Default)]
pub struct DatasetPlacement {
    transform: Cell<ParentTransform>,
    frame: RefCell<Option<Rc<dyn ReferenceFrame>>>,
    moved: Broadcaster,
}

impl DatasetPlacement {
    /// A placement at `transform` without a frame of its own.
    #[must_use]
    pub fn new(transform: ParentTransform) -> Self {
        Self {
            transform: Cell::new(transform),
            ..Self::default()
        }
    }

    /// Gives the placement its own reference frame, which anchors resolved after this call use.
    pub fn set_reference_frame(&self, frame: Option<Rc<dyn ReferenceFrame>>) {
        *self.frame.borrow_mut() = frame;
    }

    /// Moves the placement and notifies subscribers.
    pub fn set_transform(&self, transform: ParentTransform) {
        self.transform.set(transform);
        self.moved.broadcast();
    }
}

impl ParentPlacement for DatasetPlacement {
    fn transform(&self) -> ParentTransform {
        self.transform.get()
    }

    fn reference_frame(&self) -> Option<Rc<dyn ReferenceFrame>> {
        self.frame.borrow().clone()
    }

    fn subscribe(&self, handler: ChangeHandler) -> Subscription {
        self.moved.subscribe(handler)
    }
}

impl fmt::Debug for DatasetPlacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasetPlacement")
            .field("transform", &self.transform.get())
            .field("has_frame", &self.frame.borrow().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Vector3;

    #[test]
    fn anchor_writes_are_silent_host_moves_are_not() {
        let node = TransformNode::default();
        let moves = Rc::new(Cell::new(0));
        let _subscription = {
            let moves = Rc::clone(&moves);
            node.subscribe(Rc::new(move || moves.set(moves.get() + 1)))
        };

        let there = LocalTransform::from_translation(Vector3::new(1., 2., 3.)).unwrap();
        node.set_local_transform(there, Teleport::Sweep);
        assert_eq!(moves.get(), 0);
        assert_eq!(node.anchor_writes(), 1);
        assert_eq!(node.last_teleport(), Some(Teleport::Sweep));
        assert_eq!(node.local_transform(), there);

        node.move_to(LocalTransform::identity());
        assert_eq!(moves.get(), 1);
        assert_eq!(node.anchor_writes(), 1);
    }

    #[test]
    fn teleport_follows_the_setting() {
        assert_eq!(Teleport::from_setting(true), Teleport::Instant);
        assert_eq!(Teleport::from_setting(false), Teleport::Sweep);
        assert_eq!(Teleport::default(), Teleport::Instant);
    }

    #[test]
    fn dataset_placement_notifies_on_move() {
        let placement = DatasetPlacement::default();
        assert!(placement.reference_frame().is_none());
        assert_eq!(placement.transform(), ParentTransform::identity());

        let moves = Rc::new(Cell::new(0));
        let _subscription = {
            let moves = Rc::clone(&moves);
            placement.subscribe(Rc::new(move || moves.set(moves.get() + 1)))
        };
        let scaled = ParentTransform::from_scale(2.).unwrap();
        placement.set_transform(scaled);
        assert_eq!(moves.get(), 1);
        assert_eq!(placement.transform(), scaled);
    }
}
