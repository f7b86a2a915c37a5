use approx::assert_relative_eq;
use globe_anchor::anchor::FrameChain;
use globe_anchor::{
    AnchorError, AnchorPhase, AnchorSettings, Ellipsoid, FrameRegistry, Georeference,
    GeoreferenceSettings, GlobeAnchor, GlobePosition, Llh, LocalTransform, OriginRebaser,
    ReferenceFrame, SceneNode, TransformNode, Vector3,
};
use std::rc::Rc;

struct World {
    frame: Rc<Georeference>,
    node: Rc<TransformNode>,
    anchor: globe_anchor::AnchorHandle,
}

fn world_at(origin: Llh, node_at: LocalTransform) -> World {
    let frame = Rc::new(Georeference::new(origin, Ellipsoid::WGS84).unwrap());
    let node = Rc::new(TransformNode::new(node_at));
    let anchor = GlobeAnchor::new("scenario", AnchorSettings::default());
    {
        let mut anchor = anchor.borrow_mut();
        anchor.set_frame_source(Rc::clone(&frame).into()).unwrap();
        anchor.set_scene_node(Some(node.clone())).unwrap();
    }
    World {
        frame,
        node,
        anchor,
    }
}

#[test]
fn attach_at_the_engine_origin() {
    let origin = Llh::from_degrees(-105.25737, 39.736401, 2250.).unwrap();
    let world = world_at(origin, LocalTransform::identity());
    let e0 = world
        .frame
        .absolute_world_to_ecef()
        .transform_point(&globe_anchor::Point3::origin());

    world.anchor.borrow_mut().attach().unwrap();

    let anchor = world.anchor.borrow();
    assert_eq!(anchor.phase(), AnchorPhase::Valid);
    assert_relative_eq!(anchor.globe_position().unwrap(), e0, epsilon = 1e-9);
}

#[test]
fn set_geodetic_position_pushes_once() {
    let world = world_at(
        Llh::from_degrees(40., 40., 0.).unwrap(),
        LocalTransform::identity(),
    );
    world.anchor.borrow_mut().attach().unwrap();
    assert_eq!(world.node.anchor_writes(), 0);

    let target = Llh::from_degrees(45., 45., 1000.).unwrap();
    world
        .anchor
        .borrow_mut()
        .set_globe_position(GlobePosition::Geodetic(target))
        .unwrap();

    let [lon, lat, height] = world.anchor.borrow().geodetic_position().unwrap().to_degrees();
    assert_relative_eq!(lon, 45., epsilon = 1e-9);
    assert_relative_eq!(lat, 45., epsilon = 1e-9);
    assert_relative_eq!(height, 1000., epsilon = 1e-6);
    assert_eq!(world.node.anchor_writes(), 1);
}

#[test]
fn frame_origin_changes_keep_the_globe_position() {
    let world = world_at(
        Llh::from_degrees(2.35, 48.85, 35.).unwrap(),
        LocalTransform::from_translation(Vector3::new(250., -40., 12.)).unwrap(),
    );
    world.anchor.borrow_mut().attach().unwrap();
    let p = world.anchor.borrow().globe_position().unwrap();
    let before = world.node.local_transform();

    world
        .frame
        .set_origin_longitude_latitude_height(Llh::from_degrees(2.30, 48.80, 0.).unwrap())
        .unwrap();
    world
        .frame
        .set_world_origin(Vector3::new(1e4, 0., 0.))
        .unwrap();

    assert_eq!(world.anchor.borrow().globe_position(), Ok(p));
    let after = world.node.local_transform();
    assert!((after.translation() - before.translation()).norm() > 1e3);

    // the node is exactly where the new frame says the unchanged globe position is
    let chain = FrameChain::new(&*world.frame, None, None).unwrap();
    let globe = world.anchor.borrow().globe_transform().unwrap();
    assert_relative_eq!(after, chain.local_from_globe(&globe), epsilon = 1e-9);
}

#[test]
fn querying_an_invalid_anchor_degrades() {
    let world = world_at(
        Llh::from_degrees(0., 0., 0.).unwrap(),
        LocalTransform::identity(),
    );
    world.anchor.borrow_mut().resolve_reference_frame().unwrap();

    let anchor = world.anchor.borrow();
    assert_eq!(anchor.phase(), AnchorPhase::Invalid);
    assert_eq!(anchor.globe_position(), Err(AnchorError::NotYetValid));
    assert_eq!(
        anchor
            .globe_position()
            .unwrap_or_else(|_| globe_anchor::Point3::origin()),
        globe_anchor::Point3::origin()
    );
    assert_eq!(anchor.mirror().ecef(), globe_anchor::Point3::origin());
}

#[test]
fn rebase_is_exact_on_the_globe() {
    let world = world_at(
        Llh::from_degrees(151.2093, -33.8688, 58.).unwrap(),
        LocalTransform::from_translation(Vector3::new(-3_000., 12_000., 40.)).unwrap(),
    );
    world.anchor.borrow_mut().attach().unwrap();
    let p = world.anchor.borrow().globe_position().unwrap();
    let without_rebase = world.node.local_transform();

    let mut rebaser = OriginRebaser::new(Rc::clone(&world.frame));
    rebaser.register(&world.anchor);
    let delta = Vector3::new(3_000., -12_000., 0.);
    let origin = rebaser.rebase(&delta);

    // the origin moved by -delta, so everything moved by +delta relative to it
    assert_eq!(origin, -delta);
    assert_eq!(world.anchor.borrow().globe_position(), Ok(p));
    assert_relative_eq!(
        world.node.local_transform().translation(),
        without_rebase.translation() + delta,
        epsilon = 1e-6
    );

    // and a later host move is interpreted against the committed origin
    world.node.move_to(world.node.local_transform());
    assert_relative_eq!(
        world.anchor.borrow().globe_position().unwrap(),
        p,
        epsilon = 1e-6
    );
}

#[test]
fn anchors_share_a_registry_frame() {
    let registry = Rc::new(FrameRegistry::with_default(GeoreferenceSettings {
        origin_longitude: 8.5417,
        origin_latitude: 47.3769,
        origin_height: 408.,
        ..GeoreferenceSettings::default()
    }));

    let nodes: Vec<_> = (0..3)
        .map(|i| {
            Rc::new(TransformNode::new(
                LocalTransform::from_translation(Vector3::new(f64::from(i) * 100., 0., 0.))
                    .unwrap(),
            ))
        })
        .collect();
    let anchors: Vec<_> = nodes
        .iter()
        .map(|node| {
            let anchor = GlobeAnchor::new("shared", AnchorSettings::default());
            {
                let mut anchor = anchor.borrow_mut();
                anchor.use_registry(Rc::clone(&registry)).unwrap();
                anchor.set_scene_node(Some(node.clone())).unwrap();
                anchor.attach().unwrap();
            }
            anchor
        })
        .collect();
    let positions: Vec<_> = anchors
        .iter()
        .map(|anchor| anchor.borrow().globe_position().unwrap())
        .collect();

    // scaling the shared world re-derives every node, and nobody moves on the globe
    registry
        .find("World")
        .unwrap()
        .set_units_per_meter(100.)
        .unwrap();
    for ((anchor, node), position) in anchors.iter().zip(&nodes).zip(&positions) {
        assert_eq!(anchor.borrow().globe_position().as_ref(), Ok(position));
        assert_eq!(node.anchor_writes(), 1);
    }
    assert_relative_eq!(
        nodes[2].local_transform().translation(),
        Vector3::new(20_000., 0., 0.),
        epsilon = 1e-6
    );
}
