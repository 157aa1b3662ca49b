//! Multi-replica convergence scenarios, with the hub's fan-out simulated
//! by shuttling change blobs directly between coordinators.

use std::sync::Arc;

use curvelab_common::{FixedTimeProvider, Point};
use curvelab_crdt::ReplicatedDocument;
use curvelab_engine::EngineCoordinator;
use curvelab_integration_tests::{add_point, coordinator, shuttle};
use curvelab_session::SessionEvent;

fn join_pair() -> (EngineCoordinator, EngineCoordinator) {
    let mut a = coordinator(true);
    let mut b = coordinator(true);

    let hub = ReplicatedDocument::new("hub-default", "hub", Arc::new(FixedTimeProvider::new(42)));
    a.handle_session_event(SessionEvent::Connected {
        session_id: "default".to_string(),
        document_state: hub.save().unwrap(),
        is_first_user: true,
    });
    // B joins with the state the hub would hold after folding in A's seed.
    let mut hub_after_a = ReplicatedDocument::new(
        "hub-default-after",
        "hub",
        Arc::new(FixedTimeProvider::new(42)),
    );
    hub_after_a.load(&hub.save().unwrap(), true).unwrap();
    for blob in a.drain_outgoing() {
        hub_after_a.apply_remote_changes(&blob).unwrap();
    }
    b.handle_session_event(SessionEvent::Connected {
        session_id: "default".to_string(),
        document_state: hub_after_a.save().unwrap(),
        is_first_user: false,
    });
    b.drain_outgoing();
    (a, b)
}

#[test]
fn concurrent_adds_converge_to_identical_state() {
    let (mut a, mut b) = join_pair();

    // Both replicas edit the same (synced) active curve concurrently.
    a.handle_point_action(add_point(10.0, 10.0));
    b.handle_point_action(add_point(20.0, 20.0));

    shuttle(&mut a, &mut b);
    shuttle(&mut b, &mut a);

    let points_a = a.store().curves()[0].points.clone();
    let points_b = b.store().curves()[0].points.clone();
    assert_eq!(points_a.len(), 2);
    assert_eq!(points_a, points_b);
    assert!(points_a.contains(&Point::new(10.0, 10.0)));
    assert!(points_a.contains(&Point::new(20.0, 20.0)));

    // The replicated documents converge structurally, not just the stores.
    assert_eq!(a.document().curves(), b.document().curves());
    assert_eq!(a.document().shared_history(), b.document().shared_history());
}

#[test]
fn blob_delivery_order_does_not_matter() {
    let (mut a, mut b) = join_pair();

    a.handle_point_action(add_point(1.0, 1.0));
    a.handle_point_action(add_point(2.0, 2.0));
    let blobs = a.drain_outgoing();
    let sender = a.client_id().to_string();

    // Deliver to B in reverse order; the parked-operation retry absorbs
    // the inversion.
    for blob in blobs.iter().rev() {
        b.handle_session_event(SessionEvent::Change {
            sender_id: sender.clone(),
            changes: blob.clone(),
        });
    }
    assert_eq!(a.document().curves(), b.document().curves());
    assert_eq!(a.store().curves()[0].points, b.store().curves()[0].points);
}

#[test]
fn shared_undo_propagates_across_peers() {
    let (mut a, mut b) = join_pair();

    for (x, y) in [(1.0, 1.0), (2.0, 2.0), (3.0, 3.0)] {
        a.handle_point_action(add_point(x, y));
        shuttle(&mut a, &mut b);
    }
    assert_eq!(b.store().curves()[0].points.len(), 3);

    // B undoes collaboratively; A receives the pointer move plus the
    // spliced two-point state.
    assert!(b.can_undo());
    assert!(b.undo());
    assert_eq!(b.store().curves()[0].points.len(), 2);

    shuttle(&mut b, &mut a);
    assert_eq!(a.store().curves()[0].points.len(), 2);
    assert_eq!(
        a.document().shared_history().current_node_id,
        b.document().shared_history().current_node_id
    );

    // And redo brings the third point back everywhere.
    assert!(a.can_redo());
    assert!(a.redo());
    shuttle(&mut a, &mut b);
    assert_eq!(a.store().curves()[0].points.len(), 3);
    assert_eq!(b.store().curves()[0].points.len(), 3);
}

#[test]
fn remote_overwrite_does_not_touch_local_history() {
    let (mut a, mut b) = join_pair();

    a.handle_point_action(add_point(5.0, 5.0));
    let b_shared_before = b.document().shared_history().nodes.len();
    shuttle(&mut a, &mut b);

    // B's shared history grew by A's node, but B still has nothing to undo
    // in its local tree (collaboration is on, so can_undo reports the
    // shared path; check the store followed the overwrite instead).
    assert!(b.store().curves()[0].points.contains(&Point::new(5.0, 5.0)));
    assert_eq!(
        b.document().shared_history().nodes.len(),
        b_shared_before + 1
    );
}
