//! End-to-end branching undo/redo scenarios driven through the engine
//! coordinator.

use curvelab_common::Point;
use curvelab_integration_tests::{add_point, coordinator};

#[test]
fn branching_undo_redo_preserves_both_futures() {
    let mut engine = coordinator(false);

    engine.handle_point_action(add_point(10.0, 20.0));
    engine.handle_point_action(add_point(30.0, 40.0));
    engine.handle_point_action(add_point(50.0, 60.0));

    engine.undo();
    engine.undo();
    assert_eq!(engine.store().active_points(), vec![Point::new(10.0, 20.0)]);

    engine.handle_point_action(add_point(100.0, 100.0));

    let branches = engine.branches();
    assert_eq!(branches.len(), 2);
    let current = branches.iter().find(|b| b.is_current).unwrap();
    assert_eq!(current.description, "Add point to blue curve");
    assert_eq!(
        engine.store().active_points(),
        vec![Point::new(10.0, 20.0), Point::new(100.0, 100.0)]
    );

    // Switching to the other branch restores the original future; the tip
    // of that branch is found by walking its children.
    let other = branches.iter().find(|b| !b.is_current).unwrap();
    engine.switch_to_branch(other.node);
    engine.jump_to_next_intersection_or_end();
    assert_eq!(
        engine.store().active_points(),
        vec![
            Point::new(10.0, 20.0),
            Point::new(30.0, 40.0),
            Point::new(50.0, 60.0)
        ]
    );
}

#[test]
fn intersection_cycling_changes_nothing_until_redo() {
    let mut engine = coordinator(false);

    engine.handle_point_action(add_point(10.0, 20.0));
    engine.handle_point_action(add_point(30.0, 40.0));
    engine.undo();
    engine.handle_point_action(add_point(100.0, 100.0));
    engine.undo();

    assert!(engine.is_at_intersection());
    let before = engine.store().snapshot();

    engine.switch_to_next_branch();
    engine.switch_to_next_branch();
    assert_eq!(engine.store().snapshot(), before);
    let info = engine.intersection_info().unwrap();
    assert_eq!(info.total_branches, 2);
    assert_eq!(info.current_branch, 1);

    engine.switch_to_next_branch();
    engine.redo();
    assert_eq!(
        engine.store().active_points(),
        vec![Point::new(10.0, 20.0), Point::new(100.0, 100.0)]
    );
}

#[test]
fn load_curves_round_trip_restores_state_and_selection() {
    let mut engine = coordinator(false);
    engine.handle_point_action(add_point(1.0, 1.0));
    engine.handle_point_action(add_point(2.0, 2.0));
    let before_curves = engine.store().snapshot();
    let before_active = engine.store().active_curve_id().map(String::from);

    let json = r##"{"curves":[{"id":"curve-red","color":"#ff4a9e","points":[{"x":100.0,"y":200.0},{"x":300.0,"y":400.0}]}],"activeCurveId":"curve-red"}"##;
    engine.load_document_json(json).unwrap();
    assert_eq!(engine.store().active_curve_id(), Some("curve-red"));
    assert_eq!(
        engine.store().active_points(),
        vec![Point::new(100.0, 200.0), Point::new(300.0, 400.0)]
    );

    engine.undo();
    assert_eq!(engine.store().snapshot(), before_curves);
    assert_eq!(
        engine.store().active_curve_id().map(String::from),
        before_active
    );
}
