//! Shared helpers for the curvelab integration test suite.

use std::sync::Arc;

use curvelab_common::{FixedTimeProvider, Point};
use curvelab_engine::{EngineConfig, EngineCoordinator, PointAction, PointActionKind};

/// Build a coordinator with a deterministic clock.
pub fn coordinator(collaboration: bool) -> EngineCoordinator {
    let config = EngineConfig {
        collaboration_enabled: collaboration,
        ..EngineConfig::default()
    };
    EngineCoordinator::new(config, Arc::new(FixedTimeProvider::new(42)))
}

pub fn add_point(x: f64, y: f64) -> PointAction {
    PointAction {
        kind: PointActionKind::Add,
        point: Point::new(x, y),
        index: None,
        old_point: None,
    }
}

/// Deliver every queued change blob from `from` to `to`, as the hub's
/// fan-out would.
pub fn shuttle(from: &mut EngineCoordinator, to: &mut EngineCoordinator) {
    let sender = from.client_id().to_string();
    for blob in from.drain_outgoing() {
        to.handle_session_event(curvelab_session::SessionEvent::Change {
            sender_id: sender.clone(),
            changes: blob,
        });
    }
}
