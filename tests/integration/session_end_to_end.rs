//! Full-stack session tests: a real hub served over a local WebSocket,
//! real session clients, and engine coordinators on both ends.

use std::sync::Arc;
use std::time::Duration;

use curvelab_common::{Point, SystemTimeProvider};
use curvelab_engine::{EngineConfig, EngineCoordinator};
use curvelab_hub::server::{router, AppState};
use curvelab_hub::{HubConfig, SessionRegistry};
use curvelab_integration_tests::add_point;

/// Serve a hub on an ephemeral port and return its base URL.
async fn spawn_hub() -> String {
    let state = AppState {
        registry: Arc::new(SessionRegistry::new()),
        config: HubConfig::default(),
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind hub listener");
    let addr = listener.local_addr().expect("listener addr");
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.expect("serve hub");
    });
    format!("ws://{addr}")
}

fn engine(hub_url: &str, session_id: &str) -> EngineCoordinator {
    let config = EngineConfig {
        hub_url: hub_url.to_string(),
        session_id: session_id.to_string(),
        user_name: "tester".to_string(),
        collaboration_enabled: true,
    };
    EngineCoordinator::new(config, Arc::new(SystemTimeProvider))
}

/// Poll the engine until `predicate` holds or the timeout expires.
async fn wait_for(engine: &mut EngineCoordinator, predicate: impl Fn(&EngineCoordinator) -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        engine.poll_session();
        if predicate(engine) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for session state"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn first_user_seeds_session_and_second_user_adopts_it() {
    let hub_url = spawn_hub().await;

    // Peer A starts with local state, then joins.
    let mut a = engine(&hub_url, "default");
    a.handle_point_action(add_point(1.0, 1.0));
    a.connect();
    wait_for(&mut a, |e| e.is_connected()).await;

    // Peer B joins afterwards and must see A's curve after the sync
    // handshake alone.
    let mut b = engine(&hub_url, "default");
    b.connect();
    wait_for(&mut b, |e| {
        e.is_connected()
            && e.store()
                .curves()
                .iter()
                .any(|c| c.points.contains(&Point::new(1.0, 1.0)))
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn changes_fan_out_to_connected_peers() {
    let hub_url = spawn_hub().await;

    let mut a = engine(&hub_url, "fanout");
    a.connect();
    wait_for(&mut a, |e| e.is_connected()).await;

    let mut b = engine(&hub_url, "fanout");
    b.connect();
    wait_for(&mut b, |e| e.is_connected()).await;

    a.handle_point_action(add_point(7.0, 8.0));
    wait_for(&mut b, |e| {
        e.store()
            .curves()
            .iter()
            .any(|c| c.points.contains(&Point::new(7.0, 8.0)))
    })
    .await;

    // Presence reached B as well, either through the CRDT or the fast
    // path.
    wait_for(&mut b, |e| !e.frame().users.is_empty()).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn sessions_are_isolated_by_id() {
    let hub_url = spawn_hub().await;

    let mut a = engine(&hub_url, "room-1");
    a.connect();
    wait_for(&mut a, |e| e.is_connected()).await;
    a.handle_point_action(add_point(1.0, 1.0));

    let mut b = engine(&hub_url, "room-2");
    b.connect();
    wait_for(&mut b, |e| e.is_connected()).await;

    // Give fan-out a moment, then confirm nothing leaked across sessions.
    tokio::time::sleep(Duration::from_millis(200)).await;
    b.poll_session();
    assert!(b
        .store()
        .curves()
        .iter()
        .all(|c| !c.points.contains(&Point::new(1.0, 1.0))));
}

#[tokio::test(flavor = "multi_thread")]
async fn shared_undo_round_trips_through_the_hub() {
    let hub_url = spawn_hub().await;

    let mut a = engine(&hub_url, "undo");
    a.connect();
    wait_for(&mut a, |e| e.is_connected()).await;

    let mut b = engine(&hub_url, "undo");
    b.connect();
    wait_for(&mut b, |e| e.is_connected()).await;

    for (x, y) in [(1.0, 1.0), (2.0, 2.0), (3.0, 3.0)] {
        a.handle_point_action(add_point(x, y));
    }
    wait_for(&mut b, |e| {
        e.store().curves().iter().any(|c| c.points.len() == 3)
    })
    .await;

    assert!(b.can_undo());
    assert!(b.undo());
    wait_for(&mut a, |e| {
        e.store().curves().iter().any(|c| c.points.len() == 2)
    })
    .await;
}
