use super::*;
use crate::frame::{Point, ServerMessage};
use crate::services::strokes::{StrokeKey, StrokeMeta};
use crate::state::test_helpers::{assert_no_frame, recv_frame, seed_session, test_app_state};
use tokio::sync::mpsc;

#[tokio::test]
async fn connect_admits_and_broadcasts_count_to_everyone() {
    let state = test_app_state();
    let (_existing, mut rx_existing) = seed_session(&state).await;

    let (tx, mut rx) = mpsc::channel(16);
    let id = connect(&state, tx, None).await;

    assert!(state.sessions.contains(&id).await);
    assert_eq!(recv_frame(&mut rx_existing).await, ServerMessage::UserCount { count: 2 });
    assert_eq!(recv_frame(&mut rx).await, ServerMessage::UserCount { count: 2 });
}

#[tokio::test]
async fn connected_session_waits_for_replay_before_stroke_traffic() {
    let state = test_app_state();
    let (a, _rx_a) = seed_session(&state).await;

    let (tx, mut rx) = mpsc::channel(16);
    let joiner = connect(&state, tx, None).await;
    assert_eq!(recv_frame(&mut rx).await, ServerMessage::UserCount { count: 2 });

    let update = ServerMessage::LineUpdate { line_id: "l1".into(), point: Point::new(1, 1) };
    crate::services::broadcast::broadcast_except(&state, &update, &a).await;
    assert_no_frame(&mut rx).await;

    crate::services::replay::take_replay(&state, &joiner).await;
    crate::services::broadcast::broadcast_except(&state, &update, &a).await;
    assert_eq!(recv_frame(&mut rx).await, update);
}

#[tokio::test]
async fn disconnect_cascades_strokes_and_broadcasts_decrement() {
    let state = test_app_state();
    let (a, _rx_a) = seed_session(&state).await;
    let (b, mut rx_b) = seed_session(&state).await;
    state
        .strokes
        .begin(
            StrokeKey::new(&a, "l1"),
            Point::new(0, 0),
            StrokeMeta { color: "#f00".into(), platform: None },
        )
        .await;
    state
        .strokes
        .begin(
            StrokeKey::new(&b, "l2"),
            Point::new(0, 0),
            StrokeMeta { color: "#0f0".into(), platform: None },
        )
        .await;

    assert!(disconnect(&state, &a).await);

    assert!(state.strokes.get(&a, "l1").await.is_none());
    assert!(state.strokes.get(&b, "l2").await.is_some());
    assert_eq!(recv_frame(&mut rx_b).await, ServerMessage::UserCount { count: 1 });
}

#[tokio::test]
async fn disconnect_twice_runs_cleanup_once() {
    let state = test_app_state();
    let (a, _rx_a) = seed_session(&state).await;
    let (_b, mut rx_b) = seed_session(&state).await;

    assert!(disconnect(&state, &a).await);
    assert_eq!(recv_frame(&mut rx_b).await, ServerMessage::UserCount { count: 1 });

    assert!(!disconnect(&state, &a).await);
    assert_no_frame(&mut rx_b).await;
}

#[tokio::test]
async fn concurrent_admissions_and_removals_settle_on_the_difference() {
    let state = test_app_state();
    let (_observer, mut rx_observer) = seed_session(&state).await;

    let mut handles = Vec::new();
    for _ in 0..20 {
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            let (tx, rx) = mpsc::channel(64);
            let id = connect(&state, tx, None).await;
            (id, rx)
        }));
    }
    let mut sessions = Vec::new();
    for h in handles {
        sessions.push(h.await.expect("connect task"));
    }

    let mut handles = Vec::new();
    for (id, _rx) in sessions.drain(..8) {
        let state = state.clone();
        handles.push(tokio::spawn(async move { disconnect(&state, &id).await }));
    }
    for h in handles {
        assert!(h.await.expect("disconnect task"));
    }

    // 1 observer + 20 admitted - 8 removed.
    assert_eq!(state.sessions.count().await, 13);

    let mut last = None;
    while let Ok(payload) = rx_observer.try_recv() {
        last = Some(serde_json::from_str::<ServerMessage>(&payload).expect("server message"));
    }
    // The final count broadcast reflects quiescence.
    assert_eq!(last, Some(ServerMessage::UserCount { count: 13 }));
}
