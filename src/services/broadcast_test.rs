use super::*;
use crate::frame::Point;
use crate::state::test_helpers::{assert_no_frame, recv_frame, seed_session, test_app_state};
use tokio::sync::mpsc;

fn line_update(line_id: &str) -> ServerMessage {
    ServerMessage::LineUpdate { line_id: line_id.into(), point: Point::new(1, 2) }
}

#[tokio::test]
async fn broadcast_except_skips_the_excluded_session() {
    let state = test_app_state();
    let (a, mut rx_a) = seed_session(&state).await;
    let (_b, mut rx_b) = seed_session(&state).await;
    let (_c, mut rx_c) = seed_session(&state).await;

    let delivered = broadcast_except(&state, &line_update("l1"), &a).await;
    assert_eq!(delivered, 2);

    assert_eq!(recv_frame(&mut rx_b).await, line_update("l1"));
    assert_eq!(recv_frame(&mut rx_c).await, line_update("l1"));
    assert_no_frame(&mut rx_a).await;
}

#[tokio::test]
async fn broadcast_all_reaches_the_sender_too() {
    let state = test_app_state();
    let (_a, mut rx_a) = seed_session(&state).await;
    let (_b, mut rx_b) = seed_session(&state).await;

    let msg = ServerMessage::LineEnd { line_id: "l1".into(), end_time: 42 };
    assert_eq!(broadcast_all(&state, &msg).await, 2);
    assert_eq!(recv_frame(&mut rx_a).await, msg);
    assert_eq!(recv_frame(&mut rx_b).await, msg);
}

#[tokio::test]
async fn closed_recipient_does_not_abort_delivery_to_others() {
    let state = test_app_state();
    let (a, _rx_a) = seed_session(&state).await;
    let (_b, rx_b) = seed_session(&state).await;
    let (_c, mut rx_c) = seed_session(&state).await;
    drop(rx_b);

    let delivered = broadcast_except(&state, &line_update("l1"), &a).await;
    assert_eq!(delivered, 1);
    assert_eq!(recv_frame(&mut rx_c).await, line_update("l1"));
}

#[tokio::test]
async fn lagging_recipient_is_evicted_and_others_still_receive() {
    let state = test_app_state();
    let (fast, mut rx_fast) = seed_session(&state).await;

    // Slow session with a one-slot queue that is already full.
    let (slow_tx, mut slow_rx) = mpsc::channel(1);
    slow_tx.try_send(frame::encode(&ServerMessage::Pong).expect("encode")).expect("fill backlog");
    let slow = state.sessions.admit(slow_tx, None).await;

    let delivered = broadcast_all(&state, &line_update("l1")).await;
    assert_eq!(delivered, 1);
    assert_eq!(recv_frame(&mut rx_fast).await, line_update("l1"));

    // The slow session got nothing past its backlog and its queue closed.
    assert_eq!(recv_frame(&mut slow_rx).await, ServerMessage::Pong);
    assert!(slow_rx.recv().await.is_none());
    assert!(state.sessions.sender(&slow).await.is_none());
    assert!(state.sessions.sender(&fast).await.is_some());

    // Later broadcasts skip the evicted session.
    assert_eq!(broadcast_all(&state, &line_update("l2")).await, 1);
}

#[tokio::test]
async fn per_recipient_order_matches_broadcast_order() {
    let state = test_app_state();
    let (a, _rx_a) = seed_session(&state).await;
    let (_b, mut rx_b) = seed_session(&state).await;

    for i in 0..50 {
        let msg = ServerMessage::LineUpdate { line_id: "l1".into(), point: Point::new(i, 0) };
        broadcast_except(&state, &msg, &a).await;
    }
    for i in 0..50 {
        let ServerMessage::LineUpdate { point, .. } = recv_frame(&mut rx_b).await else {
            panic!("expected line_update");
        };
        assert_eq!(point, Point::new(i, 0));
    }
}

#[tokio::test]
async fn stroke_traffic_skips_sessions_awaiting_replay() {
    let state = test_app_state();
    let (a, _rx_a) = seed_session(&state).await;
    let (_b, mut rx_b) = seed_session(&state).await;
    let (tx, mut rx_joiner) = mpsc::channel(8);
    let joiner = state.sessions.admit_awaiting_replay(tx, None).await;

    assert_eq!(broadcast_except(&state, &line_update("l1"), &a).await, 1);
    assert_eq!(recv_frame(&mut rx_b).await, line_update("l1"));
    assert_no_frame(&mut rx_joiner).await;

    // Taps and presence are not held back.
    let tap = ServerMessage::Tap { point: Point::new(0, 0), user_color: "#000".into(), user_id: a.clone(), tap_time: 1 };
    broadcast_except(&state, &tap, &a).await;
    assert_eq!(recv_frame(&mut rx_joiner).await, tap);
    broadcast_user_count(&state).await;
    assert_eq!(recv_frame(&mut rx_joiner).await, ServerMessage::UserCount { count: 3 });

    state.sessions.mark_synced(&joiner).await;
    broadcast_except(&state, &line_update("l2"), &a).await;
    assert_eq!(recv_frame(&mut rx_joiner).await, line_update("l2"));
}

#[test]
fn queue_errors_map_to_delivery_errors() {
    assert!(matches!(DeliveryError::from(TrySendError::Full(())), DeliveryError::Lagging));
    assert!(matches!(DeliveryError::from(TrySendError::Closed(())), DeliveryError::Closed));
}

#[tokio::test]
async fn user_count_reaches_everyone() {
    let state = test_app_state();
    let (_a, mut rx_a) = seed_session(&state).await;
    let (_b, mut rx_b) = seed_session(&state).await;

    assert_eq!(broadcast_user_count(&state).await, 2);
    assert_eq!(recv_frame(&mut rx_a).await, ServerMessage::UserCount { count: 2 });
    assert_eq!(recv_frame(&mut rx_b).await, ServerMessage::UserCount { count: 2 });
}
