use super::*;
use canvas::stroke::Tool;
use frames::Status;
use tokio::time::{Duration, timeout};
use uuid::Uuid;

use crate::state::test_helpers;

// =============================================================================
// HELPERS
// =============================================================================

async fn join_as(state: &AppState, session_id: SessionId, name: &str) -> (JoinSnapshot, mpsc::Receiver<Frame>) {
    let (tx, rx) = mpsc::channel(state.config.outbound_queue_capacity);
    let info = ParticipantInfo { name: Some(name.into()), email: None, color: None };
    (join(state, session_id, info, tx).await, rx)
}

async fn assert_channel_has_frame(rx: &mut mpsc::Receiver<Frame>) -> Frame {
    timeout(Duration::from_millis(200), rx.recv())
        .await
        .expect("channel receive timed out")
        .expect("channel closed unexpectedly")
}

async fn assert_channel_empty(rx: &mut mpsc::Receiver<Frame>) {
    assert!(timeout(Duration::from_millis(80), rx.recv()).await.is_err(), "expected no frame");
}

fn drain(rx: &mut mpsc::Receiver<Frame>) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

fn begin_req(session_id: SessionId, stroke: &Stroke) -> (Frame, StrokeDelta) {
    let delta = StrokeDelta::Begin(stroke.clone());
    (Frame::request(delta.syscall(), delta.to_payload()).with_session_id(session_id), delta)
}

async fn draw(state: &AppState, session_id: SessionId, author: ParticipantId, stroke: &Stroke) {
    let (req, delta) = begin_req(session_id, stroke);
    append_delta(state, session_id, author, &req, delta).await.unwrap();
}

// =============================================================================
// JOIN / LEAVE
// =============================================================================

#[tokio::test]
async fn first_join_creates_session_with_empty_snapshot() {
    let state = test_helpers::test_app_state();
    let sid = Uuid::new_v4();
    let (snapshot, mut rx) = join_as(&state, sid, "ada").await;

    assert!(snapshot.strokes.is_empty());
    assert_eq!(snapshot.participants, vec![snapshot.participant.clone()]);
    assert_eq!(snapshot.participant.color, "red");
    assert!(state.sessions.read().await.contains_key(&sid));
    assert_channel_empty(&mut rx).await;
}

#[tokio::test]
async fn late_joiner_gets_log_and_peers_get_registry() {
    let state = test_helpers::test_app_state();
    let sid = Uuid::new_v4();
    let (a, mut rx_a) = join_as(&state, sid, "ada").await;
    let stroke = test_helpers::dummy_stroke();
    draw(&state, sid, a.participant.id, &stroke).await;
    drain(&mut rx_a);

    let (b, mut rx_b) = join_as(&state, sid, "bo").await;
    assert_eq!(b.strokes, vec![stroke]);
    assert_eq!(b.participants.len(), 2);
    assert_eq!(b.participant.color, "blue");

    let registry = assert_channel_has_frame(&mut rx_a).await;
    assert_eq!(registry.syscall, syscall::PRESENCE_ACTIVE);
    assert_eq!(registry.field("participants").and_then(Value::as_array).map(Vec::len), Some(2));
    assert_channel_empty(&mut rx_b).await;
}

#[tokio::test]
async fn leave_updates_remaining_and_evicts_empty_session() {
    let state = test_helpers::test_app_state();
    let sid = Uuid::new_v4();
    let (a, mut rx_a) = join_as(&state, sid, "ada").await;
    let (b, _rx_b) = join_as(&state, sid, "bo").await;
    drain(&mut rx_a);

    assert!(leave(&state, sid, b.participant.id).await);
    let registry = assert_channel_has_frame(&mut rx_a).await;
    let remaining = registry.field("participants").and_then(Value::as_array).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0]["id"], a.participant.id.to_string());

    assert!(!leave(&state, sid, b.participant.id).await);
    assert!(leave(&state, sid, a.participant.id).await);
    assert!(!state.sessions.read().await.contains_key(&sid));
}

// =============================================================================
// DELTAS
// =============================================================================

#[tokio::test]
async fn begin_fans_out_to_peers_and_acks_sender_with_seq() {
    let state = test_helpers::test_app_state();
    let sid = Uuid::new_v4();
    let (a, mut rx_a) = join_as(&state, sid, "ada").await;
    let (_b, mut rx_b) = join_as(&state, sid, "bo").await;
    drain(&mut rx_a);

    let stroke = test_helpers::dummy_stroke();
    let (req, delta) = begin_req(sid, &stroke);
    append_delta(&state, sid, a.participant.id, &req, delta).await.unwrap();

    let ack = assert_channel_has_frame(&mut rx_a).await;
    assert_eq!(ack.status, Status::Done);
    assert_eq!(ack.parent_id.as_deref(), Some(req.id.as_str()));
    assert_eq!(ack.str_field("stroke_id"), Some(stroke.id.to_string().as_str()));
    assert_eq!(ack.field("seq").and_then(Value::as_u64), Some(1));

    let fanned = assert_channel_has_frame(&mut rx_b).await;
    assert_eq!(fanned.syscall, syscall::DRAW_BEGIN);
    assert_eq!(fanned.status, Status::Request);
    assert_eq!(fanned.from.as_deref(), Some(a.participant.id.to_string().as_str()));
    assert_eq!(StrokeDelta::from_payload(&fanned.syscall, &fanned.data).unwrap(), StrokeDelta::Begin(stroke));
    assert_channel_empty(&mut rx_a).await;
}

#[tokio::test]
async fn foreign_extend_is_rejected_and_not_applied() {
    let state = test_helpers::test_app_state();
    let sid = Uuid::new_v4();
    let (a, mut rx_a) = join_as(&state, sid, "ada").await;
    let (b, mut rx_b) = join_as(&state, sid, "bo").await;
    let stroke = test_helpers::dummy_stroke();
    draw(&state, sid, a.participant.id, &stroke).await;
    drain(&mut rx_a);
    drain(&mut rx_b);

    let extend = StrokeDelta::Extend { stroke_id: stroke.id, points: vec![Point::new(7.0, 7.0)] };
    let req = Frame::request(extend.syscall(), extend.to_payload());
    let err = append_delta(&state, sid, b.participant.id, &req, extend).await.unwrap_err();
    assert_eq!(err.error_code(), "E_NOT_STROKE_AUTHOR");

    assert_eq!(session_strokes(&state, sid).await.unwrap()[0].points.len(), 2);
    assert_channel_empty(&mut rx_a).await;
}

#[tokio::test]
async fn interleaved_strokes_keep_their_own_point_order() {
    let state = test_helpers::test_app_state();
    let sid = Uuid::new_v4();
    let (a, _rx_a) = join_as(&state, sid, "ada").await;
    let (b, _rx_b) = join_as(&state, sid, "bo").await;

    let sa = Stroke::new(Tool::Pen, "red", 1, Point::new(0.0, 0.0));
    let sb = Stroke::new(Tool::Pen, "blue", 1, Point::new(100.0, 0.0));
    draw(&state, sid, a.participant.id, &sa).await;
    draw(&state, sid, b.participant.id, &sb).await;

    for i in 1..=3 {
        let step = f64::from(i);
        for (author, stroke, x) in [(a.participant.id, &sa, step), (b.participant.id, &sb, 100.0 + step)] {
            let delta = StrokeDelta::Extend { stroke_id: stroke.id, points: vec![Point::new(x, step)] };
            let req = Frame::request(delta.syscall(), delta.to_payload());
            append_delta(&state, sid, author, &req, delta).await.unwrap();
        }
    }

    let strokes = session_strokes(&state, sid).await.unwrap();
    let xs = |s: &Stroke| s.points.iter().map(|p| p.x).collect::<Vec<_>>();
    assert_eq!(xs(&strokes[0]), vec![0.0, 1.0, 2.0, 3.0]);
    assert_eq!(xs(&strokes[1]), vec![100.0, 101.0, 102.0, 103.0]);
}

#[tokio::test]
async fn operations_after_leave_are_not_joined() {
    let state = test_helpers::test_app_state();
    let sid = Uuid::new_v4();
    let (a, _rx_a) = join_as(&state, sid, "ada").await;
    let (b, _rx_b) = join_as(&state, sid, "bo").await;
    leave(&state, sid, b.participant.id).await;

    let (req, delta) = begin_req(sid, &test_helpers::dummy_stroke());
    let err = append_delta(&state, sid, b.participant.id, &req, delta).await.unwrap_err();
    assert!(matches!(err, SessionError::NotJoined));

    leave(&state, sid, a.participant.id).await;
    let err = clear_session(&state, sid, a.participant.id, &req).await.unwrap_err();
    assert_eq!(err.error_code(), "E_SESSION_NOT_FOUND");
}

// =============================================================================
// CLEAR
// =============================================================================

#[tokio::test]
async fn clear_empties_log_notifies_peers_and_acks_sender() {
    let state = test_helpers::test_app_state();
    let sid = Uuid::new_v4();
    let (a, mut rx_a) = join_as(&state, sid, "ada").await;
    let (_b, mut rx_b) = join_as(&state, sid, "bo").await;
    draw(&state, sid, a.participant.id, &test_helpers::dummy_stroke()).await;
    drain(&mut rx_a);
    drain(&mut rx_b);

    let req = Frame::request(syscall::CANVAS_CLEAR, Value::Null).with_session_id(sid);
    clear_session(&state, sid, a.participant.id, &req).await.unwrap();

    assert!(session_strokes(&state, sid).await.unwrap().is_empty());
    let ack = assert_channel_has_frame(&mut rx_a).await;
    assert_eq!((ack.syscall.as_str(), ack.status), (syscall::CANVAS_CLEAR, Status::Done));
    let cleared = assert_channel_has_frame(&mut rx_b).await;
    assert_eq!(cleared.syscall, syscall::CANVAS_CLEARED);
}

// =============================================================================
// PRESENCE AND CHAT
// =============================================================================

#[tokio::test]
async fn cursor_moves_reach_peers_only() {
    let state = test_helpers::test_app_state();
    let sid = Uuid::new_v4();
    let (a, mut rx_a) = join_as(&state, sid, "ada").await;
    let (_b, mut rx_b) = join_as(&state, sid, "bo").await;
    drain(&mut rx_a);

    update_cursor(&state, sid, a.participant.id, Point::new(3.0, 4.0)).await;

    let frame = assert_channel_has_frame(&mut rx_b).await;
    assert_eq!(frame.syscall, syscall::CURSOR_MOVE);
    assert_eq!(
        frame.data,
        json!({"participant_id": a.participant.id.to_string(), "x": 3.0, "y": 4.0, "color": "red"})
    );
    assert_channel_empty(&mut rx_a).await;
}

#[tokio::test]
async fn cursor_from_unknown_participant_is_ignored() {
    let state = test_helpers::test_app_state();
    let sid = Uuid::new_v4();
    let (_a, mut rx_a) = join_as(&state, sid, "ada").await;
    update_cursor(&state, sid, Uuid::new_v4(), Point::new(1.0, 1.0)).await;
    assert_channel_empty(&mut rx_a).await;
}

#[tokio::test]
async fn identity_update_returns_registry_and_notifies_peers() {
    let state = test_helpers::test_app_state();
    let sid = Uuid::new_v4();
    let (a, _rx_a) = join_as(&state, sid, "ada").await;
    let (_b, mut rx_b) = join_as(&state, sid, "bo").await;

    let info = ParticipantInfo { name: Some("ada l".into()), email: None, color: Some("green".into()) };
    let registry = update_identity(&state, sid, a.participant.id, info).await.unwrap();
    assert_eq!(registry[0].display_name, "ada l");
    assert_eq!(registry[0].color, "green");

    let frame = assert_channel_has_frame(&mut rx_b).await;
    assert_eq!(frame.syscall, syscall::PRESENCE_ACTIVE);
    assert_eq!(frame.data["participants"][0]["name"], "ada l");
}

#[tokio::test]
async fn chat_reaches_everyone_including_sender() {
    let state = test_helpers::test_app_state();
    let sid = Uuid::new_v4();
    let (a, mut rx_a) = join_as(&state, sid, "ada").await;
    let (_b, mut rx_b) = join_as(&state, sid, "bo").await;
    drain(&mut rx_a);

    let chat = ChatPayload { name: "ada".into(), message: "hi".into(), email: String::new() };
    relay_chat(&state, sid, a.participant.id, chat).await.unwrap();

    for rx in [&mut rx_a, &mut rx_b] {
        let frame = assert_channel_has_frame(rx).await;
        assert_eq!(frame.syscall, syscall::CHAT_MESSAGE);
        assert_eq!(frame.data, json!({"name": "ada", "message": "hi", "email": ""}));
    }
}

// =============================================================================
// OVERFLOW
// =============================================================================

#[tokio::test]
async fn full_queue_evicts_lagging_participant_without_blocking_others() {
    let state = test_helpers::test_app_state_with_capacity(4);
    let sid = Uuid::new_v4();
    let (a, mut rx_a) = join_as(&state, sid, "ada").await;
    let (b, mut rx_b) = join_as(&state, sid, "bo").await;
    drain(&mut rx_a);

    let stroke = test_helpers::dummy_stroke();
    draw(&state, sid, a.participant.id, &stroke).await;
    drain(&mut rx_a);
    for i in 0..4 {
        let delta = StrokeDelta::Extend { stroke_id: stroke.id, points: vec![Point::new(f64::from(i), 0.0)] };
        let req = Frame::request(delta.syscall(), delta.to_payload());
        append_delta(&state, sid, a.participant.id, &req, delta).await.unwrap();
    }

    // B never drained: 4 frames fit, the 5th evicted it.
    let registry = assert_channel_has_frame(&mut rx_a).await;
    assert_eq!(registry.syscall, syscall::PRESENCE_ACTIVE);
    let ids: Vec<_> = registry.data["participants"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap().to_owned())
        .collect();
    assert_eq!(ids, vec![a.participant.id.to_string()]);

    assert_eq!(drain(&mut rx_b).len(), 4);
    assert!(rx_b.recv().await.is_none(), "evicted queue must close");
    assert!(!leave(&state, sid, b.participant.id).await);
    assert_eq!(session_summaries(&state).await[0].participants, 1);
}

// =============================================================================
// CONCURRENT JOIN
// =============================================================================

#[tokio::test]
async fn concurrent_join_sees_each_stroke_exactly_once() {
    let state = test_helpers::test_app_state();
    let sid = Uuid::new_v4();
    let (a, _rx_a) = join_as(&state, sid, "ada").await;
    let author = a.participant.id;

    let writer = {
        let state = state.clone();
        tokio::spawn(async move {
            for _ in 0..60 {
                draw(&state, sid, author, &test_helpers::dummy_stroke()).await;
                tokio::task::yield_now().await;
            }
        })
    };
    tokio::task::yield_now().await;
    let (b, mut rx_b) = join_as(&state, sid, "bo").await;
    writer.await.unwrap();

    let mut seen: Vec<_> = b.strokes.iter().map(|s| s.id).collect();
    for frame in drain(&mut rx_b) {
        if frame.syscall == syscall::DRAW_BEGIN {
            seen.push(StrokeDelta::from_payload(&frame.syscall, &frame.data).unwrap().stroke_id());
        }
    }
    let log: Vec<_> = session_strokes(&state, sid).await.unwrap().iter().map(|s| s.id).collect();
    assert_eq!(seen, log);
    assert_eq!(log.len(), 60);
}

// =============================================================================
// READ-ONLY ACCESS
// =============================================================================

#[tokio::test]
async fn summaries_report_counts() {
    let state = test_helpers::test_app_state();
    let sid = Uuid::new_v4();
    let (a, _rx_a) = join_as(&state, sid, "ada").await;
    draw(&state, sid, a.participant.id, &test_helpers::dummy_stroke()).await;

    assert_eq!(session_summaries(&state).await, vec![SessionSummary { id: sid, participants: 1, strokes: 1 }]);
    assert!(session_strokes(&state, Uuid::new_v4()).await.is_none());
}
