use super::*;
use canvas::stroke::Tool;

#[test]
fn session_state_new_is_empty() {
    let ss = SessionState::new();
    assert!(ss.log.is_empty());
    assert!(ss.clients.is_empty());
    assert!(ss.presence.is_empty());
}

// =============================================================================
// SessionLog
// =============================================================================

#[test]
fn append_records_author_and_order() {
    let mut log = SessionLog::new();
    let author = Uuid::new_v4();
    let a = test_helpers::dummy_stroke();
    let b = Stroke::new(Tool::Eraser, "white", 9, Point::new(4.0, 4.0));

    assert_eq!(log.append(a.clone(), author), 1);
    assert_eq!(log.append(b.clone(), author), 2);

    let entry = log.get(a.id).unwrap();
    assert_eq!(entry.author, author);
    assert!(!entry.completed);
    assert_eq!(log.snapshot(), vec![a, b]);
}

#[test]
fn extend_and_complete_address_by_id() {
    let mut log = SessionLog::new();
    let stroke = test_helpers::dummy_stroke();
    let id = stroke.id;
    log.append(stroke, Uuid::new_v4());

    assert!(log.extend(id, &[Point::new(2.0, 2.0), Point::new(3.0, 3.0)]));
    assert!(log.complete(id));
    let entry = log.get(id).unwrap();
    assert_eq!(entry.stroke.points.len(), 4);
    assert!(entry.completed);

    let unknown = Uuid::new_v4();
    assert!(!log.extend(unknown, &[Point::new(0.0, 0.0)]));
    assert!(!log.complete(unknown));
}

#[test]
fn clear_empties_log_but_keeps_sequence_growing() {
    let mut log = SessionLog::new();
    let first = test_helpers::dummy_stroke();
    let first_id = first.id;
    log.append(first, Uuid::new_v4());
    log.clear();

    assert!(log.is_empty());
    assert!(log.get(first_id).is_none());
    assert_eq!(log.append(test_helpers::dummy_stroke(), Uuid::new_v4()), 2);
    assert_eq!(log.len(), 1);
}

#[test]
fn snapshot_is_detached_from_log() {
    let mut log = SessionLog::new();
    let stroke = test_helpers::dummy_stroke();
    let id = stroke.id;
    log.append(stroke, Uuid::new_v4());

    let snapshot = log.snapshot();
    log.extend(id, &[Point::new(9.0, 9.0)]);
    assert_eq!(snapshot[0].points.len(), 2);
}

// =============================================================================
// AppState
// =============================================================================

#[tokio::test]
async fn app_state_clones_share_sessions() {
    let state = test_helpers::test_app_state();
    let clone = state.clone();
    let id = Uuid::new_v4();
    state.sessions.write().await.insert(id, SessionState::new());
    assert!(clone.sessions.read().await.contains_key(&id));
}

#[test]
fn test_state_capacity_override() {
    let state = test_helpers::test_app_state_with_capacity(3);
    assert_eq!(state.config.outbound_queue_capacity, 3);
    assert_eq!(state.config.port, 3000);
}
