use super::*;

fn info(name: &str) -> ParticipantInfo {
    ParticipantInfo { name: Some(name.into()), email: Some(format!("{name}@example.com")), color: None }
}

#[test]
fn palette_is_assigned_in_join_order() {
    let mut tracker = PresenceTracker::new();
    let colors: Vec<_> = (0..7).map(|i| tracker.register(info(&format!("p{i}"))).color).collect();
    assert_eq!(colors, ["red", "blue", "green", "black", "orange", "yellow", "red"]);
}

#[test]
fn supplied_color_wins_but_still_advances_palette() {
    let mut tracker = PresenceTracker::new();
    let first = tracker.register(ParticipantInfo { color: Some("#123456".into()), ..info("a") });
    let second = tracker.register(info("b"));
    assert_eq!(first.color, "#123456");
    assert_eq!(second.color, "blue");
}

#[test]
fn blank_name_falls_back_to_anonymous() {
    let mut tracker = PresenceTracker::new();
    let p = tracker.register(ParticipantInfo { name: Some("  ".into()), ..ParticipantInfo::default() });
    assert_eq!(p.display_name, "anonymous");
    assert_eq!(p.email, "");

    let q = tracker.register(ParticipantInfo::default());
    assert_eq!(q.display_name, "anonymous");
    assert_ne!(p.id, q.id);
}

#[test]
fn info_deserializes_partial_payloads() {
    let parsed: ParticipantInfo = serde_json::from_value(serde_json::json!({"name": "ada"})).unwrap();
    assert_eq!(parsed, ParticipantInfo { name: Some("ada".into()), email: None, color: None });
}

#[test]
fn remove_keeps_order_of_remaining() {
    let mut tracker = PresenceTracker::new();
    let a = tracker.register(info("a"));
    let b = tracker.register(info("b"));
    let c = tracker.register(info("c"));

    assert_eq!(tracker.remove(b.id).map(|p| p.id), Some(b.id));
    assert!(tracker.remove(b.id).is_none());
    let ids: Vec<_> = tracker.list().iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![a.id, c.id]);
}

#[test]
fn cursor_is_last_write_wins() {
    let mut tracker = PresenceTracker::new();
    let a = tracker.register(info("a"));
    tracker.update_cursor(a.id, Point::new(1.0, 1.0));
    let updated = tracker.update_cursor(a.id, Point::new(5.0, 6.0)).unwrap();
    assert_eq!(updated.cursor, Some(Point::new(5.0, 6.0)));
    assert!(tracker.update_cursor(Uuid::new_v4(), Point::new(0.0, 0.0)).is_none());
}

#[test]
fn update_identity_patches_supplied_fields() {
    let mut tracker = PresenceTracker::new();
    let a = tracker.register(info("a"));
    let updated = tracker
        .update_identity(a.id, ParticipantInfo { name: Some("ada".into()), email: None, color: Some("green".into()) })
        .unwrap();
    assert_eq!(updated.display_name, "ada");
    assert_eq!(updated.email, "a@example.com");
    assert_eq!(updated.color, "green");
    assert_eq!(tracker.get(a.id).unwrap().display_name, "ada");
}
