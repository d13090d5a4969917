use super::test_db;
use crate::{DbError, EventStatus};

#[test]
fn test_create_and_get_event() {
    let db = test_db();
    let created = db.create_event("ev1", 500, 100).unwrap();
    assert_eq!(created.status, EventStatus::Scheduled);

    let got = db.get_event("ev1").unwrap().unwrap();
    assert_eq!(got, created);
    assert!(db.get_event("missing").unwrap().is_none());
}

#[test]
fn test_create_event_rejects_empty_id() {
    let db = test_db();
    let err = db.create_event("  ", 0, 0).unwrap_err();
    assert!(matches!(err, DbError::InvalidData(_)));
}

#[test]
fn test_status_transitions() {
    let db = test_db();
    db.create_event("ev1", 0, 0).unwrap();

    assert!(db.mark_event_live("ev1", 10).unwrap());
    // Already live
    assert!(!db.mark_event_live("ev1", 20).unwrap());

    let live = db.get_event("ev1").unwrap().unwrap();
    assert_eq!(live.status, EventStatus::Live);
    assert_eq!(live.went_live_at, Some(10));

    assert!(db.mark_event_ended("ev1", 30).unwrap());
    assert!(!db.mark_event_ended("ev1", 40).unwrap());
    // Ended is terminal
    assert!(!db.mark_event_live("ev1", 50).unwrap());

    let ended = db.get_event("ev1").unwrap().unwrap();
    assert_eq!(ended.status, EventStatus::Ended);
    assert_eq!(ended.updated_at, 30);
}

#[test]
fn test_list_events_by_status() {
    let db = test_db();
    db.create_event("a", 2, 0).unwrap();
    db.create_event("b", 1, 0).unwrap();
    db.create_event("c", 3, 0).unwrap();
    db.mark_event_live("a", 5).unwrap();
    db.mark_event_live("b", 5).unwrap();

    let live: Vec<String> = db
        .list_events_by_status(EventStatus::Live)
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(live, vec!["b", "a"]);
    assert_eq!(db.list_events_by_status(EventStatus::Scheduled).unwrap().len(), 1);
}

#[test]
fn test_raise_viewer_count_only_moves_up() {
    let db = test_db();
    db.create_event("ev1", 0, 0).unwrap();

    assert!(db.raise_viewer_count("ev1", 5, 1).unwrap());
    assert!(!db.raise_viewer_count("ev1", 3, 2).unwrap());
    assert!(!db.raise_viewer_count("ev1", 5, 3).unwrap());
    assert_eq!(db.get_event("ev1").unwrap().unwrap().viewer_count, 5);
}

#[test]
fn test_replace_viewer_count_is_compare_and_set() {
    let db = test_db();
    db.create_event("ev1", 0, 0).unwrap();
    db.set_viewer_count("ev1", 5, 1).unwrap();

    assert!(!db.replace_viewer_count("ev1", 4, 2, 2).unwrap());
    assert!(db.replace_viewer_count("ev1", 5, 2, 3).unwrap());
    assert_eq!(db.get_event("ev1").unwrap().unwrap().viewer_count, 2);
    // Same value is not a change
    assert!(!db.replace_viewer_count("ev1", 2, 2, 4).unwrap());
}

#[test]
fn test_viewer_count_increment_and_decrement_floor() {
    let db = test_db();
    db.create_event("ev1", 0, 0).unwrap();

    assert!(db.increment_viewer_count("ev1", 1).unwrap());
    assert!(db.decrement_viewer_count("ev1", 2).unwrap());
    assert!(!db.decrement_viewer_count("ev1", 3).unwrap());
    assert_eq!(db.get_event("ev1").unwrap().unwrap().viewer_count, 0);

    assert!(db.set_viewer_count("ev1", 7, 4).unwrap());
    assert!(!db.set_viewer_count("ev1", 7, 5).unwrap());
    assert_eq!(db.get_event("ev1").unwrap().unwrap().viewer_count, 7);
}

#[test]
fn test_like_count() {
    let db = test_db();
    db.create_event("ev1", 0, 0).unwrap();
    assert_eq!(db.increment_like_count("ev1", 1).unwrap(), 1);
    assert_eq!(db.increment_like_count("ev1", 2).unwrap(), 2);
    assert!(matches!(
        db.increment_like_count("missing", 3),
        Err(DbError::NotFound(_))
    ));
}

#[test]
fn test_status_serde_is_lowercase() {
    let json = serde_json::to_string(&EventStatus::Live).unwrap();
    assert_eq!(json, "\"live\"");
    assert_eq!("ended".parse::<EventStatus>().unwrap(), EventStatus::Ended);
    assert!("paused".parse::<EventStatus>().is_err());
}
