//! Event API:
//!   GET  /api/events/{id}           – event row, lease, peak and present viewers
//!   POST /api/events/{id}/reconcile – run one reconciliation pass now
//!   POST /api/events/{id}/like      – add one like

use axum::Json;
use axum::extract::{Path, State};
use serde_json::json;
use stage_db::{DbError, unix_now};
use stage_presence::{PresenceError, distinct_viewers, reconcile_event};

use super::{ApiResult, err_json};
use crate::app::SharedState;

/// GET /api/events/{id}
pub async fn get_event(State(state): State<SharedState>, Path(id): Path<String>) -> ApiResult {
    let db = state.db();
    let event = db
        .get_event(&id)
        .map_err(|e| err_json(500, &format!("Failed to get event: {e}")))?
        .ok_or_else(|| err_json(404, &format!("Event not found: {id}")))?;
    let lease = db
        .get_lease(&id)
        .map_err(|e| err_json(500, &format!("Failed to get lease: {e}")))?;
    let peak = db
        .get_peak_viewers(&id)
        .map_err(|e| err_json(500, &format!("Failed to get peak: {e}")))?;
    let records = db
        .active_presence(&id)
        .map_err(|e| err_json(500, &format!("Failed to get presence: {e}")))?;

    let now = unix_now();
    let window = state.config().await.presence_window();
    let present = distinct_viewers(&records, now - window.as_secs() as i64);

    Ok(Json(json!({
        "event": event,
        "lease": lease.map(|l| json!({
            "broadcaster_id": l.broadcaster_id,
            "registered_at": l.registered_at,
            "last_heartbeat": l.last_heartbeat,
            "heartbeat_age_seconds": l.heartbeat_age(now),
        })),
        "peak_viewers": peak,
        "present_viewers": present,
    })))
}

/// POST /api/events/{id}/reconcile
pub async fn reconcile(State(state): State<SharedState>, Path(id): Path<String>) -> ApiResult {
    let window = state.config().await.presence_window();
    match reconcile_event(state.db(), &id, window, unix_now()) {
        Ok(result) => Ok(Json(json!(result))),
        Err(PresenceError::EventNotFound(_)) => Err(err_json(404, &format!("Event not found: {id}"))),
        Err(e) => Err(err_json(500, &format!("Reconciliation failed: {e}"))),
    }
}

/// POST /api/events/{id}/like
pub async fn like(State(state): State<SharedState>, Path(id): Path<String>) -> ApiResult {
    match state.db().increment_like_count(&id, unix_now()) {
        Ok(likes) => Ok(Json(json!({ "event_id": id, "like_count": likes }))),
        Err(DbError::NotFound(_)) => Err(err_json(404, &format!("Event not found: {id}"))),
        Err(e) => Err(err_json(500, &format!("Failed to record like: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use axum::http::StatusCode;
    use stage_db::Database;

    use super::*;
    use crate::config::AppConfig;

    fn state_with_live_event() -> SharedState {
        let db = Database::open_in_memory().unwrap();
        let now = unix_now();
        db.create_event("ev-1", now, now).unwrap();
        db.mark_event_live("ev-1", now).unwrap();
        db.upsert_lease("ev-1", "artist", now).unwrap();
        db.upsert_presence("ev-1", "user:a", Some("a"), Some("laptop"), now)
            .unwrap();
        db.upsert_presence("ev-1", "device:laptop", None, Some("laptop"), now)
            .unwrap();
        db.upsert_presence("ev-1", "device:phone", None, Some("phone"), now)
            .unwrap();
        SharedState::new(db, AppConfig::default(), PathBuf::from("."))
    }

    #[tokio::test]
    async fn get_event_reports_lease_and_viewers() {
        let state = state_with_live_event();
        let Json(body) = get_event(State(state), Path("ev-1".into())).await.unwrap();
        assert_eq!(body["event"]["status"], "live");
        assert_eq!(body["lease"]["broadcaster_id"], "artist");
        assert_eq!(body["present_viewers"], 2);
        assert_eq!(body["peak_viewers"], 0);
    }

    #[tokio::test]
    async fn get_event_not_found() {
        let state = state_with_live_event();
        let (code, Json(body)) = get_event(State(state), Path("nope".into()))
            .await
            .unwrap_err();
        assert_eq!(code, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn reconcile_raises_cached_count() {
        let state = state_with_live_event();
        let Json(body) = reconcile(State(state.clone()), Path("ev-1".into()))
            .await
            .unwrap();
        assert_eq!(body["fresh"], 2);
        assert_eq!(body["applied"], 2);
        assert_eq!(
            state.db().get_event("ev-1").unwrap().unwrap().viewer_count,
            2
        );
        assert_eq!(state.db().get_peak_viewers("ev-1").unwrap(), 2);
    }

    #[tokio::test]
    async fn reconcile_unknown_event() {
        let state = state_with_live_event();
        let (code, _) = reconcile(State(state), Path("ghost".into()))
            .await
            .unwrap_err();
        assert_eq!(code, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn like_counts_up() {
        let state = state_with_live_event();
        like(State(state.clone()), Path("ev-1".into())).await.unwrap();
        let Json(body) = like(State(state.clone()), Path("ev-1".into())).await.unwrap();
        assert_eq!(body["like_count"], 2);
        assert_eq!(state.db().get_event("ev-1").unwrap().unwrap().like_count, 2);

        let (code, _) = like(State(state), Path("ghost".into())).await.unwrap_err();
        assert_eq!(code, StatusCode::NOT_FOUND);
    }
}
