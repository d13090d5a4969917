use axum::extract::State;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use stage_db::EventStatus;
use tower_http::cors::CorsLayer;

use super::api::{self, ApiResult, err_json};
use crate::app::SharedState;

/// Create the axum router with all routes.
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        // --- Events ---
        .route("/api/events/{id}", get(api::events::get_event))
        .route("/api/events/{id}/reconcile", post(api::events::reconcile))
        .route("/api/events/{id}/like", post(api::events::like))
        // --- Admin ---
        .route("/api/admin/reap", post(api::admin::reap))
        .route(
            "/api/admin/settings",
            get(api::admin::get_settings).put(api::admin::update_settings),
        )
        .route("/api/admin/settings/{key}", delete(api::admin::reset_setting))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn status_handler(State(state): State<SharedState>) -> ApiResult {
    let live = state
        .db()
        .list_events_by_status(EventStatus::Live)
        .map_err(|e| err_json(500, &format!("Failed to list events: {e}")))?;
    Ok(Json(status_body(live.len())))
}

fn status_body(live_events: usize) -> Value {
    json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "live_events": live_events,
    })
}
