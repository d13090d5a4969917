//! Privileged API, bearer `ADMIN_TOKEN`:
//!   POST   /api/admin/reap             – run one reaper pass now
//!   GET    /api/admin/settings         – all settings, secrets masked
//!   PUT    /api/admin/settings         – update settings and reload config
//!   DELETE /api/admin/settings/{key}   – restore a setting's default

use std::collections::HashMap;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use serde_json::{Value, json};
use stage_db::unix_now;
use stage_lease::reap_stale_leases;

use super::{ApiResult, err_json};
use crate::app::SharedState;

async fn authorize(state: &SharedState, headers: &HeaderMap) -> Result<(), (StatusCode, Json<Value>)> {
    let expected = state.config().await.admin_token.clone();
    if expected.is_empty() {
        return Err(err_json(403, "Admin API is disabled"));
    }
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match presented {
        Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => Ok(()),
        _ => Err(err_json(401, "Invalid admin token")),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// POST /api/admin/reap
pub async fn reap(State(state): State<SharedState>, headers: HeaderMap) -> ApiResult {
    authorize(&state, &headers).await?;
    let policy = state.config().await.reaper_policy();
    let report = reap_stale_leases(state.db(), policy, unix_now())
        .map_err(|e| err_json(500, &format!("Reaper pass failed: {e}")))?;
    tracing::info!(reaped = report.reaped.len(), "Manual reaper pass");
    Ok(Json(json!(report)))
}

/// GET /api/admin/settings
pub async fn get_settings(State(state): State<SharedState>, headers: HeaderMap) -> ApiResult {
    authorize(&state, &headers).await?;
    settings_body(&state)
}

/// PUT /api/admin/settings
pub async fn update_settings(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(body): Json<HashMap<String, String>>,
) -> ApiResult {
    authorize(&state, &headers).await?;
    let sm = state.settings();
    for (key, value) in &body {
        sm.set_setting(key, value)
            .map_err(|e| err_json(400, &e.to_string()))?;
    }
    state
        .reload_config()
        .await
        .map_err(|e| err_json(500, &format!("Failed to reload config: {e}")))?;
    tracing::info!(updated = body.len(), "Settings updated");
    settings_body(&state)
}

/// DELETE /api/admin/settings/{key}
pub async fn reset_setting(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> ApiResult {
    authorize(&state, &headers).await?;
    let sm = state.settings();
    sm.reset_setting(&key)
        .map_err(|e| err_json(400, &e.to_string()))?;
    state
        .reload_config()
        .await
        .map_err(|e| err_json(500, &format!("Failed to reload config: {e}")))?;
    settings_body(&state)
}

fn settings_body(state: &SharedState) -> ApiResult {
    let sm = state.settings();
    let all = sm
        .get_all_settings()
        .map_err(|e| err_json(500, &format!("Failed to get settings: {e}")))?;
    let status = sm
        .check_feature_status()
        .map_err(|e| err_json(500, &format!("Failed to check status: {e}")))?;

    let settings: HashMap<String, Value> = all
        .into_iter()
        .map(|(key, info)| (key, json!(info.masked())))
        .collect();

    Ok(Json(json!({
        "settings": settings,
        "status": status,
    })))
}
