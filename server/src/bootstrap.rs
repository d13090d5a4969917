use std::path::PathBuf;

use stage_db::Database;

use crate::app::SharedState;
use crate::background;
use crate::config::{AppConfig, SettingsManager};
use crate::server;

/// Open the store and load settings (fatal on error).
pub fn init_foundation() -> Result<(Database, AppConfig, PathBuf), anyhow::Error> {
    load_dotenv();
    let dir = data_dir();
    std::fs::create_dir_all(&dir)?;

    let db_path = dir.join("livestage.db");
    tracing::info!("Opening database at {}", db_path.display());
    let db = Database::open(&db_path)?;

    let sm = SettingsManager::new(db.clone());
    if let Err(e) = sm.migrate_from_env() {
        tracing::error!("Failed to migrate from env: {e}");
    }
    sm.initialize_defaults()?;

    let config = AppConfig::load(&sm)?;

    if let Ok(status) = sm.check_feature_status() {
        if !status.missing_settings.is_empty() || !status.warnings.is_empty() {
            tracing::warn!(
                "Missing settings: {:?}, warnings: {:?}",
                status.missing_settings,
                status.warnings
            );
        }
    }

    tracing::info!("Settings loaded (port={})", config.server_port);
    Ok((db, config, dir))
}

/// Spawn the HTTP server and every background loop (non-fatal).
pub fn spawn_background_tasks(state: &SharedState) -> tokio::task::JoinHandle<()> {
    let s = state.clone();
    tokio::spawn(async move { background::reaper_loop(s).await });

    let s = state.clone();
    tokio::spawn(async move { background::reconcile_loop(s).await });

    let s = state.clone();
    tokio::spawn(async move { background::presence_prune_loop(s).await });

    let s = state.clone();
    tokio::spawn(async move {
        if let Err(e) = server::start_server(s).await {
            tracing::error!("Server failed: {e}");
        }
    })
}

/// Priority: LIVESTAGE_DATA_DIR env var > ~/.livestage
fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("LIVESTAGE_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".livestage")
}

/// Load .env from multiple candidate paths.
fn load_dotenv() {
    let candidates = [".env", "../.env"];
    for path in &candidates {
        if dotenvy::from_filename(path).is_ok() {
            tracing::info!("Loaded .env from: {path}");
            return;
        }
    }
    tracing::info!("No .env file found, using system environment variables");
}
