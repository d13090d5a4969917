use std::path::{Path, PathBuf};
use std::sync::Arc;

use stage_db::Database;
use tokio::sync::{RwLock, RwLockReadGuard};
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, SettingsManager};

/// Handle to the server's store, settings and shutdown signal. Clones share
/// one instance.
#[derive(Clone)]
pub struct SharedState {
    inner: Arc<StateInner>,
}

struct StateInner {
    db: Database,
    /// Reloaded from the settings table after every admin change; loops
    /// pick up new intervals on their next iteration.
    config: RwLock<AppConfig>,
    /// Bound once at startup. Changing `SERVER_PORT` takes a restart.
    port: u16,
    data_dir: PathBuf,
    shutdown: CancellationToken,
}

impl SharedState {
    pub fn new(db: Database, config: AppConfig, data_dir: PathBuf) -> Self {
        Self {
            inner: Arc::new(StateInner {
                db,
                port: config.server_port,
                config: RwLock::new(config),
                data_dir,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn server_port(&self) -> u16 {
        self.inner.port
    }

    pub fn db(&self) -> &Database {
        &self.inner.db
    }

    pub fn settings(&self) -> SettingsManager {
        SettingsManager::new(self.inner.db.clone())
    }

    pub fn data_dir(&self) -> &Path {
        &self.inner.data_dir
    }

    /// Parent of every session and loop token.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    pub async fn config(&self) -> RwLockReadGuard<'_, AppConfig> {
        self.inner.config.read().await
    }

    pub async fn reload_config(&self) -> anyhow::Result<()> {
        let settings = self.settings();
        let mut config = self.inner.config.write().await;
        config.reload(&settings)?;
        tracing::debug!(
            heartbeat_seconds = config.heartbeat_interval_seconds,
            presence_window_seconds = config.presence_window_seconds,
            "Configuration reloaded"
        );
        Ok(())
    }
}
