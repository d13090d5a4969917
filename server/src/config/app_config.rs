//! Runtime application configuration loaded from DB + environment overrides.

use std::time::Duration;

use stage_client::{ClientError, ControllerConfig, HttpTokenIssuer};
use stage_lease::ReaperPolicy;

use super::manager::SettingsManager;

/// Runtime configuration populated from the settings DB.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server_port: u16,
    pub admin_token: String,
    pub token_endpoint: String,
    pub token_issuer_bearer: String,
    pub token_ttl_seconds: u64,
    pub max_retries: u32,
    pub heartbeat_interval_seconds: u64,
    pub broadcaster_timeout_minutes: u32,
    pub stale_minutes: u32,
    pub reaper_interval_seconds: u64,
    pub presence_window_seconds: u64,
    pub reconcile_interval_seconds: u64,
    pub presence_ping_interval_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_port: 8080,
            admin_token: String::new(),
            token_endpoint: String::new(),
            token_issuer_bearer: String::new(),
            token_ttl_seconds: 3600,
            max_retries: 5,
            heartbeat_interval_seconds: 30,
            broadcaster_timeout_minutes: 3,
            stale_minutes: 5,
            reaper_interval_seconds: 60,
            presence_window_seconds: 120,
            reconcile_interval_seconds: 30,
            presence_ping_interval_seconds: 30,
        }
    }
}

impl AppConfig {
    /// Load configuration from the settings manager (DB-first, env overrides).
    pub fn load(sm: &SettingsManager) -> Result<Self, anyhow::Error> {
        let g = |key: &str| -> String { sm.get_setting(key).unwrap_or_default() };
        let d = Self::default();

        let mut server_port = parse_num(&g("SERVER_PORT"), d.server_port);
        if let Ok(v) = std::env::var("SERVER_PORT") {
            if let Ok(p) = v.parse::<u16>() {
                server_port = p;
            }
        }
        let admin_token = std::env::var("ADMIN_TOKEN")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| g("ADMIN_TOKEN"));

        Ok(Self {
            server_port,
            admin_token,
            token_endpoint: g("TOKEN_ENDPOINT"),
            token_issuer_bearer: g("TOKEN_ISSUER_BEARER"),
            token_ttl_seconds: parse_num(&g("TOKEN_TTL_SECONDS"), d.token_ttl_seconds),
            max_retries: parse_num(&g("MAX_RETRIES"), d.max_retries),
            heartbeat_interval_seconds: parse_num(
                &g("HEARTBEAT_INTERVAL_SECONDS"),
                d.heartbeat_interval_seconds,
            ),
            broadcaster_timeout_minutes: parse_num(
                &g("BROADCASTER_TIMEOUT_MINUTES"),
                d.broadcaster_timeout_minutes,
            ),
            stale_minutes: parse_num(&g("STALE_MINUTES"), d.stale_minutes),
            reaper_interval_seconds: parse_num(
                &g("REAPER_INTERVAL_SECONDS"),
                d.reaper_interval_seconds,
            ),
            presence_window_seconds: parse_num(
                &g("PRESENCE_WINDOW_SECONDS"),
                d.presence_window_seconds,
            ),
            reconcile_interval_seconds: parse_num(
                &g("RECONCILE_INTERVAL_SECONDS"),
                d.reconcile_interval_seconds,
            ),
            presence_ping_interval_seconds: parse_num(
                &g("PRESENCE_PING_INTERVAL_SECONDS"),
                d.presence_ping_interval_seconds,
            ),
        })
    }

    /// Reload from DB.
    pub fn reload(&mut self, sm: &SettingsManager) -> Result<(), anyhow::Error> {
        *self = Self::load(sm)?;
        Ok(())
    }

    pub fn reaper_policy(&self) -> ReaperPolicy {
        ReaperPolicy {
            stale_minutes: self.stale_minutes,
            broadcaster_timeout_minutes: self.broadcaster_timeout_minutes,
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_seconds)
    }

    pub fn presence_window(&self) -> Duration {
        Duration::from_secs(self.presence_window_seconds)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_seconds)
    }

    pub fn presence_ping_interval(&self) -> Duration {
        Duration::from_secs(self.presence_ping_interval_seconds)
    }

    /// Apply retry budget and token lifetime to a controller config.
    pub fn controller(&self, config: ControllerConfig) -> ControllerConfig {
        config
            .with_max_retries(self.max_retries)
            .with_token_ttl(self.token_ttl_seconds)
    }

    /// HTTP token issuer for the configured endpoint.
    pub fn token_issuer(&self) -> Result<HttpTokenIssuer, ClientError> {
        if self.token_endpoint.is_empty() {
            return Err(ClientError::InvalidConfig("TOKEN_ENDPOINT is not set".into()));
        }
        let issuer = HttpTokenIssuer::new(&self.token_endpoint)?;
        Ok(if self.token_issuer_bearer.is_empty() {
            issuer
        } else {
            issuer.with_bearer(self.token_issuer_bearer.clone())
        })
    }
}

fn parse_num<T: std::str::FromStr>(s: &str, default: T) -> T {
    if s.is_empty() {
        return default;
    }
    s.parse().unwrap_or(default)
}
