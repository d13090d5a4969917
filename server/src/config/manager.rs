//! SettingsManager: DB-backed settings with defaults, env migration and feature status.

use std::collections::HashMap;

use stage_db::Database;

use super::defaults::DEFAULT_SETTINGS;
use super::validation::validate_setting;
use super::{FeatureStatus, SettingInfo};

const SECRET_KEYS: &[&str] = &["ADMIN_TOKEN", "TOKEN_ISSUER_BEARER"];

/// Wraps [`Database`] to provide high-level settings operations.
pub struct SettingsManager {
    db: Database,
}

impl SettingsManager {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Get a setting value. Falls back to default if not in DB.
    pub fn get_setting(&self, key: &str) -> Result<String, anyhow::Error> {
        if let Some(val) = self.db.get_setting(key)? {
            return Ok(val);
        }
        if let Some(def) = DEFAULT_SETTINGS.get(key) {
            return Ok(def.default.to_string());
        }
        anyhow::bail!("setting not found: {key}");
    }

    /// Set a setting value with validation.
    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), anyhow::Error> {
        let def = DEFAULT_SETTINGS
            .get(key)
            .ok_or_else(|| anyhow::anyhow!("unknown setting key: {key}"))?;

        validate_setting(key, value)
            .map_err(|e| anyhow::anyhow!("validation error for {key}: {e}"))?;

        self.db.set_setting(key, value, def.secret)?;
        Ok(())
    }

    /// Drop the stored value so the default applies again.
    pub fn reset_setting(&self, key: &str) -> Result<(), anyhow::Error> {
        if !DEFAULT_SETTINGS.contains_key(key) {
            anyhow::bail!("unknown setting key: {key}");
        }
        self.db.delete_setting(key)?;
        Ok(())
    }

    /// All known settings, stored value or default. Unknown keys in the
    /// table are skipped.
    pub fn get_all_settings(&self) -> Result<HashMap<String, SettingInfo>, anyhow::Error> {
        let stored = self.db.get_all_settings()?;
        let result = DEFAULT_SETTINGS
            .values()
            .map(|def| {
                let value = stored
                    .get(def.key)
                    .cloned()
                    .unwrap_or_else(|| def.default.to_string());
                let info = SettingInfo {
                    key: def.key.to_string(),
                    has_value: !value.is_empty(),
                    value,
                    group: def.group,
                    secret: def.secret,
                    required: def.required,
                    description: def.description.to_string(),
                };
                (def.key.to_string(), info)
            })
            .collect();
        Ok(result)
    }

    /// Initialize default settings in DB (skip existing).
    pub fn initialize_defaults(&self) -> Result<(), anyhow::Error> {
        for def in DEFAULT_SETTINGS.values() {
            if self.db.get_setting(def.key)?.is_some() {
                continue;
            }
            self.db
                .set_setting(def.key, def.default, def.secret)?;
        }
        Ok(())
    }

    /// Copy settings from environment variables into the DB, once per key.
    pub fn migrate_from_env(&self) -> Result<u32, anyhow::Error> {
        let mut migrated = 0u32;
        for def in DEFAULT_SETTINGS.values() {
            if self.db.get_setting(def.key)?.is_some() {
                continue;
            }
            let Ok(env_val) = std::env::var(def.key) else {
                continue;
            };
            if env_val.is_empty() {
                continue;
            }
            if let Err(e) = validate_setting(def.key, &env_val) {
                tracing::warn!(key = def.key, "Ignoring invalid env setting: {e}");
                continue;
            }
            self.db
                .set_setting(def.key, &env_val, def.secret)?;
            tracing::info!("Migrated setting from env: {}", def.key);
            migrated += 1;
        }
        if migrated > 0 {
            tracing::info!("Migration completed: {migrated} settings migrated");
            if has_secret_in_env() {
                tracing::warn!(
                    "SECURITY WARNING: Sensitive data in env vars. \
                     Remove from .env after confirming migration."
                );
            }
        }
        Ok(migrated)
    }

    /// Check which features are properly configured.
    pub fn check_feature_status(&self) -> Result<FeatureStatus, anyhow::Error> {
        let mut status = FeatureStatus {
            token_issuer_configured: true,
            admin_api_enabled: true,
            missing_settings: Vec::new(),
            warnings: Vec::new(),
        };

        for def in DEFAULT_SETTINGS.values().filter(|d| d.required) {
            if self.get_setting(def.key)?.is_empty() {
                status.missing_settings.push(def.key.to_string());
            }
        }
        status.missing_settings.sort();
        if self.get_setting("TOKEN_ENDPOINT")?.is_empty() {
            status.token_issuer_configured = false;
        }

        if self.get_setting("ADMIN_TOKEN")?.is_empty() {
            status.admin_api_enabled = false;
            status
                .warnings
                .push("ADMIN_TOKEN is empty - admin API disabled".into());
        }

        let heartbeat = self.get_int("HEARTBEAT_INTERVAL_SECONDS")?;
        let timeout = self.get_int("BROADCASTER_TIMEOUT_MINUTES")? * 60;
        if heartbeat * 2 > timeout {
            status.warnings.push(format!(
                "HEARTBEAT_INTERVAL_SECONDS ({heartbeat}) leaves less than two renewals \
                 per BROADCASTER_TIMEOUT_MINUTES ({timeout}s); healthy broadcasts may be reaped"
            ));
        }

        let ping = self.get_int("PRESENCE_PING_INTERVAL_SECONDS")?;
        let window = self.get_int("PRESENCE_WINDOW_SECONDS")?;
        if ping >= window {
            status.warnings.push(format!(
                "PRESENCE_PING_INTERVAL_SECONDS ({ping}) must be below \
                 PRESENCE_WINDOW_SECONDS ({window}) or viewers will flicker out"
            ));
        }

        Ok(status)
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    fn get_int(&self, key: &str) -> Result<i64, anyhow::Error> {
        let raw = self.get_setting(key)?;
        match raw.parse() {
            Ok(v) => Ok(v),
            Err(_) => Ok(DEFAULT_SETTINGS
                .get(key)
                .and_then(|d| d.default.parse().ok())
                .unwrap_or_default()),
        }
    }
}

fn has_secret_in_env() -> bool {
    SECRET_KEYS
        .iter()
        .any(|k| std::env::var(k).is_ok_and(|v| !v.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SettingGroup;

    fn manager() -> SettingsManager {
        SettingsManager::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn test_defaults_fill_missing() {
        let sm = manager();
        assert_eq!(sm.get_setting("STALE_MINUTES").unwrap(), "5");
        assert!(sm.get_setting("UNKNOWN").is_err());
    }

    #[test]
    fn test_set_validates() {
        let sm = manager();
        sm.set_setting("MAX_RETRIES", "3").unwrap();
        assert_eq!(sm.get_setting("MAX_RETRIES").unwrap(), "3");
        assert!(sm.set_setting("MAX_RETRIES", "many").is_err());
        assert!(sm.set_setting("NOT_A_KEY", "1").is_err());
        assert_eq!(sm.get_setting("MAX_RETRIES").unwrap(), "3");
    }

    #[test]
    fn test_reset_restores_default() {
        let sm = manager();
        sm.set_setting("REAPER_INTERVAL_SECONDS", "120").unwrap();
        sm.reset_setting("REAPER_INTERVAL_SECONDS").unwrap();
        assert_eq!(sm.get_setting("REAPER_INTERVAL_SECONDS").unwrap(), "60");
    }

    #[test]
    fn test_initialize_defaults_keeps_existing() {
        let sm = manager();
        sm.set_setting("SERVER_PORT", "9090").unwrap();
        sm.initialize_defaults().unwrap();
        assert_eq!(sm.db().get_setting("SERVER_PORT").unwrap().as_deref(), Some("9090"));
        assert_eq!(
            sm.db().get_setting("PRESENCE_WINDOW_SECONDS").unwrap().as_deref(),
            Some("120")
        );
    }

    #[test]
    fn test_all_settings_marks_secrets() {
        let sm = manager();
        sm.set_setting("ADMIN_TOKEN", "0123456789abcdef").unwrap();
        let all = sm.get_all_settings().unwrap();
        let admin = &all["ADMIN_TOKEN"];
        assert!(admin.secret);
        assert_eq!(admin.group, SettingGroup::Server);
        assert_eq!(all["STALE_MINUTES"].group, SettingGroup::Lease);
        assert!(admin.has_value);
        assert!(!all["TOKEN_ENDPOINT"].has_value);
        assert_eq!(all.len(), DEFAULT_SETTINGS.len());
    }

    #[test]
    fn test_feature_status() {
        let sm = manager();
        let status = sm.check_feature_status().unwrap();
        assert!(!status.token_issuer_configured);
        assert!(!status.admin_api_enabled);
        assert_eq!(status.missing_settings, vec!["TOKEN_ENDPOINT".to_string()]);

        sm.set_setting("TOKEN_ENDPOINT", "https://issuer.example.com/token").unwrap();
        sm.set_setting("ADMIN_TOKEN", "0123456789abcdef").unwrap();
        let status = sm.check_feature_status().unwrap();
        assert!(status.token_issuer_configured && status.admin_api_enabled);
        assert!(status.missing_settings.is_empty());
        assert!(status.warnings.is_empty());
    }

    #[test]
    fn test_feature_status_warns_on_tight_heartbeat() {
        let sm = manager();
        sm.set_setting("HEARTBEAT_INTERVAL_SECONDS", "120").unwrap();
        sm.set_setting("BROADCASTER_TIMEOUT_MINUTES", "3").unwrap();
        let status = sm.check_feature_status().unwrap();
        assert!(status.warnings.iter().any(|w| w.contains("HEARTBEAT_INTERVAL_SECONDS")));
    }
}
