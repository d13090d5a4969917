//! Runtime settings for the stage server.
//!
//! Every key has a default in [`defaults`], is checked by [`validation`]
//! before it is stored, lives in the `settings` table behind
//! [`SettingsManager`], and is read by the loops and sessions as a typed
//! [`AppConfig`].

pub mod app_config;
pub mod defaults;
pub mod manager;
pub mod validation;

pub use app_config::AppConfig;
pub use manager::SettingsManager;

use serde::{Deserialize, Serialize};

const MASK: &str = "********";

/// The part of the system a setting tunes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingGroup {
    /// HTTP listener and admin access.
    Server,
    /// Token issuer and reconnect budget of the connection controller.
    Client,
    /// Heartbeat cadence and reaper cutoffs.
    Lease,
    /// Presence window, pings and reconciliation cadence.
    Presence,
}

/// One entry of `GET /api/admin/settings`: the stored value, or the default
/// when nothing is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingInfo {
    pub key: String,
    pub value: String,
    pub group: SettingGroup,
    pub secret: bool,
    pub required: bool,
    pub description: String,
    pub has_value: bool,
}

impl SettingInfo {
    /// Hide the value of a secret that is set. Empty secrets stay empty so
    /// the admin can tell they are missing.
    pub fn masked(mut self) -> Self {
        if self.secret && self.has_value {
            self.value = MASK.to_string();
        }
        self
    }
}

/// What the stored settings allow right now.
///
/// Sessions need a token issuer to join any channel; the admin API refuses
/// every request until it has a token. `warnings` flags timing combinations
/// under which leases would be reaped while healthy, or present viewers
/// would drop out of the count between pings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureStatus {
    pub token_issuer_configured: bool,
    pub admin_api_enabled: bool,
    pub missing_settings: Vec<String>,
    pub warnings: Vec<String>,
}
