//! All setting definitions with their default values.

use std::collections::HashMap;
use std::sync::LazyLock;

use super::SettingGroup;

type DefTuple = (&'static str, &'static str, bool, bool, &'static str);

const SERVER_DEFS: &[DefTuple] = &[
    ("SERVER_PORT", "8080", false, false, "HTTP port for the status and admin API"),
    ("ADMIN_TOKEN", "", true, false, "Bearer token for /api/admin; the admin API is disabled while empty"),
];

const CLIENT_DEFS: &[DefTuple] = &[
    ("TOKEN_ENDPOINT", "", false, true, "URL of the channel token issuer"),
    ("TOKEN_ISSUER_BEARER", "", true, false, "Bearer token sent to the token issuer"),
    ("TOKEN_TTL_SECONDS", "3600", false, false, "Requested lifetime of join tokens"),
    ("MAX_RETRIES", "5", false, false, "Automatic reconnect attempts before giving up"),
];

const LEASE_DEFS: &[DefTuple] = &[
    ("HEARTBEAT_INTERVAL_SECONDS", "30", false, false, "Broadcaster lease renewal interval"),
    ("BROADCASTER_TIMEOUT_MINUTES", "3", false, false, "Heartbeat age after which a lease is void"),
    ("STALE_MINUTES", "5", false, false, "Grace period for a live event with no lease at all"),
    ("REAPER_INTERVAL_SECONDS", "60", false, false, "How often stale leases are reaped"),
];

const PRESENCE_DEFS: &[DefTuple] = &[
    ("PRESENCE_WINDOW_SECONDS", "120", false, false, "Viewers not seen within this window count as departed"),
    ("RECONCILE_INTERVAL_SECONDS", "30", false, false, "How often viewer counts are reconciled"),
    ("PRESENCE_PING_INTERVAL_SECONDS", "30", false, false, "Viewer presence ping interval"),
];

const DEF_GROUPS: &[(SettingGroup, &[DefTuple])] = &[
    (SettingGroup::Server, SERVER_DEFS),
    (SettingGroup::Client, CLIENT_DEFS),
    (SettingGroup::Lease, LEASE_DEFS),
    (SettingGroup::Presence, PRESENCE_DEFS),
];

/// A single setting definition.
#[derive(Debug, Clone)]
pub struct SettingDef {
    pub key: &'static str,
    pub group: SettingGroup,
    pub default: &'static str,
    pub secret: bool,
    pub required: bool,
    pub description: &'static str,
}

/// Global setting definitions indexed by key.
pub static DEFAULT_SETTINGS: LazyLock<HashMap<&'static str, SettingDef>> = LazyLock::new(|| {
    DEF_GROUPS
        .iter()
        .flat_map(|&(group, defs)| defs.iter().map(move |def| (group, def)))
        .map(|(group, &(key, default, secret, required, description))| {
            (
                key,
                SettingDef {
                    key,
                    group,
                    default,
                    secret,
                    required,
                    description,
                },
            )
        })
        .collect()
});

/// Get the default value for a setting key, or `None` if not defined.
pub fn get_default(key: &str) -> Option<&'static str> {
    DEFAULT_SETTINGS.get(key).map(|d| d.default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::validation::validate_setting;

    #[test]
    fn test_defaults_pass_validation() {
        for def in DEFAULT_SETTINGS.values() {
            assert!(
                validate_setting(def.key, def.default).is_ok(),
                "default for {} should validate",
                def.key
            );
        }
    }

    #[test]
    fn test_get_default() {
        assert_eq!(get_default("SERVER_PORT"), Some("8080"));
        assert_eq!(get_default("MAX_RETRIES"), Some("5"));
        assert_eq!(get_default("NOPE"), None);
    }

    #[test]
    fn test_secrets() {
        assert!(DEFAULT_SETTINGS["ADMIN_TOKEN"].secret);
        assert!(DEFAULT_SETTINGS["TOKEN_ISSUER_BEARER"].secret);
        assert!(!DEFAULT_SETTINGS["TOKEN_ENDPOINT"].secret);
    }
}
