//! Setting value validation.

use regex::Regex;
use std::sync::LazyLock;

static RE_HTTP_URL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^https?://[^\s/?#]+(:[0-9]{1,5})?(/[^\s]*)?$").ok());
static RE_TOKEN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._~+/=\-]{16,512}$").ok());

/// Validate a setting value. Returns `Ok(())` if valid, or an error message.
pub fn validate_setting(key: &str, value: &str) -> Result<(), String> {
    match key {
        "SERVER_PORT" => validate_int_range(value, 1, 65535)?,
        "TOKEN_ENDPOINT" => {
            if !value.is_empty() && !matches(&RE_HTTP_URL, value) {
                return Err("must be an http(s) URL".into());
            }
        }
        "ADMIN_TOKEN" | "TOKEN_ISSUER_BEARER" => {
            if !value.is_empty() && !matches(&RE_TOKEN, value) {
                return Err("must be 16-512 URL-safe characters".into());
            }
        }
        "TOKEN_TTL_SECONDS" => validate_int_range(value, 60, 86_400)?,
        "MAX_RETRIES" => validate_int_range(value, 0, 20)?,
        "HEARTBEAT_INTERVAL_SECONDS" => validate_int_range(value, 5, 300)?,
        "BROADCASTER_TIMEOUT_MINUTES" => validate_int_range(value, 1, 60)?,
        "STALE_MINUTES" => validate_int_range(value, 1, 120)?,
        "REAPER_INTERVAL_SECONDS" => validate_int_range(value, 10, 3600)?,
        "PRESENCE_WINDOW_SECONDS" => validate_int_range(value, 30, 3600)?,
        "RECONCILE_INTERVAL_SECONDS" => validate_int_range(value, 5, 3600)?,
        "PRESENCE_PING_INTERVAL_SECONDS" => validate_int_range(value, 5, 600)?,
        _ => {}
    }
    Ok(())
}

fn validate_int_range(value: &str, min: i64, max: i64) -> Result<(), String> {
    let v: i64 = value.parse().map_err(|_| "must be an integer")?;
    if !(min..=max).contains(&v) {
        return Err(format!("must be between {min} and {max}"));
    }
    Ok(())
}

fn matches(re: &Option<Regex>, value: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(value))
}
