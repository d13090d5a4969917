use std::fmt;

use serde::{Deserialize, Serialize};

use crate::PresenceError;

/// Who a presence record belongs to.
///
/// The authenticated user id wins whenever it is present; the per-device key
/// is only the fallback for anonymous viewers. Every call site resolves
/// identities through [`IdentityKey::resolve`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityKey {
    key: String,
    user_id: Option<String>,
    device_key: Option<String>,
}

impl IdentityKey {
    pub fn resolve(user_id: Option<&str>, device_key: Option<&str>) -> Result<Self, PresenceError> {
        let user_id = non_empty(user_id);
        let device_key = non_empty(device_key);
        let key = match (&user_id, &device_key) {
            (Some(user), _) => format!("user:{user}"),
            (None, Some(device)) => format!("device:{device}"),
            (None, None) => return Err(PresenceError::MissingIdentity),
        };
        Ok(Self {
            key,
            user_id,
            device_key,
        })
    }

    /// The value stored in `presence_records.identity_key`.
    pub fn as_str(&self) -> &str {
        &self.key
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn device_key(&self) -> Option<&str> {
        self.device_key.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_preferred() {
        let id = IdentityKey::resolve(Some("u-1"), Some("dev-9")).unwrap();
        assert_eq!(id.as_str(), "user:u-1");
        assert_eq!(id.device_key(), Some("dev-9"));
        assert!(id.is_authenticated());
    }

    #[test]
    fn test_device_fallback() {
        let id = IdentityKey::resolve(None, Some("dev-9")).unwrap();
        assert_eq!(id.as_str(), "device:dev-9");
        let blank_user = IdentityKey::resolve(Some("  "), Some("dev-9")).unwrap();
        assert_eq!(blank_user, id);
    }

    #[test]
    fn test_missing_identity() {
        assert!(matches!(
            IdentityKey::resolve(None, Some("")),
            Err(PresenceError::MissingIdentity)
        ));
    }

    #[test]
    fn test_namespaces_do_not_collide() {
        let user = IdentityKey::resolve(Some("abc"), None).unwrap();
        let device = IdentityKey::resolve(None, Some("abc")).unwrap();
        assert_ne!(user.as_str(), device.as_str());
    }
}
