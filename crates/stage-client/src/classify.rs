//! Failure taxonomy for connection errors.
//!
//! Classification is a table lookup over the provider's error code and
//! free-text message. Fatal patterns are checked first: a rejected
//! credential reported through a gateway error must not be retried.

use serde::{Deserialize, Serialize};

/// Transient failure categories. Any of these drives the controller into
/// `Retrying` while retry budget remains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryCategory {
    Network,
    Connection,
    Gateway,
    Timeout,
    Authentication,
}

/// Failures that retrying cannot fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalReason {
    InvalidCredentials,
    InvalidConfiguration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "reason")]
pub enum ErrorClass {
    Recoverable(RetryCategory),
    Fatal(FatalReason),
    Unclassified,
}

/// Exact provider codes that are never retried.
const FATAL_CODES: &[(&str, FatalReason)] = &[
    ("INVALID_TOKEN", FatalReason::InvalidCredentials),
    ("INVALID_CREDENTIALS", FatalReason::InvalidCredentials),
    ("INVALID_VENDOR_KEY", FatalReason::InvalidCredentials),
    ("INVALID_APP_ID", FatalReason::InvalidConfiguration),
    ("INVALID_CHANNEL_NAME", FatalReason::InvalidConfiguration),
    ("INVALID_PARAMS", FatalReason::InvalidConfiguration),
];

/// Message fragments (lowercase) that are never retried.
const FATAL_MESSAGES: &[(&str, FatalReason)] = &[
    ("invalid token", FatalReason::InvalidCredentials),
    ("invalid credential", FatalReason::InvalidCredentials),
    ("invalid vendor key", FatalReason::InvalidCredentials),
    ("invalid app id", FatalReason::InvalidConfiguration),
    ("invalid appid", FatalReason::InvalidConfiguration),
    ("invalid channel", FatalReason::InvalidConfiguration),
];

/// Exact provider codes known to be transient.
const RETRYABLE_CODES: &[(&str, RetryCategory)] = &[
    ("NETWORK_ERROR", RetryCategory::Network),
    ("NETWORK_RESPONSE_ERROR", RetryCategory::Network),
    ("NETWORK_TIMEOUT", RetryCategory::Timeout),
    ("WS_ABORT", RetryCategory::Connection),
    ("WS_DISCONNECT", RetryCategory::Connection),
    ("CAN_NOT_GET_GATEWAY_SERVER", RetryCategory::Gateway),
    ("TOKEN_EXPIRED", RetryCategory::Authentication),
];

/// Keywords (lowercase) matched anywhere in the code or message.
const RETRYABLE_KEYWORDS: &[(&str, RetryCategory)] = &[
    ("network", RetryCategory::Network),
    ("connection", RetryCategory::Connection),
    ("gateway", RetryCategory::Gateway),
    ("timeout", RetryCategory::Timeout),
    ("authentication", RetryCategory::Authentication),
];

/// Classify a failure from its structured code and/or free-text message.
/// Matching is case-insensitive.
pub fn classify(code: Option<&str>, message: &str) -> ErrorClass {
    let code = code.map(|c| c.trim().to_ascii_uppercase()).unwrap_or_default();
    let message = message.to_lowercase();

    if let Some(&(_, reason)) = FATAL_CODES.iter().find(|(c, _)| *c == code) {
        return ErrorClass::Fatal(reason);
    }
    if let Some(&(_, reason)) = FATAL_MESSAGES.iter().find(|(m, _)| message.contains(m)) {
        return ErrorClass::Fatal(reason);
    }
    if let Some(&(_, category)) = RETRYABLE_CODES.iter().find(|(c, _)| *c == code) {
        return ErrorClass::Recoverable(category);
    }

    let haystack = format!("{} {}", code.to_lowercase(), message);
    RETRYABLE_KEYWORDS
        .iter()
        .find(|(keyword, _)| haystack.contains(keyword))
        .map(|&(_, category)| ErrorClass::Recoverable(category))
        .unwrap_or(ErrorClass::Unclassified)
}

impl ErrorClass {
    pub fn is_recoverable(self) -> bool {
        matches!(self, Self::Recoverable(_))
    }

    pub fn is_fatal(self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    pub fn user_message(self) -> &'static str {
        match self {
            Self::Recoverable(RetryCategory::Network) => "Network connection lost. Reconnecting.",
            Self::Recoverable(RetryCategory::Connection) => {
                "Connection to the live session was interrupted. Reconnecting."
            }
            Self::Recoverable(RetryCategory::Gateway) => {
                "The streaming gateway could not be reached. Reconnecting."
            }
            Self::Recoverable(RetryCategory::Timeout) => "The connection timed out. Reconnecting.",
            Self::Recoverable(RetryCategory::Authentication) => {
                "Session access expired. Requesting new access."
            }
            Self::Fatal(FatalReason::InvalidCredentials) => {
                "Access to this session was denied. Please check your ticket."
            }
            Self::Fatal(FatalReason::InvalidConfiguration) => {
                "This session is not configured correctly and cannot be joined."
            }
            Self::Unclassified => "Unable to connect to the live session.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_are_case_insensitive() {
        let cases = vec![
            ("Network unreachable", RetryCategory::Network),
            ("CONNECTION reset by peer", RetryCategory::Connection),
            ("bad Gateway", RetryCategory::Gateway),
            ("request TIMEOUT", RetryCategory::Timeout),
            ("Authentication expired", RetryCategory::Authentication),
        ];

        for (msg, expected) in cases {
            assert_eq!(
                classify(None, msg),
                ErrorClass::Recoverable(expected),
                "message '{}' should be recoverable",
                msg
            );
        }
    }

    #[test]
    fn test_retryable_codes() {
        assert_eq!(
            classify(Some("network_timeout"), ""),
            ErrorClass::Recoverable(RetryCategory::Timeout)
        );
        assert_eq!(
            classify(Some("WS_ABORT"), "aborted"),
            ErrorClass::Recoverable(RetryCategory::Connection)
        );
        assert_eq!(
            classify(Some("TOKEN_EXPIRED"), ""),
            ErrorClass::Recoverable(RetryCategory::Authentication)
        );
    }

    #[test]
    fn test_fatal_wins_over_retryable_keywords() {
        assert_eq!(
            classify(
                Some("CAN_NOT_GET_GATEWAY_SERVER"),
                "flag: 4096, message: AgoraRTCError CAN_NOT_GET_GATEWAY_SERVER: invalid token"
            ),
            ErrorClass::Fatal(FatalReason::InvalidCredentials)
        );
        assert_eq!(
            classify(Some("INVALID_APP_ID"), "network is fine"),
            ErrorClass::Fatal(FatalReason::InvalidConfiguration)
        );
        assert_eq!(
            classify(None, "Invalid Channel name"),
            ErrorClass::Fatal(FatalReason::InvalidConfiguration)
        );
    }

    #[test]
    fn test_unknown_errors_are_unclassified() {
        assert_eq!(classify(None, "permission denied"), ErrorClass::Unclassified);
        assert_eq!(classify(Some("OPERATION_ABORTED"), ""), ErrorClass::Unclassified);
    }

    #[test]
    fn test_user_message_hides_provider_codes() {
        let class = classify(Some("INVALID_TOKEN"), "dynamic key expired");
        assert!(!class.user_message().contains("INVALID_TOKEN"));
        assert!(class.is_fatal());
        assert!(!class.is_recoverable());
    }
}
