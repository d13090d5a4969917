//! Client-side connection controller for live sessions.
//!
//! Drives one viewer's or broadcaster's membership in a media channel:
//! credentials, join, publish/subscribe, failure classification and
//! bounded exponential backoff. The media transport and token issuer are
//! consumed through the traits in [`transport`] and [`token`].

pub mod backoff;
pub mod classify;
pub mod controller;
pub mod machine;
pub mod player;
pub mod token;
pub mod transport;

pub use classify::{ErrorClass, FatalReason, RetryCategory};
pub use controller::{Callbacks, ConnectionController, ConnectionHandle, ControllerConfig, Role};
pub use machine::{ConnectionMachine, ConnectionState, Phase, Recovery};
pub use player::{PlayerControl, PlayerSettings};
pub use token::{Credentials, HttpTokenIssuer, TokenIssuer, TokenRole};
pub use transport::{
    ClientMode, Codec, ConnectionStatus, LocalTrack, MediaKind, TransportClient, TransportEvent,
    TransportFactory,
};

/// Unified error type for the stage-client crate.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Token issuer error (status {status}): {message}")]
    TokenIssuer { status: u16, message: String },

    #[error("Transport error {code}: {message}")]
    Transport { code: String, message: String },

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Connection controller stopped")]
    Stopped,
}

impl ClientError {
    pub fn transport(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Map this error onto the retry taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Http(e) if e.is_timeout() => ErrorClass::Recoverable(RetryCategory::Timeout),
            Self::Http(e) if e.is_connect() => ErrorClass::Recoverable(RetryCategory::Connection),
            Self::Http(_) => ErrorClass::Recoverable(RetryCategory::Network),
            Self::TokenIssuer { status, message } => match status {
                401 | 403 => ErrorClass::Recoverable(RetryCategory::Authentication),
                408 => ErrorClass::Recoverable(RetryCategory::Timeout),
                429 => ErrorClass::Recoverable(RetryCategory::Network),
                502..=504 => ErrorClass::Recoverable(RetryCategory::Gateway),
                500..=599 => ErrorClass::Recoverable(RetryCategory::Network),
                _ => match classify::classify(None, message) {
                    ErrorClass::Unclassified => {
                        ErrorClass::Fatal(FatalReason::InvalidConfiguration)
                    }
                    class => class,
                },
            },
            Self::Transport { code, message } => classify::classify(Some(code), message),
            Self::ConnectionLost(_) => ErrorClass::Recoverable(RetryCategory::Connection),
            Self::InvalidConfig(_) | Self::UrlParse(_) => {
                ErrorClass::Fatal(FatalReason::InvalidConfiguration)
            }
            Self::Json(_) | Self::Stopped => ErrorClass::Unclassified,
        }
    }

    /// Human-readable text for the caller. Provider codes are not exposed.
    pub fn user_message(&self) -> &'static str {
        self.class().user_message()
    }
}
