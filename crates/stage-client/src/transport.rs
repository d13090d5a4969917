//! Media transport contract.
//!
//! The provider SDK is consumed through these traits so the controller can
//! be driven by a real client in production and a scripted fake in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientMode {
    /// One-to-many broadcast: hosts publish, the audience subscribes.
    Live,
    Rtc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Vp8,
    H264,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// A locally captured track owned by the transport client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalTrack {
    pub id: String,
    pub kind: MediaKind,
}

impl LocalTrack {
    pub fn new(id: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Disconnecting,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Reconnecting => "RECONNECTING",
            Self::Disconnecting => "DISCONNECTING",
        }
    }
}

/// Events emitted by a joined transport client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    UserPublished {
        uid: String,
        kind: MediaKind,
    },
    UserUnpublished {
        uid: String,
        kind: MediaKind,
    },
    ConnectionStateChange {
        current: ConnectionStatus,
        previous: ConnectionStatus,
    },
    Exception {
        code: String,
        message: String,
    },
}

pub trait TransportFactory: Send + Sync {
    fn create_client(
        &self,
        mode: ClientMode,
        codec: Codec,
    ) -> Result<Box<dyn TransportClient>, ClientError>;
}

#[async_trait]
pub trait TransportClient: Send {
    async fn join(
        &mut self,
        app_id: &str,
        channel: &str,
        token: &str,
        uid: &str,
    ) -> Result<(), ClientError>;

    async fn leave(&mut self) -> Result<(), ClientError>;

    async fn publish(&mut self, tracks: &[LocalTrack]) -> Result<(), ClientError>;

    async fn unpublish(&mut self) -> Result<(), ClientError>;

    async fn subscribe(&mut self, uid: &str, kind: MediaKind) -> Result<(), ClientError>;

    /// Drop a remote track after its publisher stopped sending it.
    async fn unsubscribe(&mut self, uid: &str, kind: MediaKind) -> Result<(), ClientError>;

    /// Playback volume for subscribed audio, 0..=100.
    async fn set_remote_volume(&mut self, volume: u8) -> Result<(), ClientError>;

    /// Stop and close every locally held track. Never fails.
    fn release_local_tracks(&mut self);

    /// Hand over the event stream. Yields `Some` once per client.
    fn take_events(&mut self) -> Option<mpsc::Receiver<TransportEvent>>;
}
