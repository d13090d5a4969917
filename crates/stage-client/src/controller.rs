//! Per-client connection controller.
//!
//! [`ConnectionController::spawn`] starts one driver task that owns the
//! transport client, the state machine and the retry timer. Callers talk to
//! it through a cloneable [`ConnectionHandle`].

mod driver;


use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::backoff::DEFAULT_MAX_RETRIES;
use crate::machine::ConnectionState;
use crate::player::{PlayerControl, PlayerSettings};
use crate::token::{TokenIssuer, TokenRole};
use crate::transport::{ClientMode, Codec, LocalTrack, TransportFactory};
use crate::ClientError;

/// Default lifetime requested for join tokens.
pub const DEFAULT_TOKEN_TTL_SECONDS: u64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// Viewer: subscribes to whatever the hosts publish.
    Audience,
    /// Broadcaster: publishes its local tracks after joining.
    Host { tracks: Vec<LocalTrack> },
}

impl Role {
    pub fn token_role(&self) -> TokenRole {
        match self {
            Self::Audience => TokenRole::Subscriber,
            Self::Host { .. } => TokenRole::Publisher,
        }
    }

    pub fn is_host(&self) -> bool {
        matches!(self, Self::Host { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub channel: String,
    pub uid: String,
    pub role: Role,
    pub mode: ClientMode,
    pub codec: Codec,
    pub token_ttl_seconds: u64,
    pub max_retries: u32,
}

impl ControllerConfig {
    pub fn audience(channel: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            uid: uid.into(),
            role: Role::Audience,
            mode: ClientMode::Live,
            codec: Codec::Vp8,
            token_ttl_seconds: DEFAULT_TOKEN_TTL_SECONDS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn host(
        channel: impl Into<String>,
        uid: impl Into<String>,
        tracks: Vec<LocalTrack>,
    ) -> Self {
        Self {
            role: Role::Host { tracks },
            ..Self::audience(channel, uid)
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_token_ttl(mut self, seconds: u64) -> Self {
        self.token_ttl_seconds = seconds;
        self
    }
}

type Hook = Box<dyn Fn() + Send + Sync>;
type StateHook = Box<dyn Fn(&ConnectionState) + Send + Sync>;

/// Caller notifications, invoked from the driver task.
#[derive(Default)]
pub struct Callbacks {
    on_joined: Option<Hook>,
    on_left: Option<Hook>,
    on_state: Option<StateHook>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires once per join that was not already reported.
    pub fn on_joined<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_joined = Some(Box::new(f));
        self
    }

    /// Fires once per teardown, and only after `on_joined` fired.
    pub fn on_left<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_left = Some(Box::new(f));
        self
    }

    /// Fires on every published state change.
    pub fn on_state<F>(mut self, f: F) -> Self
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        self.on_state = Some(Box::new(f));
        self
    }

    fn joined(&self) {
        if let Some(f) = &self.on_joined {
            f();
        }
    }

    fn left(&self) {
        if let Some(f) = &self.on_left {
            f();
        }
    }

    fn state(&self, state: &ConnectionState) {
        if let Some(f) = &self.on_state {
            f(state);
        }
    }
}

#[derive(Debug)]
enum Command {
    Connect { channel: Option<String> },
    Retry,
    EndSession,
    /// `None` when every handle was dropped.
    Teardown(Option<oneshot::Sender<()>>),
}

pub struct ConnectionController;

impl ConnectionController {
    pub fn spawn(
        config: ControllerConfig,
        factory: Arc<dyn TransportFactory>,
        issuer: Arc<dyn TokenIssuer>,
        callbacks: Callbacks,
    ) -> ConnectionHandle {
        Self::spawn_with_shutdown(config, factory, issuer, callbacks, CancellationToken::new())
    }

    /// Like [`spawn`](Self::spawn), but the driver also stops (releasing the
    /// transport) when `shutdown` is cancelled.
    pub fn spawn_with_shutdown(
        config: ControllerConfig,
        factory: Arc<dyn TransportFactory>,
        issuer: Arc<dyn TokenIssuer>,
        callbacks: Callbacks,
        shutdown: CancellationToken,
    ) -> ConnectionHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::default());
        let (player_tx, player_rx) = watch::channel(PlayerSettings::default());
        let player_tx = Arc::new(player_tx);

        let driver = driver::Driver::new(
            config,
            factory,
            issuer,
            callbacks,
            state_tx,
            player_rx,
            player_tx.clone(),
            shutdown.clone(),
        );
        tokio::spawn(driver.run(cmd_rx));

        ConnectionHandle {
            cmd_tx,
            state_rx,
            player: PlayerControl::new(player_tx),
            shutdown,
        }
    }
}

#[derive(Clone)]
pub struct ConnectionHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    player: PlayerControl,
    shutdown: CancellationToken,
}

impl ConnectionHandle {
    /// Start (or restart) the connect sequence on the configured channel.
    /// Ignored while a connect is already in flight.
    pub fn connect(&self) -> Result<(), ClientError> {
        self.send(Command::Connect { channel: None })
    }

    /// Switch to another channel and reconnect.
    pub fn connect_to(&self, channel: impl Into<String>) -> Result<(), ClientError> {
        self.send(Command::Connect {
            channel: Some(channel.into()),
        })
    }

    /// Manual retry: resets the retry budget and starts over.
    pub fn retry(&self) -> Result<(), ClientError> {
        self.send(Command::Retry)
    }

    /// The session was ended elsewhere. Leaves the channel and stops retrying.
    pub fn end_session(&self) -> Result<(), ClientError> {
        self.send(Command::EndSession)
    }

    /// Leave the channel, cancel any pending retry and wait until the
    /// transport is released. Idempotent; succeeds if the driver is gone.
    pub async fn teardown(&self) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Teardown(Some(tx))).is_err() {
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }

    /// Stop the driver task for good.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn player(&self) -> PlayerControl {
        self.player.clone()
    }

    fn send(&self, cmd: Command) -> Result<(), ClientError> {
        self.cmd_tx.send(cmd).map_err(|_| ClientError::Stopped)
    }
}
