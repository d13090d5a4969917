use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;

use super::{Callbacks, Command, ControllerConfig, Role};
use crate::classify::{self, ErrorClass, RetryCategory};
use crate::machine::{ConnectionMachine, ConnectionState, Recovery};
use crate::player::PlayerSettings;
use crate::token::{Credentials, TokenIssuer};
use crate::transport::{
    ConnectionStatus, MediaKind, TransportClient, TransportEvent, TransportFactory,
};
use crate::ClientError;

/// Upper bound on the best-effort leave during release.
const LEAVE_TIMEOUT: Duration = Duration::from_secs(5);

enum Step<T> {
    Done(T),
    Interrupted(Command),
}

pub(super) struct Driver {
    config: ControllerConfig,
    factory: Arc<dyn TransportFactory>,
    issuer: Arc<dyn TokenIssuer>,
    callbacks: Callbacks,
    machine: ConnectionMachine,
    state_tx: watch::Sender<ConnectionState>,
    player_rx: watch::Receiver<PlayerSettings>,
    // Held so `player_rx.changed()` never reports a closed channel.
    _player_tx: Arc<watch::Sender<PlayerSettings>>,
    client: Option<Box<dyn TransportClient>>,
    events: Option<mpsc::Receiver<TransportEvent>>,
    retry_timer: Option<Pin<Box<Sleep>>>,
    shutdown: CancellationToken,
}

impl Driver {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        config: ControllerConfig,
        factory: Arc<dyn TransportFactory>,
        issuer: Arc<dyn TokenIssuer>,
        callbacks: Callbacks,
        state_tx: watch::Sender<ConnectionState>,
        player_rx: watch::Receiver<PlayerSettings>,
        player_tx: Arc<watch::Sender<PlayerSettings>>,
        shutdown: CancellationToken,
    ) -> Self {
        let machine = ConnectionMachine::new(config.max_retries);
        Self {
            config,
            factory,
            issuer,
            callbacks,
            machine,
            state_tx,
            player_rx,
            _player_tx: player_tx,
            client: None,
            events: None,
            retry_timer: None,
            shutdown,
        }
    }

    pub(super) async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        tracing::debug!(channel = %self.config.channel, "Connection driver started");
        loop {
            let mut pending = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => Some(cmd),
                    None => break,
                },
                event = next_event(&mut self.events) => {
                    self.handle_transport_event(event).await;
                    None
                }
                _ = retry_timer(&mut self.retry_timer) => {
                    self.retry_timer = None;
                    if self.machine.retry_elapsed() {
                        self.publish();
                        self.connect_sequence(&mut cmd_rx).await
                    } else {
                        None
                    }
                }
                Ok(()) = self.player_rx.changed() => {
                    self.apply_player_settings().await;
                    None
                }
            };
            while let Some(cmd) = pending.take() {
                pending = self.handle_command(cmd, &mut cmd_rx).await;
            }
        }

        self.close(false).await;
        tracing::debug!(channel = %self.config.channel, "Connection driver stopped");
    }

    /// Returns a command that interrupted a connect sequence it started.
    async fn handle_command(
        &mut self,
        cmd: Command,
        cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Option<Command> {
        match cmd {
            Command::Connect { channel } => {
                if let Some(channel) = channel {
                    if channel != self.config.channel {
                        tracing::info!(from = %self.config.channel, to = %channel, "Switching channel");
                        self.config.channel = channel;
                    }
                }
                self.restart(cmd_rx).await
            }
            Command::Retry => {
                tracing::info!(channel = %self.config.channel, "Manual retry requested");
                self.restart(cmd_rx).await
            }
            Command::EndSession => {
                tracing::info!(channel = %self.config.channel, "Session ended, leaving channel");
                self.close(true).await;
                None
            }
            Command::Teardown(reply) => {
                self.close(false).await;
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
                None
            }
        }
    }

    async fn restart(&mut self, cmd_rx: &mut mpsc::UnboundedReceiver<Command>) -> Option<Command> {
        if !self.machine.start() {
            tracing::debug!("Connect already in flight, ignoring");
            return None;
        }
        self.retry_timer = None;
        self.release_client().await;
        self.publish();
        self.connect_sequence(cmd_rx).await
    }

    /// Token, client, join, publish. The machine must already be in
    /// `Initializing`. Teardown and end-session commands abort the sequence
    /// and are handed back to the caller; connect requests are dropped.
    async fn connect_sequence(
        &mut self,
        cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Option<Command> {
        if self.config.channel.trim().is_empty() || self.config.uid.trim().is_empty() {
            self.on_failure(ClientError::InvalidConfig(
                "channel and uid must not be empty".into(),
            ))
            .await;
            return None;
        }

        tracing::info!(
            channel = %self.config.channel,
            attempt = self.machine.state().retry_count,
            "Connecting"
        );

        let token = self.issuer.generate_token(
            &self.config.channel,
            &self.config.uid,
            self.config.role.token_role(),
            self.config.token_ttl_seconds,
        );
        let creds = match interruptible(cmd_rx, &self.shutdown, token).await {
            Step::Done(Ok(creds)) => creds,
            Step::Done(Err(e)) => {
                self.on_failure(e).await;
                return None;
            }
            Step::Interrupted(cmd) => return Some(cmd),
        };

        let mut client = match self.factory.create_client(self.config.mode, self.config.codec) {
            Ok(client) => client,
            Err(e) => {
                self.on_failure(e).await;
                return None;
            }
        };
        self.events = client.take_events();
        self.machine.credentials_ready();
        self.publish();

        let settings = *self.player_rx.borrow_and_update();
        let join = join_and_start(client.as_mut(), &creds, &self.config, settings);
        let outcome = interruptible(cmd_rx, &self.shutdown, join).await;
        // Stored before handling the outcome so an interrupted or failed
        // join still gets released.
        self.client = Some(client);
        match outcome {
            Step::Done(Ok(())) => {
                let first = self.machine.join_confirmed();
                self.publish();
                tracing::info!(channel = %self.config.channel, "Joined channel");
                if first {
                    self.callbacks.joined();
                }
                None
            }
            Step::Done(Err(e)) => {
                self.on_failure(e).await;
                None
            }
            Step::Interrupted(cmd) => Some(cmd),
        }
    }

    async fn on_failure(&mut self, err: ClientError) {
        let class = err.class();
        match self.machine.fail(class) {
            Recovery::Retry { attempt, delay } => {
                tracing::warn!(
                    channel = %self.config.channel,
                    error = %err,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Connection failed, retrying"
                );
                self.release_client().await;
                self.retry_timer = Some(Box::pin(tokio::time::sleep(delay)));
            }
            Recovery::Fail => {
                tracing::error!(
                    channel = %self.config.channel,
                    error = %err,
                    class = ?class,
                    "Connection failed"
                );
                self.release_client().await;
                self.retry_timer = None;
            }
            Recovery::Ignore => {
                tracing::debug!(error = %err, "Ignoring failure while idle");
                return;
            }
        }
        self.publish();
    }

    async fn handle_transport_event(&mut self, event: Option<TransportEvent>) {
        let Some(event) = event else {
            self.events = None;
            if self.client.is_some() {
                self.connection_lost(ClientError::ConnectionLost(
                    "transport event stream closed".into(),
                ))
                .await;
            }
            return;
        };

        match event {
            TransportEvent::ConnectionStateChange { current, previous } => {
                tracing::debug!(
                    current = current.as_str(),
                    previous = previous.as_str(),
                    "Transport state change"
                );
                // Transitions queued during the join (CONNECTING and the like)
                // are not losses.
                let lost = current != ConnectionStatus::Connected
                    && (previous == ConnectionStatus::Connected
                        || current == ConnectionStatus::Disconnected);
                if lost {
                    self.connection_lost(ClientError::ConnectionLost(format!(
                        "{} -> {}",
                        previous.as_str(),
                        current.as_str()
                    )))
                    .await;
                }
            }
            TransportEvent::Exception { code, message } => {
                match classify::classify(Some(&code), &message) {
                    ErrorClass::Unclassified => {
                        tracing::debug!(code = %code, message = %message, "Transport exception ignored");
                    }
                    ErrorClass::Recoverable(_) => {
                        self.connection_lost(ClientError::transport(code, message)).await;
                    }
                    ErrorClass::Fatal(_) => {
                        self.on_failure(ClientError::transport(code, message)).await;
                    }
                }
            }
            TransportEvent::UserPublished { uid, kind } => {
                if self.config.role.is_host() {
                    return;
                }
                let volume = self.player_rx.borrow().effective_volume();
                let Some(client) = self.client.as_mut() else {
                    return;
                };
                let mut result = client.subscribe(&uid, kind).await;
                if result.is_ok() && kind == MediaKind::Audio {
                    result = client.set_remote_volume(volume).await;
                }
                match result {
                    Ok(()) => tracing::debug!(uid = %uid, kind = ?kind, "Subscribed to remote track"),
                    Err(e) => self.on_failure(e).await,
                }
            }
            TransportEvent::UserUnpublished { uid, kind } => {
                if self.config.role.is_host() {
                    return;
                }
                if let Some(client) = self.client.as_mut() {
                    if let Err(e) = client.unsubscribe(&uid, kind).await {
                        tracing::warn!(uid = %uid, error = %e, "Unsubscribe failed");
                    }
                }
            }
        }
    }

    async fn connection_lost(&mut self, err: ClientError) {
        let class = match err.class() {
            ErrorClass::Unclassified => ErrorClass::Recoverable(RetryCategory::Connection),
            class => class,
        };
        if !self.machine.connection_lost(class) {
            return;
        }
        tracing::warn!(channel = %self.config.channel, error = %err, "Connection lost");
        self.publish();
        self.on_failure(err).await;
    }

    async fn apply_player_settings(&mut self) {
        let settings = *self.player_rx.borrow_and_update();
        if self.config.role.is_host() {
            return;
        }
        if let Some(client) = self.client.as_mut() {
            if let Err(e) = client.set_remote_volume(settings.effective_volume()).await {
                tracing::warn!(error = %e, "Failed to apply playback volume");
            }
        }
    }

    /// Teardown and end-session share this path.
    async fn close(&mut self, session_ended: bool) {
        self.retry_timer = None;
        self.release_client().await;
        let left = if session_ended {
            self.machine.session_ended()
        } else {
            self.machine.teardown()
        };
        self.publish();
        if left {
            tracing::info!(channel = %self.config.channel, "Left channel");
            self.callbacks.left();
        }
    }

    /// Best-effort release: local tracks are always released, whatever
    /// the remote calls return.
    async fn release_client(&mut self) {
        self.events = None;
        let Some(mut client) = self.client.take() else {
            return;
        };
        if self.config.role.is_host() {
            if let Err(e) = client.unpublish().await {
                tracing::warn!(error = %e, "Unpublish failed during release");
            }
        }
        match tokio::time::timeout(LEAVE_TIMEOUT, client.leave()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Leave failed during release"),
            Err(_) => tracing::warn!("Leave timed out during release"),
        }
        client.release_local_tracks();
    }

    fn publish(&self) {
        let next = self.machine.state().clone();
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next.clone();
            true
        });
        if changed {
            self.callbacks.state(&next);
        }
    }
}

async fn join_and_start(
    client: &mut dyn TransportClient,
    creds: &Credentials,
    config: &ControllerConfig,
    settings: PlayerSettings,
) -> Result<(), ClientError> {
    client
        .join(&creds.app_id, &config.channel, &creds.token, &config.uid)
        .await?;
    match &config.role {
        Role::Host { tracks } => client.publish(tracks).await?,
        Role::Audience => client.set_remote_volume(settings.effective_volume()).await?,
    }
    Ok(())
}

/// Drive `fut` to completion unless a teardown-like command or shutdown
/// arrives first. Connect and retry requests received meanwhile are dropped.
async fn interruptible<T>(
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    shutdown: &CancellationToken,
    fut: impl Future<Output = T>,
) -> Step<T> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            out = &mut fut => return Step::Done(out),
            _ = shutdown.cancelled() => return Step::Interrupted(Command::Teardown(None)),
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Connect { .. } | Command::Retry) => {
                    tracing::debug!("Connect already in flight, ignoring");
                }
                Some(cmd) => return Step::Interrupted(cmd),
                None => return Step::Interrupted(Command::Teardown(None)),
            },
        }
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<TransportEvent>>) -> Option<TransportEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn retry_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
