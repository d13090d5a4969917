use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use stage_client::{
    Callbacks, ConnectionController, ConnectionHandle, ControllerConfig, Phase, PlayerControl,
};
use stage_presence::{IdentityKey, PresenceTracker};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{SessionContext, SessionError, log_state, open_event, wait_for_end};
use crate::background::sleep_or_cancel;

/// One viewer watching one event.
pub struct ViewerSession {
    event_id: String,
    identity: IdentityKey,
    handle: ConnectionHandle,
    tracker: PresenceTracker,
    cancel: CancellationToken,
    ended: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ViewerSession {
    /// Mark the viewer present and start connecting to the event's channel.
    pub fn start(
        ctx: &SessionContext,
        event_id: &str,
        identity: IdentityKey,
    ) -> Result<Self, SessionError> {
        open_event(&ctx.db, event_id)?;

        let tracker = PresenceTracker::new(ctx.db.clone());
        tracker.join(event_id, &identity)?;

        let cancel = ctx.shutdown.child_token();
        let config = ctx
            .config
            .controller(ControllerConfig::audience(event_id, identity.as_str()));
        let handle = ConnectionController::spawn_with_shutdown(
            config,
            ctx.factory.clone(),
            ctx.issuer.clone(),
            Callbacks::new().on_state(log_state("viewer", event_id.to_string())),
            cancel.clone(),
        );
        handle.connect()?;

        let ended = Arc::new(AtomicBool::new(false));
        let pings = cancel.child_token();
        let tasks = vec![
            tokio::spawn(ping_loop(
                tracker.clone(),
                handle.clone(),
                event_id.to_string(),
                identity.clone(),
                ctx.config.presence_ping_interval(),
                pings.clone(),
            )),
            tokio::spawn(close_on_end(
                tracker.clone(),
                handle.clone(),
                event_id.to_string(),
                identity.clone(),
                cancel.clone(),
                pings,
                ended.clone(),
            )),
        ];

        tracing::info!(event_id, identity = %identity, "Viewer session started");
        Ok(Self {
            event_id: event_id.to_string(),
            identity,
            handle,
            tracker,
            cancel,
            ended,
            tasks,
        })
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn identity(&self) -> &IdentityKey {
        &self.identity
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn player(&self) -> PlayerControl {
        self.handle.player()
    }

    /// The event ended while this session was open.
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Manual retry after the controller gave up.
    pub fn retry(&self) -> Result<(), SessionError> {
        Ok(self.handle.retry()?)
    }

    /// Leave the channel and mark the viewer departed. Returns whether the
    /// viewer was still counted as present.
    pub async fn leave(mut self) -> Result<bool, SessionError> {
        self.handle.teardown().await?;
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        let left = self.tracker.leave(&self.event_id, &self.identity)?;
        tracing::info!(event_id = %self.event_id, identity = %self.identity, "Viewer session closed");
        Ok(left)
    }
}

impl Drop for ViewerSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn ping_loop(
    tracker: PresenceTracker,
    handle: ConnectionHandle,
    event_id: String,
    identity: IdentityKey,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        if sleep_or_cancel(&cancel, interval).await {
            return;
        }
        // A viewer whose controller gave up is not watching; let the row expire.
        if handle.state().phase == Phase::Failed {
            continue;
        }
        if let Err(e) = tracker.ping_or_join(&event_id, &identity) {
            tracing::warn!(event_id, identity = %identity, "Presence ping failed: {e}");
        }
    }
}

async fn close_on_end(
    tracker: PresenceTracker,
    handle: ConnectionHandle,
    event_id: String,
    identity: IdentityKey,
    cancel: CancellationToken,
    pings: CancellationToken,
    ended: Arc<AtomicBool>,
) {
    if !wait_for_end(tracker.db(), &event_id, &cancel).await {
        return;
    }
    tracing::info!(event_id, "Event ended, closing viewer session");
    pings.cancel();
    ended.store(true, Ordering::SeqCst);
    if let Err(e) = tracker.leave(&event_id, &identity) {
        tracing::warn!(event_id, identity = %identity, "Failed to mark viewer departed: {e}");
    }
    if handle.end_session().is_err() {
        tracing::debug!(event_id, "Controller already stopped");
    }
}
