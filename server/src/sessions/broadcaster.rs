use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use stage_client::{
    Callbacks, ConnectionController, ConnectionHandle, ConnectionState, ControllerConfig, LocalTrack,
    Phase,
};
use stage_lease::{BroadcastLease, LeaseManager, Release};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{SessionContext, SessionError, log_state, open_event, wait_for_end};

type LeaseSlot = Arc<Mutex<Option<BroadcastLease>>>;

/// One broadcaster hosting one event.
///
/// The event goes live when the host's first join is confirmed, not when
/// the session starts, so a broadcaster that never reaches the channel
/// never shows up as live. Lease renewal stops while the controller is
/// `Failed` and restarts once it is `Connected` again.
pub struct BroadcasterSession {
    event_id: String,
    broadcaster_id: String,
    handle: ConnectionHandle,
    lease: LeaseSlot,
    cancel: CancellationToken,
    ended: Arc<AtomicBool>,
    watcher: Option<JoinHandle<()>>,
}

impl BroadcasterSession {
    pub fn start(
        ctx: &SessionContext,
        event_id: &str,
        broadcaster_id: &str,
        tracks: Vec<LocalTrack>,
    ) -> Result<Self, SessionError> {
        open_event(&ctx.db, event_id)?;

        let manager = LeaseManager::new(ctx.db.clone());
        let lease: LeaseSlot = Arc::new(Mutex::new(None));
        let cancel = ctx.shutdown.child_token();

        let on_joined = {
            let lease = lease.clone();
            let event_id = event_id.to_string();
            let broadcaster_id = broadcaster_id.to_string();
            let interval = ctx.config.heartbeat_interval();
            move || {
                let Ok(mut slot) = lease.lock() else {
                    return;
                };
                if slot.is_some() {
                    return;
                }
                match BroadcastLease::start(manager.clone(), &event_id, &broadcaster_id, interval) {
                    Ok(live) => *slot = Some(live),
                    Err(e) => tracing::warn!(
                        event_id = %event_id,
                        broadcaster_id = %broadcaster_id,
                        "Failed to go live: {e}"
                    ),
                }
            }
        };

        let config = ctx.config.controller(ControllerConfig::host(
            event_id,
            broadcaster_id,
            tracks,
        ));
        let handle = ConnectionController::spawn_with_shutdown(
            config,
            ctx.factory.clone(),
            ctx.issuer.clone(),
            Callbacks::new()
                .on_joined(on_joined)
                .on_state(follow_phase(lease.clone(), event_id.to_string())),
            cancel.clone(),
        );
        handle.connect()?;

        let ended = Arc::new(AtomicBool::new(false));
        let watcher = tokio::spawn(close_on_end(
            ctx.db.clone(),
            handle.clone(),
            event_id.to_string(),
            lease.clone(),
            cancel.clone(),
            ended.clone(),
        ));

        tracing::info!(event_id, broadcaster_id, "Broadcaster session started");
        Ok(Self {
            event_id: event_id.to_string(),
            broadcaster_id: broadcaster_id.to_string(),
            handle,
            lease,
            cancel,
            ended,
            watcher: Some(watcher),
        })
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn broadcaster_id(&self) -> &str {
        &self.broadcaster_id
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// The event is live under this session's lease.
    pub fn is_live(&self) -> bool {
        self.lease
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|l| !l.is_ended()))
            .unwrap_or(false)
    }

    /// The lease is being renewed. `false` while the connection is `Failed`.
    pub fn is_renewing(&self) -> bool {
        self.lease
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|l| l.is_renewing()))
            .unwrap_or(false)
    }

    /// Successful lease renewals so far.
    pub fn heartbeats(&self) -> u64 {
        self.lease
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|l| l.heartbeats()))
            .unwrap_or(0)
    }

    /// The event ended while this session was open.
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Stop broadcasting: leave the channel, release the lease and end the
    /// event.
    pub async fn end(mut self) -> Result<Release, SessionError> {
        self.handle.teardown().await?;
        self.cancel.cancel();
        if let Some(watcher) = self.watcher.take() {
            let _ = watcher.await;
        }
        let release = match take_lease(&self.lease) {
            Some(mut live) => live.end()?,
            None => Release::default(),
        };
        tracing::info!(
            event_id = %self.event_id,
            lease_deleted = release.lease_deleted,
            event_ended = release.event_ended,
            "Broadcaster session closed"
        );
        Ok(release)
    }
}

impl Drop for BroadcasterSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Keeps lease renewal in step with the connection: a host that failed is
/// not serving the event.
fn follow_phase(lease: LeaseSlot, event_id: String) -> impl Fn(&ConnectionState) + Send + Sync {
    let log = log_state("broadcaster", event_id);
    move |state| {
        log(state);
        let Ok(mut slot) = lease.lock() else {
            return;
        };
        let Some(live) = slot.as_mut() else {
            return;
        };
        match state.phase {
            Phase::Failed => {
                live.suspend();
            }
            Phase::Connected => {
                live.resume();
            }
            _ => {}
        }
    }
}

fn take_lease(slot: &LeaseSlot) -> Option<BroadcastLease> {
    slot.lock().ok().and_then(|mut slot| slot.take())
}

async fn close_on_end(
    db: stage_db::Database,
    handle: ConnectionHandle,
    event_id: String,
    lease: LeaseSlot,
    cancel: CancellationToken,
    ended: Arc<AtomicBool>,
) {
    if !wait_for_end(&db, &event_id, &cancel).await {
        return;
    }
    tracing::info!(event_id, "Event ended, closing broadcaster session");
    ended.store(true, Ordering::SeqCst);
    // The lease may belong to someone else by now; end() only releases our own.
    if let Some(mut live) = take_lease(&lease) {
        if let Err(e) = live.end() {
            tracing::warn!(event_id, "Failed to release lease: {e}");
        }
    }
    if handle.end_session().is_err() {
        tracing::debug!(event_id, "Controller already stopped");
    }
}
