//! Periodic reconciliation for one event.

use std::time::Duration;

use stage_db::{Clock, Database, system_clock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::PresenceError;
use crate::reconcile::{Reconciler, Reconciliation};

/// Runs a pass immediately, then every `interval`, until stopped or the
/// event is no longer live. Failed passes are logged and retried on the
/// next tick.
pub struct ReconcilerTask {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    last: watch::Receiver<Option<Reconciliation>>,
}

impl ReconcilerTask {
    pub fn spawn(
        db: Database,
        event_id: impl Into<String>,
        interval: Duration,
        window: Duration,
    ) -> Self {
        Self::spawn_with_clock(db, event_id, interval, window, system_clock())
    }

    pub fn spawn_with_clock(
        db: Database,
        event_id: impl Into<String>,
        interval: Duration,
        window: Duration,
        clock: Clock,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (tx, last) = watch::channel(None);
        let reconciler = Reconciler::new(db, event_id, window);
        let handle = tokio::spawn(run(reconciler, interval, clock, cancel.clone(), tx));
        Self {
            cancel,
            handle: Some(handle),
            last,
        }
    }

    /// Result of the most recent successful pass.
    pub fn last(&self) -> Option<Reconciliation> {
        self.last.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Reconciliation>> {
        self.last.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ReconcilerTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    mut reconciler: Reconciler,
    interval: Duration,
    clock: Clock,
    cancel: CancellationToken,
    tx: watch::Sender<Option<Reconciliation>>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if cancel.is_cancelled() {
            break;
        }
        match reconciler.pass(clock()) {
            Ok(result) => {
                let live = result.live;
                tx.send_replace(Some(result));
                if !live {
                    tracing::info!(event_id = reconciler.event_id(), "Event not live, reconciler stopping");
                    break;
                }
            }
            Err(PresenceError::EventNotFound(id)) => {
                tracing::warn!(event_id = %id, "Event disappeared, reconciler stopping");
                break;
            }
            Err(e) => {
                tracing::warn!(event_id = reconciler.event_id(), error = %e, "Reconciliation pass failed");
            }
        }
    }
}
