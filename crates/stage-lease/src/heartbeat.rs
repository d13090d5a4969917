//! Periodic lease renewal.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use crate::manager::LeaseManager;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Background task renewing one lease every `interval`.
///
/// Failed renewals are only logged; the next tick is the retry. Dropping
/// the task stops it.
pub struct HeartbeatTask {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    beats: Arc<AtomicU64>,
}

impl HeartbeatTask {
    pub fn spawn(
        manager: LeaseManager,
        event_id: impl Into<String>,
        broadcaster_id: impl Into<String>,
        interval: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let beats = Arc::new(AtomicU64::new(0));
        let handle = tokio::spawn(run(
            manager,
            event_id.into(),
            broadcaster_id.into(),
            interval,
            cancel.clone(),
            beats.clone(),
        ));
        Self {
            cancel,
            handle: Some(handle),
            beats,
        }
    }

    /// Successful renewals so far.
    pub fn beats(&self) -> u64 {
        self.beats.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stop renewing. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop and wait for the task to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for HeartbeatTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    manager: LeaseManager,
    event_id: String,
    broadcaster_id: String,
    interval: Duration,
    cancel: CancellationToken,
    beats: Arc<AtomicU64>,
) {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut misses = 0u32;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        // The lease row may already be gone once stop() was called.
        if cancel.is_cancelled() {
            break;
        }
        if manager.heartbeat(&event_id, &broadcaster_id) {
            beats.fetch_add(1, Ordering::Relaxed);
            if misses > 0 {
                tracing::info!(event_id = %event_id, misses, "Heartbeat recovered");
            }
            misses = 0;
        } else {
            misses += 1;
        }
    }
    tracing::debug!(event_id = %event_id, "Heartbeat task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use stage_db::Database;

    /// Unix clock driven by tokio's (paused) time.
    fn tokio_clock() -> crate::Clock {
        let start = Instant::now();
        Arc::new(move || start.elapsed().as_secs() as i64)
    }

    fn live_manager() -> LeaseManager {
        let db = Database::open_in_memory().unwrap();
        db.create_event("ev-1", 0, 0).unwrap();
        let manager = LeaseManager::with_clock(db, tokio_clock());
        manager.go_live("ev-1", "artist").unwrap();
        manager
    }

    #[tokio::test(start_paused = true)]
    async fn test_renews_on_interval() {
        let manager = live_manager();
        let task = HeartbeatTask::spawn(manager.clone(), "ev-1", "artist", DEFAULT_HEARTBEAT_INTERVAL);

        tokio::time::sleep(Duration::from_secs(95)).await;
        assert_eq!(task.beats(), 3);
        let lease = manager.db().get_lease("ev-1").unwrap().unwrap();
        assert_eq!(lease.last_heartbeat, 90);
        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_final() {
        let manager = live_manager();
        let task = HeartbeatTask::spawn(manager.clone(), "ev-1", "artist", DEFAULT_HEARTBEAT_INTERVAL);

        tokio::time::sleep(Duration::from_secs(31)).await;
        task.stop();
        task.stop();
        assert!(!task.is_running());

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(task.beats(), 1);
        let lease = manager.db().get_lease("ev-1").unwrap().unwrap();
        assert_eq!(lease.last_heartbeat, 30);
        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_lease_keeps_ticking() {
        let manager = live_manager();
        let task = HeartbeatTask::spawn(manager.clone(), "ev-1", "artist", DEFAULT_HEARTBEAT_INTERVAL);

        manager.db().delete_lease("ev-1", "artist").unwrap();
        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(task.beats(), 0);

        // A re-registration is picked up by the next tick.
        manager.register_lease("ev-1", "artist").unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(task.beats(), 1);
        assert!(task.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_task() {
        let manager = live_manager();
        let task = HeartbeatTask::spawn(manager.clone(), "ev-1", "artist", DEFAULT_HEARTBEAT_INTERVAL);
        drop(task);

        tokio::time::sleep(Duration::from_secs(120)).await;
        let lease = manager.db().get_lease("ev-1").unwrap().unwrap();
        assert_eq!(lease.last_heartbeat, 0);
    }
}
