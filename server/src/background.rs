//! Background task loops: lease reaping, viewer-count reconciliation, presence pruning.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use stage_db::{Database, DbError, EventStatus, unix_now};
use stage_lease::{ReapReport, ReaperPolicy, reap_stale_leases};
use stage_presence::{Reconciler, Reconciliation, prune_departed};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::app::SharedState;

/// Presence rows are deleted once they are this many windows old.
const PRUNE_WINDOWS: u32 = 2;

pub(crate) async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => true,
        _ = sleep(duration) => false,
    }
}

/// Periodically end live events whose broadcaster stopped heartbeating.
pub async fn reaper_loop(state: SharedState) {
    let shutdown_token = state.shutdown_token().clone();

    loop {
        let (policy, interval) = {
            let config = state.config().await;
            (config.reaper_policy(), config.reaper_interval())
        };

        run_reaper_pass(state.db(), policy, unix_now());

        if sleep_or_cancel(&shutdown_token, interval).await {
            tracing::info!("Reaper loop stopped (shutdown)");
            return;
        }
    }
}

/// One reaper pass. Errors are logged; the next tick retries.
pub fn run_reaper_pass(db: &Database, policy: ReaperPolicy, now: i64) -> Option<ReapReport> {
    match reap_stale_leases(db, policy, now) {
        Ok(report) => {
            if !report.is_empty() {
                tracing::info!(
                    reaped = report.reaped.len(),
                    orphaned = report.orphaned_leases,
                    "Reaper pass ended stale broadcasts"
                );
            }
            Some(report)
        }
        Err(e) => {
            tracing::warn!("Reaper pass failed: {e}");
            None
        }
    }
}

/// Reconcile every live event's viewer count, once at startup and then on
/// every interval.
pub async fn reconcile_loop(state: SharedState) {
    let shutdown_token = state.shutdown_token().clone();
    let mut reconcilers = LiveReconcilers::default();

    loop {
        let (window, interval) = {
            let config = state.config().await;
            (config.presence_window(), config.reconcile_interval())
        };

        if let Err(e) = reconcilers.pass(state.db(), window, unix_now()) {
            tracing::warn!("Failed to list live events for reconciliation: {e}");
        }

        if sleep_or_cancel(&shutdown_token, interval).await {
            tracing::info!("Reconcile loop stopped (shutdown)");
            return;
        }
    }
}

/// One [`Reconciler`] per live event, so the downward hold spans passes.
#[derive(Default)]
pub struct LiveReconcilers {
    window: Option<Duration>,
    reconcilers: HashMap<String, Reconciler>,
}

impl LiveReconcilers {
    /// Reconcile all live events. Reconcilers of events that are no longer
    /// live are dropped; a window change starts every event afresh.
    pub fn pass(
        &mut self,
        db: &Database,
        window: Duration,
        now: i64,
    ) -> Result<Vec<Reconciliation>, DbError> {
        if self.window != Some(window) {
            self.reconcilers.clear();
            self.window = Some(window);
        }

        let live = db.list_events_by_status(EventStatus::Live)?;
        let live_ids: HashSet<&str> = live.iter().map(|e| e.id.as_str()).collect();
        self.reconcilers.retain(|id, _| live_ids.contains(id.as_str()));

        let mut results = Vec::with_capacity(live.len());
        for event in &live {
            let reconciler = self
                .reconcilers
                .entry(event.id.clone())
                .or_insert_with(|| Reconciler::new(db.clone(), event.id.clone(), window));
            match reconciler.pass(now) {
                Ok(result) => results.push(result),
                Err(e) => tracing::warn!(event_id = %event.id, "Reconciliation failed: {e}"),
            }
        }
        Ok(results)
    }

    pub fn tracked(&self) -> usize {
        self.reconcilers.len()
    }
}

/// Periodically delete presence rows of live events that have long expired.
pub async fn presence_prune_loop(state: SharedState) {
    let shutdown_token = state.shutdown_token().clone();

    loop {
        let window = state.config().await.presence_window();

        if sleep_or_cancel(&shutdown_token, window).await {
            tracing::info!("Presence prune loop stopped (shutdown)");
            return;
        }

        match prune_live_events(state.db(), window * PRUNE_WINDOWS, unix_now()) {
            Ok(0) => {}
            Ok(removed) => tracing::debug!(removed, "Presence prune pass"),
            Err(e) => tracing::warn!("Presence prune failed: {e}"),
        }
    }
}

pub fn prune_live_events(db: &Database, older_than: Duration, now: i64) -> Result<usize, DbError> {
    let mut removed = 0;
    for event in db.list_events_by_status(EventStatus::Live)? {
        match prune_departed(db, &event.id, older_than, now) {
            Ok(n) => removed += n,
            Err(e) => tracing::warn!(event_id = %event.id, "Failed to prune presence: {e}"),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use crate::config::AppConfig;

    use super::*;

    const WINDOW: Duration = Duration::from_secs(120);

    fn live_event(db: &Database, id: &str, cached: i64, viewers: usize, now: i64) {
        db.create_event(id, now, now).unwrap();
        db.mark_event_live(id, now).unwrap();
        db.upsert_lease(id, "artist", now).unwrap();
        db.set_viewer_count(id, cached, now).unwrap();
        for i in 0..viewers {
            let user = format!("{id}-u{i}");
            db.upsert_presence(id, &format!("user:{user}"), Some(&user), None, now)
                .unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_or_cancel() {
        let token = CancellationToken::new();
        assert!(!sleep_or_cancel(&token, Duration::from_secs(1)).await);
        token.cancel();
        assert!(sleep_or_cancel(&token, Duration::from_secs(3600)).await);
    }

    #[test]
    fn test_reconcilers_cover_live_events_only() {
        let db = Database::open_in_memory().unwrap();
        live_event(&db, "a", 1, 3, 1_000);
        live_event(&db, "b", 0, 2, 1_000);
        db.create_event("scheduled", 0, 0).unwrap();

        let mut live = LiveReconcilers::default();
        let results = live.pass(&db, WINDOW, 1_000).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(live.tracked(), 2);
        assert_eq!(db.get_event("a").unwrap().unwrap().viewer_count, 3);
        assert_eq!(db.get_event("b").unwrap().unwrap().viewer_count, 2);

        db.mark_event_ended("b", 1_010).unwrap();
        live.pass(&db, WINDOW, 1_030).unwrap();
        assert_eq!(live.tracked(), 1);
    }

    #[test]
    fn test_reconcilers_keep_hold_across_passes() {
        let db = Database::open_in_memory().unwrap();
        live_event(&db, "a", 5, 3, 1_000);

        let mut live = LiveReconcilers::default();
        assert_eq!(live.pass(&db, WINDOW, 1_000).unwrap()[0].applied, 5);
        assert_eq!(live.pass(&db, WINDOW, 1_030).unwrap()[0].applied, 3);
    }

    #[test]
    fn test_window_change_resets_hold() {
        let db = Database::open_in_memory().unwrap();
        live_event(&db, "a", 5, 3, 1_000);

        let mut live = LiveReconcilers::default();
        live.pass(&db, WINDOW, 1_000).unwrap();
        let after_change = live.pass(&db, Duration::from_secs(300), 1_030).unwrap();
        assert_eq!(after_change[0].applied, 5);
    }

    #[test]
    fn test_reaper_pass_reports() {
        let db = Database::open_in_memory().unwrap();
        db.create_event("ev", 0, 0).unwrap();
        db.mark_event_live("ev", 0).unwrap();
        db.upsert_lease("ev", "artist", 0).unwrap();

        let report = run_reaper_pass(&db, ReaperPolicy::default(), 10 * 60).unwrap();
        assert_eq!(report.reaped.len(), 1);
        assert_eq!(db.get_event("ev").unwrap().unwrap().status, EventStatus::Ended);
    }

    #[test]
    fn test_prune_live_events() {
        let db = Database::open_in_memory().unwrap();
        live_event(&db, "a", 0, 2, 0);
        db.upsert_presence("a", "user:fresh", Some("fresh"), None, 1_000)
            .unwrap();

        let removed = prune_live_events(&db, WINDOW * PRUNE_WINDOWS, 1_000).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(db.active_presence("a").unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loops_stop_on_shutdown() {
        let db = Database::open_in_memory().unwrap();
        live_event(&db, "a", 0, 1, unix_now());
        let state = SharedState::new(db.clone(), AppConfig::default(), PathBuf::from("."));

        let reaper = tokio::spawn(reaper_loop(state.clone()));
        let reconcile = tokio::spawn(reconcile_loop(state.clone()));
        let prune = tokio::spawn(presence_prune_loop(state.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        // The lease is fresh, so the reaper leaves the event alone and the
        // reconcile loop has already run its first pass.
        let event = db.get_event("a").unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Live);
        assert_eq!(event.viewer_count, 1);
        assert_eq!(db.get_peak_viewers("a").unwrap(), 1);

        state.shutdown_token().cancel();
        reaper.await.unwrap();
        reconcile.await.unwrap();
        prune.await.unwrap();
    }
}
