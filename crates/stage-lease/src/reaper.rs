//! Stale lease sweep.
//!
//! Safe to run repeatedly and from several places at once: every write is a
//! conditional single-row statement, so a sweep that loses a race simply
//! finds nothing left to do.

use serde::{Deserialize, Serialize};
use stage_db::{Database, EventStatus};

use crate::LeaseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaperPolicy {
    /// A live event with no lease row at all is ended after this long.
    pub stale_minutes: u32,
    /// A lease whose heartbeat is older than this is void.
    pub broadcaster_timeout_minutes: u32,
}

impl Default for ReaperPolicy {
    fn default() -> Self {
        Self {
            stale_minutes: 5,
            broadcaster_timeout_minutes: 3,
        }
    }
}

impl ReaperPolicy {
    fn heartbeat_cutoff(&self, now: i64) -> i64 {
        now - i64::from(self.broadcaster_timeout_minutes) * 60
    }

    fn lease_grace_cutoff(&self, now: i64) -> i64 {
        now - i64::from(self.stale_minutes) * 60
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ReapReason {
    StaleHeartbeat {
        broadcaster_id: String,
        heartbeat_age_seconds: i64,
    },
    MissingLease {
        live_seconds: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReapedEvent {
    pub event_id: String,
    #[serde(flatten)]
    pub reason: ReapReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReapReport {
    /// Live events inspected.
    pub examined: usize,
    pub reaped: Vec<ReapedEvent>,
    /// Stale leases removed whose event was no longer live.
    pub orphaned_leases: usize,
}

impl ReapReport {
    pub fn is_empty(&self) -> bool {
        self.reaped.is_empty() && self.orphaned_leases == 0
    }
}

/// End every live event whose broadcaster stopped heartbeating.
pub fn reap_stale_leases(
    db: &Database,
    policy: ReaperPolicy,
    now: i64,
) -> Result<ReapReport, LeaseError> {
    let heartbeat_cutoff = policy.heartbeat_cutoff(now);
    let grace_cutoff = policy.lease_grace_cutoff(now);
    let mut report = ReapReport::default();

    for event in db.list_events_by_status(EventStatus::Live)? {
        report.examined += 1;
        let reason = match db.get_lease(&event.id)? {
            Some(lease) if lease.last_heartbeat < heartbeat_cutoff => {
                // A heartbeat landing after the read makes this a no-op.
                if !db.delete_lease_if_stale(&event.id, heartbeat_cutoff)? {
                    continue;
                }
                ReapReason::StaleHeartbeat {
                    heartbeat_age_seconds: lease.heartbeat_age(now),
                    broadcaster_id: lease.broadcaster_id,
                }
            }
            Some(_) => continue,
            None => {
                let live_since = event.went_live_at.unwrap_or(event.updated_at);
                if live_since >= grace_cutoff {
                    continue;
                }
                ReapReason::MissingLease {
                    live_seconds: now - live_since,
                }
            }
        };

        if db.mark_event_ended(&event.id, now)? {
            tracing::warn!(event_id = %event.id, reason = ?reason, "Reaped stale live event");
            report.reaped.push(ReapedEvent {
                event_id: event.id,
                reason,
            });
        }
    }

    for lease in db.list_leases()? {
        if lease.last_heartbeat >= heartbeat_cutoff {
            continue;
        }
        let event_live = db
            .get_event(&lease.event_id)?
            .is_some_and(|e| e.status == EventStatus::Live);
        if !event_live && db.delete_lease_if_stale(&lease.event_id, heartbeat_cutoff)? {
            tracing::info!(event_id = %lease.event_id, "Removed orphaned lease");
            report.orphaned_leases += 1;
        }
    }

    if !report.is_empty() {
        tracing::info!(
            examined = report.examined,
            reaped = report.reaped.len(),
            orphaned = report.orphaned_leases,
            "Reaper sweep finished"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::LeaseManager;

    const POLICY: ReaperPolicy = ReaperPolicy {
        stale_minutes: 5,
        broadcaster_timeout_minutes: 3,
    };

    fn live_event(db: &Database, id: &str, broadcaster: &str, at: i64) {
        db.create_event(id, at, at).unwrap();
        LeaseManager::new(db.clone())
            .go_live_at(id, broadcaster, at)
            .unwrap();
    }

    fn status(db: &Database, id: &str) -> EventStatus {
        db.get_event(id).unwrap().unwrap().status
    }

    #[test]
    fn test_fresh_heartbeats_keep_event_live() {
        let db = Database::open_in_memory().unwrap();
        live_event(&db, "ev-1", "artist", 0);
        let manager = LeaseManager::new(db.clone());
        for t in (30..=180).step_by(30) {
            assert!(manager.heartbeat_at("ev-1", "artist", t));
        }

        let report = reap_stale_leases(&db, POLICY, 200).unwrap();
        assert_eq!(report.examined, 1);
        assert!(report.reaped.is_empty());
        assert_eq!(status(&db, "ev-1"), EventStatus::Live);
        assert!(db.get_lease("ev-1").unwrap().is_some());
    }

    #[test]
    fn test_crashed_broadcaster_is_reaped() {
        let db = Database::open_in_memory().unwrap();
        live_event(&db, "ev-1", "artist", 0);

        let report = reap_stale_leases(&db, POLICY, 200).unwrap();
        assert_eq!(
            report.reaped,
            vec![ReapedEvent {
                event_id: "ev-1".into(),
                reason: ReapReason::StaleHeartbeat {
                    broadcaster_id: "artist".into(),
                    heartbeat_age_seconds: 200,
                },
            }]
        );
        assert!(db.get_lease("ev-1").unwrap().is_none());
        assert_eq!(status(&db, "ev-1"), EventStatus::Ended);
    }

    #[test]
    fn test_reaping_twice_changes_state_once() {
        let db = Database::open_in_memory().unwrap();
        live_event(&db, "ev-1", "artist", 0);

        let first = reap_stale_leases(&db, POLICY, 200).unwrap();
        let ended_at = db.get_event("ev-1").unwrap().unwrap().updated_at;
        let second = reap_stale_leases(&db, POLICY, 260).unwrap();

        assert_eq!(first.reaped.len(), 1);
        assert!(second.is_empty());
        assert_eq!(second.examined, 0);
        assert_eq!(db.get_event("ev-1").unwrap().unwrap().updated_at, ended_at);
    }

    #[test]
    fn test_heartbeat_exactly_at_cutoff_survives() {
        let db = Database::open_in_memory().unwrap();
        live_event(&db, "ev-1", "artist", 20);

        // Age 180s is not older than the 3 minute timeout.
        assert!(reap_stale_leases(&db, POLICY, 200).unwrap().reaped.is_empty());
        assert_eq!(
            reap_stale_leases(&db, POLICY, 201).unwrap().reaped.len(),
            1
        );
    }

    #[test]
    fn test_live_event_without_lease() {
        let db = Database::open_in_memory().unwrap();
        db.create_event("ev-1", 0, 0).unwrap();
        db.mark_event_live("ev-1", 100).unwrap();

        // Inside the stale window nothing happens.
        let early = reap_stale_leases(&db, POLICY, 100 + 5 * 60).unwrap();
        assert!(early.reaped.is_empty());

        let late = reap_stale_leases(&db, POLICY, 100 + 5 * 60 + 1).unwrap();
        assert_eq!(
            late.reaped[0].reason,
            ReapReason::MissingLease { live_seconds: 301 }
        );
        assert_eq!(status(&db, "ev-1"), EventStatus::Ended);
    }

    #[test]
    fn test_orphaned_stale_lease_is_removed() {
        let db = Database::open_in_memory().unwrap();
        db.create_event("ev-1", 0, 0).unwrap();
        db.upsert_lease("ev-1", "artist", 0).unwrap();
        db.upsert_lease("ev-ghost", "artist", 0).unwrap();

        let report = reap_stale_leases(&db, POLICY, 500).unwrap();
        assert_eq!(report.examined, 0);
        assert_eq!(report.orphaned_leases, 2);
        assert!(db.list_leases().unwrap().is_empty());
        assert_eq!(status(&db, "ev-1"), EventStatus::Scheduled);
    }

    #[test]
    fn test_only_stale_events_are_reaped() {
        let db = Database::open_in_memory().unwrap();
        live_event(&db, "ev-stale", "a", 0);
        live_event(&db, "ev-fresh", "b", 0);
        LeaseManager::new(db.clone()).heartbeat_at("ev-fresh", "b", 190);

        let report = reap_stale_leases(&db, POLICY, 200).unwrap();
        assert_eq!(report.examined, 2);
        assert_eq!(report.reaped.len(), 1);
        assert_eq!(report.reaped[0].event_id, "ev-stale");
        assert_eq!(status(&db, "ev-fresh"), EventStatus::Live);
    }

    #[test]
    fn test_report_serializes_reason_inline() {
        let event = ReapedEvent {
            event_id: "ev-1".into(),
            reason: ReapReason::MissingLease { live_seconds: 400 },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_id"], "ev-1");
        assert_eq!(json["reason"], "missing_lease");
        assert_eq!(json["live_seconds"], 400);
    }
}
