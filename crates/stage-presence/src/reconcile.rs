//! Viewer-count reconciliation.
//!
//! A pass recomputes the distinct viewer count from presence records and
//! compares it with the cached `viewer_count`. Higher fresh counts overwrite
//! the cache at once. A lower fresh count is held for one pass; if the next
//! pass is still lower, [`Reconciler`] settles the cache down to the higher
//! of the two readings.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stage_db::{Database, EventStatus, PresenceRecord};

use crate::PresenceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "count", rename_all = "snake_case")]
pub enum Decision {
    Unchanged,
    /// Overwrite the cache with the fresh count.
    Raise(i64),
    /// Fresh count is lower; keep the cache for now.
    Hold,
}

pub fn decide(cached: i64, fresh: i64) -> Decision {
    match fresh.cmp(&cached) {
        std::cmp::Ordering::Greater => Decision::Raise(fresh),
        std::cmp::Ordering::Equal => Decision::Unchanged,
        std::cmp::Ordering::Less => Decision::Hold,
    }
}

/// Distinct viewers among active records seen at or after `cutoff`.
///
/// Authenticated users count once each. An anonymous record counts only if
/// its device is not already attributed to an authenticated user, so one
/// person who signed in mid-session is not counted twice, while two users
/// sharing a device still count as two.
pub fn distinct_viewers(records: &[PresenceRecord], cutoff: i64) -> i64 {
    let fresh: Vec<&PresenceRecord> = records
        .iter()
        .filter(|r| r.is_active && r.last_seen >= cutoff)
        .collect();

    let users: HashSet<&str> = fresh.iter().filter_map(|r| r.user_id.as_deref()).collect();
    let claimed_devices: HashSet<&str> = fresh
        .iter()
        .filter(|r| r.user_id.is_some())
        .filter_map(|r| r.device_key.as_deref())
        .collect();
    let anonymous: HashSet<&str> = fresh
        .iter()
        .filter(|r| r.user_id.is_none())
        .map(|r| r.device_key.as_deref().unwrap_or(&r.identity_key))
        .filter(|device| !claimed_devices.contains(device))
        .collect();

    (users.len() + anonymous.len()) as i64
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub event_id: String,
    pub live: bool,
    /// Cached counter before the pass.
    pub cached: i64,
    /// Distinct viewers computed from presence records.
    pub fresh: i64,
    /// Cached counter after the pass.
    pub applied: i64,
    pub peak: i64,
    pub decision: Decision,
}

/// One stateless pass. Never lowers the cached counter.
pub fn reconcile_event(
    db: &Database,
    event_id: &str,
    window: Duration,
    now: i64,
) -> Result<Reconciliation, PresenceError> {
    let event = db
        .get_event(event_id)?
        .ok_or_else(|| PresenceError::EventNotFound(event_id.to_string()))?;
    let cutoff = now - window.as_secs() as i64;
    let records = db.active_presence(event_id)?;
    let fresh = distinct_viewers(&records, cutoff);
    let cached = event.viewer_count;
    let decision = decide(cached, fresh);

    if fresh != cached {
        tracing::warn!(event_id, cached, fresh, "Viewer count discrepancy");
    }

    let applied = match decision {
        Decision::Raise(count) => {
            if db.raise_viewer_count(event_id, count, now)? {
                tracing::info!(event_id, from = cached, to = count, "Viewer count corrected upward");
                count
            } else {
                // Someone wrote a higher value in between.
                db.get_event(event_id)?
                    .map(|e| e.viewer_count)
                    .unwrap_or(count)
            }
        }
        Decision::Hold | Decision::Unchanged => cached,
    };

    if db.raise_peak_viewers(event_id, fresh, now)? {
        tracing::debug!(event_id, peak = fresh, "New peak viewer count");
    }
    let peak = db.get_peak_viewers(event_id)?;

    Ok(Reconciliation {
        event_id: event_id.to_string(),
        live: event.status == EventStatus::Live,
        cached,
        fresh,
        applied,
        peak,
        decision,
    })
}

/// Reconciliation state for one event across passes.
pub struct Reconciler {
    db: Database,
    event_id: String,
    window: Duration,
    /// Fresh count of the previous pass, if it was below the cache.
    held: Option<i64>,
}

impl Reconciler {
    pub fn new(db: Database, event_id: impl Into<String>, window: Duration) -> Self {
        Self {
            db,
            event_id: event_id.into(),
            window,
            held: None,
        }
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn pass(&mut self, now: i64) -> Result<Reconciliation, PresenceError> {
        let mut result = reconcile_event(&self.db, &self.event_id, self.window, now)?;
        if result.decision != Decision::Hold {
            self.held = None;
            return Ok(result);
        }

        let Some(previous) = self.held.replace(result.fresh) else {
            return Ok(result);
        };
        let floor = previous.max(result.fresh);
        if floor < result.cached
            && self
                .db
                .replace_viewer_count(&self.event_id, result.cached, floor, now)?
        {
            tracing::info!(
                event_id = %self.event_id,
                from = result.cached,
                to = floor,
                "Viewer count settled downward"
            );
            result.applied = floor;
            self.held = None;
        }
        Ok(result)
    }
}
