use std::time::Duration;

use stage_db::BroadcasterLease;

use crate::heartbeat::HeartbeatTask;
use crate::manager::{LeaseManager, Release};
use crate::LeaseError;

/// A live broadcast: the registered lease plus the task renewing it.
pub struct BroadcastLease {
    manager: LeaseManager,
    lease: BroadcasterLease,
    interval: Duration,
    heartbeat: HeartbeatTask,
    /// Renewals made by heartbeat tasks that were suspended since.
    earlier_beats: u64,
    ended: bool,
}

impl BroadcastLease {
    /// Go live and start heartbeating. On error nothing was marked live and
    /// no task is running.
    pub fn start(
        manager: LeaseManager,
        event_id: &str,
        broadcaster_id: &str,
        interval: Duration,
    ) -> Result<Self, LeaseError> {
        let lease = manager.go_live(event_id, broadcaster_id)?;
        let heartbeat = HeartbeatTask::spawn(manager.clone(), event_id, broadcaster_id, interval);
        Ok(Self {
            manager,
            lease,
            interval,
            heartbeat,
            earlier_beats: 0,
            ended: false,
        })
    }

    pub fn event_id(&self) -> &str {
        &self.lease.event_id
    }

    pub fn broadcaster_id(&self) -> &str {
        &self.lease.broadcaster_id
    }

    pub fn heartbeats(&self) -> u64 {
        self.earlier_beats + self.heartbeat.beats()
    }

    /// Renewals are running.
    pub fn is_renewing(&self) -> bool {
        !self.ended && self.heartbeat.is_running()
    }

    /// Stop renewing but keep the lease row, so the reaper ends the event
    /// once the lease goes stale. Returns whether renewal was running.
    pub fn suspend(&mut self) -> bool {
        if !self.is_renewing() {
            return false;
        }
        self.heartbeat.stop();
        tracing::info!(event_id = %self.lease.event_id, "Lease renewal suspended");
        true
    }

    /// Renew at once and restart the heartbeat after [`suspend`](Self::suspend).
    /// Returns whether renewal was restarted.
    pub fn resume(&mut self) -> bool {
        if self.ended || self.heartbeat.is_running() {
            return false;
        }
        let event_id = &self.lease.event_id;
        let broadcaster_id = &self.lease.broadcaster_id;
        if !self.manager.heartbeat(event_id, broadcaster_id) {
            tracing::warn!(event_id = %event_id, "Lease lost while suspended");
        }
        self.earlier_beats += self.heartbeat.beats();
        self.heartbeat = HeartbeatTask::spawn(
            self.manager.clone(),
            event_id.as_str(),
            broadcaster_id.as_str(),
            self.interval,
        );
        tracing::info!(event_id = %event_id, "Lease renewal resumed");
        true
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Stop heartbeating, delete the lease and end the event. Only the first
    /// call touches the store.
    pub fn end(&mut self) -> Result<Release, LeaseError> {
        self.heartbeat.stop();
        if self.ended {
            return Ok(Release::default());
        }
        let release = self
            .manager
            .release_lease(&self.lease.event_id, &self.lease.broadcaster_id)?;
        self.ended = true;
        Ok(release)
    }
}
