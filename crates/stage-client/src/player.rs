//! Playback control handle.
//!
//! Volume and mute live with the controller instead of a process-wide
//! global, and survive reconnects: the driver re-applies the current
//! settings to every new transport client after it joins.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

pub const MAX_VOLUME: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSettings {
    pub volume: u8,
    pub muted: bool,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            volume: MAX_VOLUME,
            muted: false,
        }
    }
}

impl PlayerSettings {
    /// Volume actually sent to the transport.
    pub fn effective_volume(&self) -> u8 {
        if self.muted { 0 } else { self.volume }
    }
}

/// Cloneable handle for the UI layer.
#[derive(Clone)]
pub struct PlayerControl {
    tx: Arc<watch::Sender<PlayerSettings>>,
}

impl PlayerControl {
    pub(crate) fn new(tx: Arc<watch::Sender<PlayerSettings>>) -> Self {
        Self { tx }
    }

    pub fn settings(&self) -> PlayerSettings {
        *self.tx.borrow()
    }

    /// Values above 100 are clamped.
    pub fn set_volume(&self, volume: u8) {
        let volume = volume.min(MAX_VOLUME);
        self.tx.send_if_modified(|s| {
            let changed = s.volume != volume;
            s.volume = volume;
            changed
        });
    }

    pub fn mute(&self) {
        self.set_muted(true);
    }

    pub fn unmute(&self) {
        self.set_muted(false);
    }

    /// Returns the new muted flag.
    pub fn toggle_mute(&self) -> bool {
        let mut muted = false;
        self.tx.send_modify(|s| {
            s.muted = !s.muted;
            muted = s.muted;
        });
        muted
    }

    fn set_muted(&self, muted: bool) {
        self.tx.send_if_modified(|s| {
            let changed = s.muted != muted;
            s.muted = muted;
            changed
        });
    }
}
