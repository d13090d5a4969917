//! Connection state machine.
//!
//! Synchronous and side-effect free: the async driver in
//! [`crate::controller`] feeds it inputs and performs whatever the returned
//! values ask for (schedule a retry, fire a callback).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::{DEFAULT_MAX_RETRIES, backoff_delay};
use crate::classify::ErrorClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Initializing,
    Joining,
    Connected,
    Disconnected,
    Retrying,
    Failed,
}

impl Phase {
    /// A connect sequence is running.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Initializing | Self::Joining)
    }
}

/// Caller-visible connection snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub phase: Phase,
    pub retry_count: u32,
    /// Human-readable description of the last failure.
    pub last_error: Option<String>,
    /// The session was closed by its owner; no further retries happen.
    pub session_ended: bool,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            retry_count: 0,
            last_error: None,
            session_ended: false,
        }
    }
}

/// What the driver must do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    Retry { attempt: u32, delay: Duration },
    Fail,
    /// The failure arrived while idle or already failed.
    Ignore,
}

#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    max_retries: u32,
    joined_notified: bool,
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl ConnectionMachine {
    pub fn new(max_retries: u32) -> Self {
        Self {
            state: ConnectionState::default(),
            max_retries,
            joined_notified: false,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Caller-initiated (re)connect, including a manual retry after `Failed`.
    ///
    /// Resets the retry budget. Returns `false` without changing anything if
    /// a connect sequence is already in flight.
    pub fn start(&mut self) -> bool {
        if self.state.phase.is_in_flight() {
            return false;
        }
        self.state = ConnectionState {
            phase: Phase::Initializing,
            retry_count: 0,
            last_error: None,
            session_ended: false,
        };
        true
    }

    /// The backoff delay elapsed. Keeps the retry count.
    pub fn retry_elapsed(&mut self) -> bool {
        if self.state.phase != Phase::Retrying {
            return false;
        }
        self.state.phase = Phase::Initializing;
        true
    }

    /// Token and transport client are ready; the join request goes out next.
    pub fn credentials_ready(&mut self) -> bool {
        if self.state.phase != Phase::Initializing {
            return false;
        }
        self.state.phase = Phase::Joining;
        true
    }

    /// The transport confirmed channel membership.
    ///
    /// Returns `true` when the caller's "joined" callback should fire, which
    /// happens once until the next teardown.
    pub fn join_confirmed(&mut self) -> bool {
        self.state.phase = Phase::Connected;
        self.state.retry_count = 0;
        self.state.last_error = None;
        if self.joined_notified {
            return false;
        }
        self.joined_notified = true;
        true
    }

    /// The transport left the connected state. Returns `false` if we were
    /// not connected, in which case the report is stale.
    pub fn connection_lost(&mut self, class: ErrorClass) -> bool {
        if self.state.phase != Phase::Connected {
            return false;
        }
        self.state.phase = Phase::Disconnected;
        self.state.last_error = Some(class.user_message().to_string());
        true
    }

    /// Decide how to recover from a failure of the given class.
    pub fn fail(&mut self, class: ErrorClass) -> Recovery {
        if matches!(self.state.phase, Phase::Idle | Phase::Failed) {
            return Recovery::Ignore;
        }
        match class {
            ErrorClass::Recoverable(_) if self.state.retry_count < self.max_retries => {
                self.state.retry_count += 1;
                self.state.phase = Phase::Retrying;
                self.state.last_error = Some(class.user_message().to_string());
                Recovery::Retry {
                    attempt: self.state.retry_count,
                    delay: backoff_delay(self.state.retry_count),
                }
            }
            ErrorClass::Recoverable(_) => {
                self.state.phase = Phase::Failed;
                self.state.last_error = Some(format!(
                    "Connection failed after {} attempts. Retry to try again.",
                    self.state.retry_count
                ));
                Recovery::Fail
            }
            ErrorClass::Fatal(_) | ErrorClass::Unclassified => {
                self.state.phase = Phase::Failed;
                self.state.last_error = Some(class.user_message().to_string());
                Recovery::Fail
            }
        }
    }

    /// Caller-initiated teardown. Returns `true` when the caller's "left"
    /// callback should fire, which requires a prior "joined".
    pub fn teardown(&mut self) -> bool {
        self.state = ConnectionState::default();
        std::mem::take(&mut self.joined_notified)
    }

    /// The session was ended by its owner (e.g. the event row became ended).
    /// Behaves like a teardown but is remembered in the state.
    pub fn session_ended(&mut self) -> bool {
        let left = self.teardown();
        self.state.session_ended = true;
        left
    }
}
