//! Connection lifecycle state machine with a bounded reconnect policy.
//! Pure bookkeeping: the driver in [`crate::client`] performs the I/O and
//! reports what happened.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
    ReconnectPending,
}

/// What the driver should do after the transport closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Try again after `delay`.
    Reconnect { attempt: u32, delay: Duration },
    /// Cap reached; the backend is now reported unavailable.
    Exhausted { attempts: u32 },
    /// Client asked for the close; nothing to do.
    Stopped,
}

#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    attempts: u32,
    max_attempts: u32,
    backoff: Duration,
    backend_available: Option<bool>,
    exhausted: bool,
}

impl ConnectionMachine {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            max_attempts,
            backoff,
            backend_available: None,
            exhausted: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// `None` until the first probe or connect settles it.
    pub fn backend_available(&self) -> Option<bool> {
        self.backend_available
    }

    /// Consecutive closes since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Begin a handshake. Refused once the reconnect cap was hit; only
    /// [`Self::reconnect_requested`] lifts that.
    pub fn open_requested(&mut self) -> bool {
        if self.exhausted {
            return false;
        }
        self.state = ConnectionState::Connecting;
        true
    }

    pub fn opened(&mut self) {
        self.state = ConnectionState::Open;
        self.attempts = 0;
        self.exhausted = false;
        self.backend_available = Some(true);
    }

    pub fn close_requested(&mut self) {
        self.state = ConnectionState::Closing;
    }

    /// Transport error. Only marks the link down; the close that follows
    /// drives the reconnect bookkeeping so one failure is counted once.
    pub fn errored(&mut self) {
        if matches!(self.state, ConnectionState::Open | ConnectionState::Connecting) {
            self.state = ConnectionState::Disconnected;
        }
    }

    pub fn closed(&mut self, initiated_by_client: bool) -> CloseOutcome {
        if initiated_by_client {
            self.state = ConnectionState::Disconnected;
            return CloseOutcome::Stopped;
        }
        self.attempts += 1;
        if self.attempts < self.max_attempts {
            self.state = ConnectionState::ReconnectPending;
            CloseOutcome::Reconnect {
                attempt: self.attempts,
                delay: self.backoff,
            }
        } else {
            self.state = ConnectionState::Disconnected;
            self.exhausted = true;
            self.backend_available = Some(false);
            CloseOutcome::Exhausted {
                attempts: self.attempts,
            }
        }
    }

    /// Caller-triggered retry: clears the counter and the exhausted flag.
    pub fn reconnect_requested(&mut self) {
        self.attempts = 0;
        self.exhausted = false;
        self.state = ConnectionState::Connecting;
    }

    /// Health probe failed before any connect was attempted.
    pub fn mark_unavailable(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.backend_available = Some(false);
    }
}
