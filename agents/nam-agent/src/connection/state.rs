//! Device Socket State
//!
//! State machine for the agent's socket session with the control plane.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

/// Possible states of the device socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelState {
    /// No session, no attempt in flight
    Disconnected,
    /// Dialing the control plane
    Connecting,
    /// Session established and serving remote calls
    Connected,
    /// Waiting out the reconnect interval
    Reconnecting,
    /// The control plane rejected the device token
    Rejected,
    /// The agent is shutting down
    ShuttingDown,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelState::Disconnected => write!(f, "Disconnected"),
            ChannelState::Connecting => write!(f, "Connecting"),
            ChannelState::Connected => write!(f, "Connected"),
            ChannelState::Reconnecting => write!(f, "Reconnecting"),
            ChannelState::Rejected => write!(f, "Rejected"),
            ChannelState::ShuttingDown => write!(f, "ShuttingDown"),
        }
    }
}

/// Snapshot reported on the stats endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatus {
    pub state: ChannelState,
    pub last_connected: Option<DateTime<Utc>>,
    pub connection_attempts: u32,
    /// Why the socket last changed state, e.g. a disconnect cause
    pub last_reason: Option<String>,
}

struct ChannelStateInner {
    current: ChannelState,
    last_connected: Option<DateTime<Utc>>,
    connection_attempts: u32,
    last_reason: Option<String>,
}

/// Thread-safe, cheaply cloned socket state
#[derive(Clone)]
pub struct ChannelStateManager {
    inner: Arc<RwLock<ChannelStateInner>>,
}

impl ChannelStateManager {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(ChannelStateInner {
                current: ChannelState::Disconnected,
                last_connected: None,
                connection_attempts: 0,
                last_reason: None,
            })),
        }
    }

    pub fn current_state(&self) -> ChannelState {
        self.inner.read().current
    }

    /// Attempts since the last successful connection
    pub fn connection_attempts(&self) -> u32 {
        self.inner.read().connection_attempts
    }

    pub fn status(&self) -> ChannelStatus {
        let inner = self.inner.read();
        ChannelStatus {
            state: inner.current,
            last_connected: inner.last_connected,
            connection_attempts: inner.connection_attempts,
            last_reason: inner.last_reason.clone(),
        }
    }

    /// Transition to a new state; invalid transitions are ignored.
    pub fn transition_to(&self, new_state: ChannelState, reason: Option<String>) -> bool {
        let mut inner = self.inner.write();

        if !is_valid_transition(inner.current, new_state) {
            tracing::debug!(
                from = %inner.current,
                to = %new_state,
                "Ignoring invalid socket state transition"
            );
            return false;
        }

        let old_state = inner.current;
        inner.current = new_state;

        match new_state {
            ChannelState::Connected => {
                inner.last_connected = Some(Utc::now());
                inner.connection_attempts = 0;
            }
            ChannelState::Connecting => {
                inner.connection_attempts += 1;
            }
            _ => {}
        }
        inner.last_reason = reason;

        tracing::info!(
            from = %old_state,
            to = %new_state,
            attempts = inner.connection_attempts,
            "Device socket state transition"
        );

        true
    }

    pub fn set_connecting(&self) {
        self.transition_to(ChannelState::Connecting, Some("Initiating connection".to_string()));
    }

    pub fn set_connected(&self) {
        self.transition_to(ChannelState::Connected, Some("Connection established".to_string()));
    }

    pub fn set_disconnected(&self, reason: Option<String>) {
        self.transition_to(ChannelState::Disconnected, reason);
    }

    pub fn set_reconnecting(&self) {
        self.transition_to(
            ChannelState::Reconnecting,
            Some("Connection lost, reconnecting".to_string()),
        );
    }

    pub fn set_rejected(&self) {
        self.transition_to(ChannelState::Rejected, Some("Device token rejected".to_string()));
    }

    pub fn set_shutting_down(&self) {
        self.transition_to(ChannelState::ShuttingDown, Some("Shutdown requested".to_string()));
    }

    pub fn is_connected(&self) -> bool {
        self.current_state() == ChannelState::Connected
    }
}

impl Default for ChannelStateManager {
    fn default() -> Self {
        Self::new()
    }
}

fn is_valid_transition(from: ChannelState, to: ChannelState) -> bool {
    if from == to {
        return true;
    }
    // Terminal
    if from == ChannelState::ShuttingDown {
        return false;
    }
    if to == ChannelState::ShuttingDown {
        return true;
    }

    matches!(
        (from, to),
        (ChannelState::Disconnected, ChannelState::Connecting)
            | (ChannelState::Disconnected, ChannelState::Reconnecting)
            | (ChannelState::Connecting, ChannelState::Connected)
            | (ChannelState::Connecting, ChannelState::Disconnected)
            | (ChannelState::Connecting, ChannelState::Rejected)
            | (ChannelState::Connected, ChannelState::Disconnected)
            | (ChannelState::Connected, ChannelState::Rejected)
            | (ChannelState::Reconnecting, ChannelState::Connecting)
            | (ChannelState::Reconnecting, ChannelState::Disconnected)
    )
}
