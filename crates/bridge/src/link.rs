//! Broker connection state tracker.

use std::sync::Mutex;

/// Where the bridge stands with its broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// No connection; a retry may be pending.
    #[default]
    Disconnected,
    /// TCP/MQTT handshake in flight.
    Connecting,
    /// CONNACK received, subscription not yet acknowledged.
    Connected,
    /// SUBACK received; the bridge is fully on the bus.
    Subscribed,
}

/// Shared, observable connection state.
///
/// The worker writes it; tests and diagnostics read it.
#[derive(Debug, Default)]
pub struct LinkWatch {
    state: Mutex<LinkState>,
}

impl LinkWatch {
    /// Create a watch in the disconnected state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transition.
    pub fn set(&self, state: LinkState) {
        if let Ok(mut current) = self.state.lock() {
            if *current != state {
                tracing::debug!(from = ?*current, to = ?state, "link state change");
                *current = state;
            }
        }
    }

    /// The current state.
    pub fn get(&self) -> LinkState {
        self.state.lock().map(|state| *state).unwrap_or_default()
    }

    /// Whether the bridge is fully subscribed.
    pub fn is_subscribed(&self) -> bool {
        self.get() == LinkState::Subscribed
    }
}
