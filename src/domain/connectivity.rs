// Transport connectivity states and lifecycle events
use bytes::Bytes;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

/// Lifecycle event emitted by the streaming transport
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
    Error(String),
    Message { topic: String, payload: Bytes },
}

impl ConnectionEvent {
    /// The connectivity state this event transitions to, if any.
    pub fn state(&self) -> Option<ConnectivityState> {
        match self {
            ConnectionEvent::Connecting => Some(ConnectivityState::Connecting),
            ConnectionEvent::Connected => Some(ConnectivityState::Connected),
            ConnectionEvent::Reconnecting => Some(ConnectivityState::Reconnecting),
            ConnectionEvent::Disconnected => Some(ConnectivityState::Disconnected),
            ConnectionEvent::Error(_) => Some(ConnectivityState::Error),
            ConnectionEvent::Message { .. } => None,
        }
    }
}
