//! Event types for the dplay event system

use crate::status::{ErrorSink, ThreadMode};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::error;

/// Player lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Constructed, nothing started
    Created,
    /// Device initialisation running on the init worker
    Initializing,
    /// Device accepted its first buffer
    Playing,
    /// Teardown in progress
    Releasing,
    /// All resources freed
    Released,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Created => write!(f, "created"),
            LifecycleState::Initializing => write!(f, "initializing"),
            LifecycleState::Playing => write!(f, "playing"),
            LifecycleState::Releasing => write!(f, "releasing"),
            LifecycleState::Released => write!(f, "released"),
        }
    }
}

/// dplay event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// Lifecycle state changed
    StateChanged { state: LifecycleState },

    /// Fatal error reported through the error sink
    Error { code: i32, message: String },

    /// Decode loop returned an empty buffer; nothing more will be queued
    EndOfStream,
}

/// Broadcast channel for player events.
///
/// Cloning shares the underlying channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Broadcast an event to all subscribers
    pub fn emit(&self, event: PlayerEvent) {
        // No receivers is OK
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

impl ErrorSink for EventBus {
    fn report_error(&self, mode: ThreadMode, code: i32, message: &str) {
        error!(?mode, code, "{}", message);
        self.emit(PlayerEvent::Error {
            code,
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = PlayerEvent::StateChanged {
            state: LifecycleState::Playing,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"StateChanged","state":"playing"}"#);

        let back: PlayerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_emit_without_subscribers_is_ok() {
        let bus = EventBus::new(4);
        bus.emit(PlayerEvent::EndOfStream);
    }

    #[test]
    fn test_error_sink_broadcasts_error_event() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();

        bus.report_error(ThreadMode::Main, 1002, "init failed");

        match rx.try_recv().unwrap() {
            PlayerEvent::Error { code, message } => {
                assert_eq!(code, 1002);
                assert_eq!(message, "init failed");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_lifecycle_state_display() {
        assert_eq!(LifecycleState::Releasing.to_string(), "releasing");
        assert_eq!(LifecycleState::Created.to_string(), "created");
    }
}
