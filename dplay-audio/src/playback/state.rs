//! Lifecycle state management
//!
//! Every transition is logged and broadcast as `PlayerEvent::StateChanged`.

pub use dplay_common::events::LifecycleState;

use dplay_common::events::{EventBus, PlayerEvent};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

/// Lifecycle state shared between the player and its init worker.
///
/// Cloning shares the underlying state.
#[derive(Debug, Clone)]
pub struct SharedLifecycle {
    state: Arc<Mutex<LifecycleState>>,
    events: EventBus,
}

impl SharedLifecycle {
    pub fn new(events: EventBus) -> Self {
        Self {
            state: Arc::new(Mutex::new(LifecycleState::Created)),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self) -> LifecycleState {
        *self.lock()
    }

    fn announce(&self, from: LifecycleState, to: LifecycleState) {
        info!("Lifecycle: {} -> {}", from, to);
        self.events.emit(PlayerEvent::StateChanged { state: to });
    }

    /// Move to `to` only if the current state is `from`
    pub fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        {
            let mut state = self.lock();
            if *state != from {
                return false;
            }
            *state = to;
        }
        self.announce(from, to);
        true
    }

    /// Enter `Releasing` unless teardown already started.
    ///
    /// Returns false when the state is `Releasing` or `Released`.
    pub fn begin_release(&self) -> bool {
        let from = {
            let mut state = self.lock();
            let from = *state;
            if matches!(from, LifecycleState::Releasing | LifecycleState::Released) {
                return false;
            }
            *state = LifecycleState::Releasing;
            from
        };
        self.announce(from, LifecycleState::Releasing);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_requires_expected_state() {
        let lifecycle = SharedLifecycle::new(EventBus::new(8));
        assert!(!lifecycle.transition(LifecycleState::Initializing, LifecycleState::Playing));
        assert_eq!(lifecycle.get(), LifecycleState::Created);

        assert!(lifecycle.transition(LifecycleState::Created, LifecycleState::Initializing));
        assert_eq!(lifecycle.get(), LifecycleState::Initializing);
    }

    #[test]
    fn test_transitions_are_broadcast() {
        let events = EventBus::new(8);
        let mut rx = events.subscribe();
        let lifecycle = SharedLifecycle::new(events);

        lifecycle.transition(LifecycleState::Created, LifecycleState::Initializing);

        assert_eq!(
            rx.try_recv().unwrap(),
            PlayerEvent::StateChanged {
                state: LifecycleState::Initializing
            }
        );
    }

    #[test]
    fn test_begin_release_only_once() {
        let lifecycle = SharedLifecycle::new(EventBus::new(8));
        assert!(lifecycle.begin_release());
        assert!(!lifecycle.begin_release());

        assert!(lifecycle.transition(LifecycleState::Releasing, LifecycleState::Released));
        assert!(!lifecycle.begin_release());
        assert_eq!(lifecycle.get(), LifecycleState::Released);
    }
}
