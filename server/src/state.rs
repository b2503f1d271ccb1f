//! Connectivity state, reported through the event bus.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::debug;

use crate::event::{EventBus, StateChange};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct State {
    pub description: &'static str,
    pub connected: bool,
    pub can_connect: bool,
}

impl State {
    pub const BOOTING: State = State::new("Booting", false, false);
    pub const IDLE: State = State::new("Idle", false, true);
    pub const LOGGING_IN: State = State::new("Logging in to the voice server", false, false);
    pub const CONNECTED: State = State::new("Connected to the voice server", true, false);
    pub const SHUTTING_DOWN: State = State::new("Shutting down the voice session", true, false);
    pub const LOGIN_FAILED: State = State::new("Voice server login failed", false, true);

    const fn new(description: &'static str, connected: bool, can_connect: bool) -> Self {
        Self {
            description,
            connected,
            can_connect,
        }
    }
}

pub struct StateService {
    current: ArcSwap<State>,
    bus: Arc<EventBus>,
}

impl StateService {
    #[must_use]
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            current: ArcSwap::from_pointee(State::BOOTING),
            bus,
        }
    }

    #[must_use]
    pub fn current(&self) -> State {
        **self.current.load()
    }

    /// Switches to `new`, publishing a [`StateChange`] when it differs from the current state.
    pub fn set_state(&self, new: State) {
        let old = *self.current.swap(Arc::new(new));
        if old == new {
            return;
        }
        debug!("State: {} -> {}", old.description, new.description);
        self.bus.publish(StateChange { old, new });
    }
}
