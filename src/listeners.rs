//! Listener callbacks and synchronous fan-out.
//!
//! Listeners observe a session from the outside: they are notified inline,
//! on the calling thread, before `start`/`send_event` return. Callbacks
//! carry plain data (state ids, event attributes) so a listener can never
//! mutate the session it observes.

use std::sync::Arc;

/// Callbacks fired by the interpreter as it advances a session. All methods
/// have empty defaults; implement only what you observe.
pub trait Listener: Send + Sync {
    /// A state was added to the configuration (after its on-entry block ran).
    fn on_state_entered(&self, _state_id: &str) {}

    /// A state was removed from the configuration (after its on-exit block
    /// ran).
    fn on_state_exited(&self, _state_id: &str) {}

    /// A transition's body finished executing, between the exit and entry
    /// phases of a microstep.
    fn on_transition_followed(&self, _source: Option<&str>, _targets: &[&str]) {}

    /// A `send` element executed. The interpreter does not deliver the event
    /// anywhere; observers may act on it externally. `data` is the encoded
    /// parameter map, or empty.
    fn on_send_event(&self, _event: &str, _target: &str, _event_type: &str, _id: &str, _data: &str) {
    }
}

/// Fans notifications out to registered listeners, synchronously and in
/// registration order.
#[derive(Default, Clone)]
pub struct EventDispatcher {
    listeners: Vec<Arc<dyn Listener>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&mut self, listener: Arc<dyn Listener>) {
        self.listeners.push(listener);
    }

    pub fn notify_state_entered(&self, state_id: &str) {
        for listener in &self.listeners {
            listener.on_state_entered(state_id);
        }
    }

    pub fn notify_state_exited(&self, state_id: &str) {
        for listener in &self.listeners {
            listener.on_state_exited(state_id);
        }
    }

    pub fn notify_transition_followed(&self, source: Option<&str>, targets: &[&str]) {
        for listener in &self.listeners {
            listener.on_transition_followed(source, targets);
        }
    }

    pub fn notify_send_event(
        &self,
        event: &str,
        target: &str,
        event_type: &str,
        id: &str,
        data: &str,
    ) {
        for listener in &self.listeners {
            listener.on_send_event(event, target, event_type, id, data);
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// The default listener: traces every callback through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TraceListener;

impl Listener for TraceListener {
    fn on_state_entered(&self, state_id: &str) {
        tracing::debug!(state = state_id, "state entered");
    }

    fn on_state_exited(&self, state_id: &str) {
        tracing::debug!(state = state_id, "state exited");
    }

    fn on_transition_followed(&self, source: Option<&str>, targets: &[&str]) {
        tracing::debug!(?source, ?targets, "transition followed");
    }

    fn on_send_event(&self, event: &str, target: &str, event_type: &str, id: &str, data: &str) {
        tracing::info!(event, target, event_type, id, data, "send requested");
    }
}
