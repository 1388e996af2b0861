//! The mutable session state of one running chart.
//!
//! A `Runtime` holds everything that changes as a machine executes: the
//! active-state configuration, the FIFO internal event queue, the `running`
//! flag, the owned [`Datamodel`] and the listener [`EventDispatcher`]. The
//! active set is written only by the executor.
//!
//! The serialized form ([`RuntimeSnapshot`]) is a tree of active state ids
//! rooted at the active top-level states, plus the `running` flag; together
//! with the datamodel's serialized string it is the full resumable session
//! snapshot. Serializing is refused while internal events are pending.

use std::collections::VecDeque;
use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::datamodel::Datamodel;
use crate::functions::FunctionDispatcher;
use crate::listeners::{EventDispatcher, Listener};
use crate::model::{Model, StateId};
use crate::utils::make_json_error;

/// An internal event: a name plus a payload expression (empty when absent).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalEvent {
    pub name: String,
    pub payload: String,
}

/// One node of the serialized active-state tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveStateElement {
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub active_child: Vec<ActiveStateElement>,
}

/// The serde-facing shape of a runtime at a stable point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSnapshot {
    pub running: bool,
    #[serde(default)]
    pub active_state: Vec<ActiveStateElement>,
}

/// Failures while snapshotting or restoring a session.
#[derive(Debug, Error, Diagnostic)]
pub enum ContextError {
    /// Snapshots are only valid at quiescence.
    #[error("cannot serialize a runtime with pending internal events")]
    #[diagnostic(
        code(statechart::runtime::pending_internal_events),
        help("Let the machine run to quiescence before taking a snapshot.")
    )]
    PendingInternalEvents,

    /// The persisted datamodel string was not valid JSON.
    #[error("failed to parse serialized datamodel: {source}")]
    #[diagnostic(code(statechart::runtime::datamodel_parse))]
    DatamodelParse {
        #[source]
        source: serde_json::Error,
    },
}

/// Mutable session state. See the module docs.
pub struct Runtime {
    active: FxHashSet<StateId>,
    running: bool,
    internal_events: VecDeque<InternalEvent>,
    datamodel: Datamodel,
    dispatcher: EventDispatcher,
}

impl Runtime {
    /// Creates a stopped runtime around a fresh datamodel.
    pub fn new(function_dispatcher: Arc<FunctionDispatcher>) -> Self {
        let mut datamodel = Datamodel::new(function_dispatcher);
        datamodel.set_in_session(true);
        Self {
            active: FxHashSet::default(),
            running: false,
            internal_events: VecDeque::new(),
            datamodel,
            dispatcher: EventDispatcher::new(),
        }
    }

    /// Restores a runtime from a snapshot: the resolved active states, the
    /// `running` flag, and the serialized datamodel. The internal queue is
    /// empty by construction.
    pub(crate) fn restore(
        serialized_datamodel: &str,
        function_dispatcher: Arc<FunctionDispatcher>,
        resolved: Vec<(StateId, String)>,
        running: bool,
    ) -> Result<Self, ContextError> {
        let mut datamodel = Datamodel::from_serialized(serialized_datamodel, function_dispatcher)
            .map_err(|source| ContextError::DatamodelParse { source })?;
        datamodel.set_in_session(true);
        let mut active = FxHashSet::default();
        for (sid, id) in resolved {
            active.insert(sid);
            datamodel.mark_active(&id);
        }
        Ok(Self {
            active,
            running,
            internal_events: VecDeque::new(),
            datamodel,
            dispatcher: EventDispatcher::new(),
        })
    }

    /// The current configuration.
    pub fn active_states(&self) -> &FxHashSet<StateId> {
        &self.active
    }

    /// True iff the state with `state_id` is currently active.
    pub fn is_active_state(&self, model: &Model, state_id: &str) -> bool {
        self.active
            .iter()
            .any(|sid| model.state(*sid).id() == state_id)
    }

    /// Adds a state to the configuration. No-op when already active.
    pub(crate) fn add_active_state(&mut self, sid: StateId, state_id: &str) {
        self.active.insert(sid);
        self.datamodel.mark_active(state_id);
    }

    /// Removes a state from the configuration. No-op when not active.
    pub(crate) fn erase_active_state(&mut self, sid: StateId, state_id: &str) {
        self.active.remove(&sid);
        self.datamodel.unmark_active(state_id);
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub(crate) fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    pub fn has_internal_event(&self) -> bool {
        !self.internal_events.is_empty()
    }

    pub(crate) fn dequeue_internal_event(&mut self) -> Option<InternalEvent> {
        self.internal_events.pop_front()
    }

    /// Appends an internal event to the FIFO queue.
    pub(crate) fn enqueue_internal_event(&mut self, name: &str, payload: &str) {
        self.internal_events.push_back(InternalEvent {
            name: name.to_string(),
            payload: payload.to_string(),
        });
    }

    /// Enqueues `error.execution` with a JSON payload carrying `message`.
    pub(crate) fn enqueue_execution_error(&mut self, message: &str) {
        let payload = make_json_error(&format!("[datamodel] {message}"));
        self.enqueue_internal_event("error.execution", &payload);
    }

    pub fn datamodel(&self) -> &Datamodel {
        &self.datamodel
    }

    pub fn datamodel_mut(&mut self) -> &mut Datamodel {
        &mut self.datamodel
    }

    pub(crate) fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub fn add_listener(&mut self, listener: Arc<dyn Listener>) {
        self.dispatcher.add_listener(listener);
    }

    /// Clears the active set, the internal queue, and all datamodel data.
    pub(crate) fn clear(&mut self) {
        self.datamodel.clear();
        self.datamodel.clear_active_marks();
        self.internal_events.clear();
        self.active.clear();
    }

    /// A one-look description of the session: active ids and queued events.
    pub fn debug_string(&self, model: &Model) -> String {
        let mut ids: Vec<&str> = self.active.iter().map(|sid| model.state(*sid).id()).collect();
        ids.sort_unstable();
        let events: Vec<String> = self
            .internal_events
            .iter()
            .map(|e| format!("({} {})", e.name, e.payload))
            .collect();
        format!(
            "Runtime\n  Active States  : {}\n  Internal Events: {}",
            ids.join(", "),
            events.join(", ")
        )
    }

    /// Serializes the active configuration as a tree of state ids. Fails
    /// while internal events are pending: the session is mid-macrostep and
    /// not at a stable point.
    pub fn serialize(&self, model: &Model) -> Result<RuntimeSnapshot, ContextError> {
        if self.has_internal_event() {
            return Err(ContextError::PendingInternalEvents);
        }
        let mut active: Vec<StateId> = self.active.iter().copied().collect();
        model.sort_states_by_document_order(false, &mut active);

        let mut roots: Vec<ActiveStateElement> = Vec::new();
        for sid in active {
            let mut path: Vec<&str> = Vec::new();
            let mut node = Some(sid);
            while let Some(current) = node {
                let state = model.state(current);
                path.push(state.id());
                node = state.parent();
            }
            path.reverse();

            let mut level = &mut roots;
            for (depth, id) in path.iter().enumerate() {
                let pos = match level.iter().position(|e| e.id == *id) {
                    Some(pos) => pos,
                    None => {
                        level.push(ActiveStateElement {
                            id: (*id).to_string(),
                            active_child: Vec::new(),
                        });
                        level.len() - 1
                    }
                };
                if depth + 1 < path.len() {
                    level = &mut level[pos].active_child;
                }
            }
        }
        Ok(RuntimeSnapshot {
            running: self.running,
            active_state: roots,
        })
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("running", &self.running)
            .field("active", &self.active)
            .field("internal_events", &self.internal_events)
            .finish()
    }
}
