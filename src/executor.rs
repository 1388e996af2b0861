//! The interpretation algorithm.
//!
//! The executor is stateless: it reads the [`Model`], mutates the
//! [`Runtime`], and runs executable content in the deterministic SCXML
//! order. `start` and `send_event` are the only entry points; both run the
//! session to quiescence (one macrostep) before returning. Re-entry from
//! listener callbacks is not supported.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::model::{ExecutableContent, Model, StateId, TransitionId};
use crate::runtime::Runtime;

/// Tunables for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Hard bound on microsteps within one macrostep; prevents divergent
    /// eventless loops. On exceeding it the macrostep terminates and the
    /// machine stays in its last reached configuration.
    pub max_microsteps: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_microsteps: 1000,
        }
    }
}

/// Stateless algorithmic core. An executor holds no session state and may
/// be shared across sessions.
#[derive(Debug, Default)]
pub struct Executor {
    config: ExecutorConfig,
}

// Execute some content; does nothing when absent.
fn execute(runtime: &mut Runtime, executable: Option<&ExecutableContent>) {
    if let Some(executable) = executable {
        executable.execute(runtime);
    }
}

fn declare_or_enqueue_error(runtime: &mut Runtime, id: &str) -> bool {
    if runtime.datamodel_mut().declare(id).is_err() {
        runtime.enqueue_execution_error(&format!("Declare failed: {id}"));
        return false;
    }
    true
}

fn assign_string_or_enqueue_error(runtime: &mut Runtime, id: &str, value: &str) -> bool {
    if runtime.datamodel_mut().assign_string(id, value).is_err() {
        runtime.enqueue_execution_error(&format!("AssignString failed: {id} = {value}"));
        return false;
    }
    true
}

fn assign_expression_or_enqueue_error(runtime: &mut Runtime, id: &str, expr: &str) -> bool {
    if runtime.datamodel_mut().assign_expression(id, expr).is_err() {
        runtime.enqueue_execution_error(&format!("AssignExpression failed: {id} = {expr}"));
        return false;
    }
    true
}

/// `error` or anything under the `error.` hierarchy.
fn is_error_event(event: &str) -> bool {
    event == "error" || event.starts_with("error.")
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Starts a session: clears the runtime, binds the system variables,
    /// initializes datamodel blocks in document order (early binding),
    /// enters the top-level initial transition, and runs to quiescence.
    /// A no-op when the runtime is already running.
    pub fn start(&self, model: &Model, runtime: &mut Runtime) {
        if runtime.is_running() {
            tracing::debug!("no op; runtime is already running");
            return;
        }

        runtime.clear();
        runtime.set_running(true);

        // Bind system variables. Failures report but do not abort.
        declare_or_enqueue_error(runtime, "_name");
        assign_string_or_enqueue_error(runtime, "_name", model.name());
        declare_or_enqueue_error(runtime, "_sessionid");
        let session_id = format!("SESSION_{}", Uuid::new_v4());
        assign_string_or_enqueue_error(runtime, "_sessionid", &session_id);
        declare_or_enqueue_error(runtime, "_event");
        let empty = runtime.datamodel().encode_parameters(&BTreeMap::new());
        assign_expression_or_enqueue_error(runtime, "_event", &empty);

        // Early binding: initialize every datamodel block in document order.
        execute(runtime, model.datamodel_block());
        for &sid in model.top_level_states() {
            self.initialize_datamodel(model, runtime, sid);
        }

        self.enter_states(model, runtime, &[model.initial_transition()]);
        self.execute_until_stable(model, runtime);
    }

    fn initialize_datamodel(&self, model: &Model, runtime: &mut Runtime, sid: StateId) {
        execute(runtime, model.state(sid).datamodel_block());
        for &child in model.state(sid).children() {
            self.initialize_datamodel(model, runtime, child);
        }
    }

    /// Delivers an external event and runs the resulting macrostep. Events
    /// received while the machine is not running are ignored.
    pub fn send_event(&self, model: &Model, runtime: &mut Runtime, event: &str, payload: &str) {
        if !runtime.is_running() {
            tracing::debug!(event, "event ignored; runtime is not running");
            return;
        }
        self.process_external_event(model, runtime, event, payload);
        self.execute_until_stable(model, runtime);
    }

    fn process_external_event(
        &self,
        model: &Model,
        runtime: &mut Runtime,
        event: &str,
        payload: &str,
    ) {
        self.assign_event_data(runtime, event, payload);
        let transitions = model.transitions_for_event(runtime, event);
        if !transitions.is_empty() {
            self.microstep(model, runtime, &transitions);
        }
    }

    /// One macrostep: interleaves eventless transitions and internal-event
    /// processing until nothing more fires, the step bound is hit, or an
    /// unhandled error event halts the step.
    fn execute_until_stable(&self, model: &Model, runtime: &mut Runtime) {
        let mut num_microsteps = 0;
        while runtime.is_running() && num_microsteps < self.config.max_microsteps {
            num_microsteps += 1;

            let mut transitions = model.eventless_transitions(runtime);
            if transitions.is_empty() {
                let Some(event) = runtime.dequeue_internal_event() else {
                    break;
                };

                // Raises an error event if assignment fails.
                self.assign_event_data(runtime, &event.name, &event.payload);

                transitions = model.transitions_for_event(runtime, &event.name);

                // Terminating the macrostep on an unhandled error event is
                // not part of the SCXML specification; without it a failing
                // eventless condition enqueues error.execution forever.
                if is_error_event(&event.name) {
                    if transitions.is_empty() {
                        tracing::warn!(
                            event = %event.name,
                            payload = %event.payload,
                            runtime = %runtime.debug_string(model),
                            "macrostep prematurely terminated due to unhandled error event"
                        );
                        break;
                    }
                    tracing::warn!(event = %event.name, payload = %event.payload, "error event");
                }
            }

            if !transitions.is_empty() {
                self.microstep(model, runtime, &transitions);
            }
        }

        if !runtime.is_running() {
            self.shutdown(model, runtime);
        }
    }

    /// Exit phase, then every transition body in order, then the entry
    /// phase.
    fn microstep(&self, model: &Model, runtime: &mut Runtime, transitions: &[TransitionId]) {
        self.exit_states(model, runtime, transitions);
        for &tid in transitions {
            let transition = model.transition(tid);
            execute(runtime, transition.executable());
            let source = transition.source().map(|sid| model.state(sid).id());
            let targets: Vec<&str> = transition
                .targets()
                .iter()
                .map(|&sid| model.state(sid).id())
                .collect();
            runtime.dispatcher().notify_transition_followed(source, &targets);
        }
        self.enter_states(model, runtime, transitions);
    }

    fn enter_states(&self, model: &Model, runtime: &mut Runtime, transitions: &[TransitionId]) {
        let Some((to_enter, default_entry)) = model.compute_entry_set(runtime, transitions) else {
            runtime.enqueue_execution_error("failed to compute entry set");
            return;
        };

        for sid in to_enter {
            let state_id = model.state(sid).id().to_string();
            runtime.add_active_state(sid, &state_id);

            execute(runtime, model.state(sid).on_entry());
            runtime.dispatcher().notify_state_entered(&state_id);

            if default_entry.contains(&sid) {
                // A default-entered state is always compound, so the
                // builder guarantees an initial transition.
                match model.state(sid).initial_transition() {
                    Some(initial) => execute(runtime, model.transition(initial).executable()),
                    None => tracing::error!(
                        state = %state_id,
                        "state should have specified an initial transition"
                    ),
                }
            }

            if model.state(sid).is_final() {
                match model.state(sid).parent() {
                    // A top-level final state ends the session.
                    None => runtime.set_running(false),
                    Some(parent) => {
                        runtime.enqueue_internal_event(
                            &format!("done.state.{}", model.state(parent).id()),
                            "",
                        );
                        // A parallel grandparent completes when every child
                        // region is in a final configuration.
                        if let Some(grandparent) = model.state(parent).parent() {
                            if model.state(grandparent).is_parallel()
                                && model
                                    .state(grandparent)
                                    .children()
                                    .iter()
                                    .all(|&c| model.is_in_final_state(runtime, c))
                            {
                                runtime.enqueue_internal_event(
                                    &format!("done.state.{}", model.state(grandparent).id()),
                                    "",
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    fn exit_states(&self, model: &Model, runtime: &mut Runtime, transitions: &[TransitionId]) {
        // Already sorted in exit (reverse document) order.
        let to_exit = model.compute_exit_set(runtime, transitions);
        for sid in to_exit {
            execute(runtime, model.state(sid).on_exit());
            let state_id = model.state(sid).id();
            runtime.erase_active_state(sid, state_id);
            runtime.dispatcher().notify_state_exited(state_id);
        }
    }

    /// Populates `_event` for a delivered event. `_event.data` keeps its
    /// previous value when the new event has no payload.
    fn assign_event_data(&self, runtime: &mut Runtime, event: &str, payload: &str) {
        // Stop after the first failure so only one error is raised.
        if !assign_string_or_enqueue_error(runtime, "_event.name", event) {
            return;
        }
        if !payload.is_empty() {
            assign_expression_or_enqueue_error(runtime, "_event.data", payload);
        }
    }

    /// Exits every active state in reverse document order, then drains the
    /// internal queue, logging any error events.
    fn shutdown(&self, model: &Model, runtime: &mut Runtime) {
        let mut active: Vec<StateId> = runtime.active_states().iter().copied().collect();
        model.sort_states_by_document_order(true, &mut active);

        for sid in active {
            execute(runtime, model.state(sid).on_exit());
            runtime.erase_active_state(sid, model.state(sid).id());
        }

        while let Some(event) = runtime.dequeue_internal_event() {
            if is_error_event(&event.name) {
                tracing::warn!(
                    event = %event.name,
                    payload = %event.payload,
                    "error event drained at shutdown"
                );
            }
        }
    }
}
