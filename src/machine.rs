//! The client-facing state machine: one model, one session.
//!
//! A `StateMachine` bundles a shared immutable [`Model`], a shared stateless
//! [`Executor`], and its own [`Runtime`]. `start` must be called before any
//! `send_event`; both run the session to quiescence before returning, with
//! listener callbacks firing inline.
//!
//! A machine at a stable point serializes to a [`MachineContext`] — the
//! active-state tree plus the datamodel as compact JSON — from which the
//! factory can rebuild an equivalent session.

use std::sync::Arc;

use miette::Diagnostic;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::executor::Executor;
use crate::functions::FunctionDispatcher;
use crate::listeners::Listener;
use crate::model::Model;
use crate::runtime::{ContextError, Runtime, RuntimeSnapshot};

/// The full resumable session snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineContext {
    pub runtime: RuntimeSnapshot,
    /// The datamodel store as compact JSON.
    pub datamodel: String,
}

/// Failures of the machine's convenience accessors.
#[derive(Debug, Error, Diagnostic)]
pub enum MachineError {
    #[error("datamodel location is not defined: {location}")]
    #[diagnostic(code(statechart::machine::location_not_defined))]
    LocationNotDefined { location: String },

    #[error("datamodel location '{location}' failed to evaluate: {message}")]
    #[diagnostic(code(statechart::machine::evaluation))]
    Evaluation { location: String, message: String },

    #[error("payload (de)serialization failed: {source}")]
    #[diagnostic(code(statechart::machine::serde))]
    Serde {
        #[from]
        source: serde_json::Error,
    },
}

/// One live session over a compiled chart.
pub struct StateMachine {
    model: Arc<Model>,
    executor: Arc<Executor>,
    runtime: Runtime,
}

impl StateMachine {
    pub(crate) fn new(
        model: Arc<Model>,
        executor: Arc<Executor>,
        dispatcher: Arc<FunctionDispatcher>,
    ) -> Self {
        Self {
            model,
            executor,
            runtime: Runtime::new(dispatcher),
        }
    }

    pub(crate) fn from_context(
        model: Arc<Model>,
        executor: Arc<Executor>,
        dispatcher: Arc<FunctionDispatcher>,
        context: &MachineContext,
    ) -> Result<Self, ContextError> {
        let resolved = model.resolve_active_tree(&context.runtime.active_state);
        let runtime = Runtime::restore(
            &context.datamodel,
            dispatcher,
            resolved,
            context.runtime.running,
        )?;
        Ok(Self {
            model,
            executor,
            runtime,
        })
    }

    /// Starts execution. Must be called before `send_event`; a no-op on an
    /// already-running machine.
    pub fn start(&mut self) {
        self.executor.start(&self.model, &mut self.runtime);
    }

    /// Sends an external event with an optional payload expression (empty
    /// means no payload; with the ECMA datamodel, payloads are JSON).
    /// Returns once the event is consumed and the machine is stable again.
    pub fn send_event(&mut self, event: &str, payload: &str) {
        self.executor
            .send_event(&self.model, &mut self.runtime, event, payload);
    }

    /// Convenience: serializes `payload` to JSON and sends it as the event
    /// payload.
    pub fn send_event_payload<T: Serialize>(
        &mut self,
        event: &str,
        payload: &T,
    ) -> Result<(), MachineError> {
        let encoded = serde_json::to_string(payload)?;
        self.send_event(event, &encoded);
        Ok(())
    }

    pub fn add_listener(&mut self, listener: Arc<dyn Listener>) {
        self.runtime.add_listener(listener);
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Pulls a typed value out of a datamodel location (JSON object-access
    /// notation, e.g. `"myobject.field1.subfield2"`).
    pub fn extract_from_datamodel<T: DeserializeOwned>(
        &self,
        location: &str,
    ) -> Result<T, MachineError> {
        let datamodel = self.runtime.datamodel();
        if !datamodel.is_defined(location) {
            return Err(MachineError::LocationNotDefined {
                location: location.to_string(),
            });
        }
        let rendered = datamodel
            .evaluate_expression(location)
            .map_err(|e| MachineError::Evaluation {
                location: location.to_string(),
                message: e.message().to_string(),
            })?;
        Ok(serde_json::from_str(&rendered)?)
    }

    /// Serializes the session. Fails when the machine has not been allowed
    /// to run to quiescence.
    pub fn serialize_to_context(&self) -> Result<MachineContext, ContextError> {
        Ok(MachineContext {
            runtime: self.runtime.serialize(&self.model)?,
            datamodel: self.runtime.datamodel().serialize_as_string(),
        })
    }
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("model", &self.model.name())
            .field("runtime", &self.runtime)
            .finish()
    }
}
