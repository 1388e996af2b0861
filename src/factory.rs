//! Compiles chart documents once and lends out machines.

use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::charts::builder::BuilderError;
use crate::charts::ChartDoc;
use crate::executor::{Executor, ExecutorConfig};
use crate::functions::FunctionDispatcher;
use crate::listeners::{Listener, TraceListener};
use crate::machine::{MachineContext, StateMachine};
use crate::model::Model;
use crate::runtime::ContextError;

/// Failures when building the factory or creating machines from it.
#[derive(Debug, Error, Diagnostic)]
pub enum FactoryError {
    #[error("no model named '{name}'")]
    #[diagnostic(code(statechart::factory::unknown_model))]
    UnknownModel { name: String },

    #[error("chart '{name}' failed to build")]
    #[diagnostic(code(statechart::factory::build))]
    Build {
        name: String,
        #[source]
        #[diagnostic_source]
        source: BuilderError,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Context(#[from] ContextError),
}

/// Holds compiled models and a shared executor; machines are created per
/// session, fresh or from a snapshot. The factory must outlive the machines
/// it creates only in the logical sense — everything shared is reference
/// counted.
///
/// ```
/// use statechart::charts::ChartDoc;
/// use statechart::factory::StateMachineFactory;
/// use statechart::functions::FunctionDispatcher;
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let doc: ChartDoc = serde_json::from_value(json!({
///     "name": "blink",
///     "states": [{"state": {"id": "idle"}}]
/// }))
/// .unwrap();
///
/// let factory = StateMachineFactory::from_docs(vec![doc]).unwrap();
/// let mut machine = factory
///     .create_machine("blink", Arc::new(FunctionDispatcher::new()))
///     .unwrap();
/// machine.start();
/// assert!(machine.runtime().is_running());
/// ```
pub struct StateMachineFactory {
    models: FxHashMap<String, Arc<Model>>,
    executor: Arc<Executor>,
    listener: Arc<dyn Listener>,
}

impl StateMachineFactory {
    /// Builds every chart, with a [`TraceListener`] attached to created
    /// machines. Fails on the first chart that does not compile.
    pub fn from_docs(docs: impl IntoIterator<Item = ChartDoc>) -> Result<Self, FactoryError> {
        Self::from_docs_with_listener(docs, Arc::new(TraceListener))
    }

    /// Same, with a caller-supplied listener attached to every machine.
    pub fn from_docs_with_listener(
        docs: impl IntoIterator<Item = ChartDoc>,
        listener: Arc<dyn Listener>,
    ) -> Result<Self, FactoryError> {
        let mut models = FxHashMap::default();
        for doc in docs {
            let model = doc.compile().map_err(|source| FactoryError::Build {
                name: doc.name.clone(),
                source,
            })?;
            // A later chart with the same name replaces the earlier one.
            models.insert(model.name().to_string(), Arc::new(model));
        }
        Ok(Self {
            models,
            executor: Arc::new(Executor::new()),
            listener,
        })
    }

    /// Replaces the shared executor with one using `config`.
    pub fn with_executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor = Arc::new(Executor::with_config(config));
        self
    }

    /// True when a machine can be created under `model_name`.
    pub fn has_model(&self, model_name: &str) -> bool {
        self.models.contains_key(model_name)
    }

    /// Creates a fresh machine for `model_name`. The dispatcher should
    /// outlive the machine that uses it; sharing one across sessions is
    /// safe once registration is complete.
    pub fn create_machine(
        &self,
        model_name: &str,
        dispatcher: Arc<FunctionDispatcher>,
    ) -> Result<StateMachine, FactoryError> {
        let model = self.model(model_name)?;
        let mut machine = StateMachine::new(model, self.executor.clone(), dispatcher);
        machine.add_listener(self.listener.clone());
        Ok(machine)
    }

    /// Creates a machine resuming from a serialized session snapshot.
    pub fn create_machine_from_context(
        &self,
        model_name: &str,
        context: &MachineContext,
        dispatcher: Arc<FunctionDispatcher>,
    ) -> Result<StateMachine, FactoryError> {
        let model = self.model(model_name)?;
        let mut machine =
            StateMachine::from_context(model, self.executor.clone(), dispatcher, context)?;
        machine.add_listener(self.listener.clone());
        Ok(machine)
    }

    fn model(&self, model_name: &str) -> Result<Arc<Model>, FactoryError> {
        self.models
            .get(model_name)
            .cloned()
            .ok_or_else(|| FactoryError::UnknownModel {
                name: model_name.to_string(),
            })
    }
}

impl std::fmt::Debug for StateMachineFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.models.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("StateMachineFactory")
            .field("models", &names)
            .finish()
    }
}
