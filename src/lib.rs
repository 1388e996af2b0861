//! ```text
//! ChartDoc ──► ModelBuilder ──► Model ─┐
//!                                      ├─► Executor ──► Runtime ──► Datamodel ──► FunctionDispatcher
//! StateMachineFactory ──► StateMachine ┘      │             │
//!                                             │             └─► serialize ──► MachineContext
//!                                             └─► EventDispatcher ──► Listeners
//! ```
//!
//! Statechart is a general-purpose statechart interpreter faithful to the
//! W3C SCXML execution semantics: it loads a declarative hierarchical
//! state-machine description, maintains a live configuration of active
//! states, and advances that configuration in response to external and
//! internal events while executing user-supplied side effects (assignments,
//! logs, sends) in a deterministic order.
//!
//! The pieces:
//!
//! - [`charts`]: the declarative chart documents and their compiler.
//! - [`model`]: the immutable chart graph and its structural queries.
//! - [`datamodel`]: the JSON-like value store and the ECMAScript-like
//!   expression evaluator behind conditions and assignments.
//! - [`functions`]: host functions callable from expressions.
//! - [`runtime`]: the mutable session (configuration, internal queue,
//!   datamodel) and its resumable snapshot form.
//! - [`executor`]: the interpretation algorithm — transition selection,
//!   entry/exit sets, the macrostep/microstep loop.
//! - [`machine`] / [`factory`]: the client-facing surface.
//! - [`listeners`]: observation callbacks with synchronous fan-out.
//!
//! History pseudo-states, `<invoke>`, delayed `<send>` delivery, late
//! datamodel binding, and `<script>` are out of scope.

pub mod charts;
pub mod datamodel;
pub mod executor;
pub mod factory;
pub mod functions;
pub mod listeners;
pub mod machine;
pub mod model;
pub mod runtime;
pub mod utils;

pub use charts::builder::BuilderError;
pub use charts::ChartDoc;
pub use datamodel::{Datamodel, EvalError};
pub use executor::{Executor, ExecutorConfig};
pub use factory::{FactoryError, StateMachineFactory};
pub use functions::FunctionDispatcher;
pub use listeners::{EventDispatcher, Listener, TraceListener};
pub use machine::{MachineContext, MachineError, StateMachine};
pub use model::Model;
pub use runtime::{ContextError, Runtime, RuntimeSnapshot};
