//! The datamodel: a mutable JSON-like value store evaluated by a small
//! ECMAScript-like expression language.
//!
//! The store root is an object mapping identifiers to values; values are
//! null, booleans, integers, reals, strings, arrays, or objects (integer
//! operations preserve integrality, any real operand promotes). Evaluation
//! never mutates the store; assignment and declaration walk it separately
//! through location expressions.
//!
//! ```
//! use statechart::datamodel::Datamodel;
//! use statechart::functions::FunctionDispatcher;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let mut dm = Datamodel::new(Arc::new(FunctionDispatcher::new()));
//! dm.declare("obj").unwrap();
//! dm.assign_expression("obj", "{}").unwrap();
//! dm.assign_expression("obj.a.b[0]", "5").unwrap();
//! assert_eq!(dm.evaluate_json("obj").unwrap(), json!({"a": {"b": [5]}}));
//!
//! assert_eq!(dm.evaluate_json("1 + 2 * 3").unwrap(), json!(7));
//! assert_eq!(dm.evaluate_json("(1 + 2) * 3").unwrap(), json!(9));
//! ```

mod eval;
mod iterator;
mod lexer;
mod token;

pub use iterator::ValueIterator;

use std::collections::BTreeMap;
use std::sync::Arc;

use rustc_hash::FxHashSet;
use serde_json::Value;
use thiserror::Error;

use crate::functions::FunctionDispatcher;
use crate::utils::{make_json_from_string_map, quote};
use eval::{is_assignable, parse_location_expression, process_expression, resolve_location_slot,
    EvalEnv};
use token::value_to_string;

/// A datamodel operation failure. These are never fatal: the runtime
/// converts them into `error.execution` events and execution continues.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct EvalError {
    message: String,
}

impl EvalError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// The value store bound to one session.
///
/// The store carries a mirror of the session's active state ids so that the
/// built-in `In(id)` can be answered during evaluation; the owning runtime
/// keeps the mirror current. A clone is a deep snapshot of the store that
/// shares the dispatcher and carries the mirror it was cloned with.
#[derive(Clone)]
pub struct Datamodel {
    store: Value,
    dispatcher: Arc<FunctionDispatcher>,
    active_ids: FxHashSet<String>,
    in_session: bool,
}

impl Datamodel {
    /// Creates an empty datamodel over `dispatcher`.
    pub fn new(dispatcher: Arc<FunctionDispatcher>) -> Self {
        Self {
            store: Value::Object(serde_json::Map::new()),
            dispatcher,
            active_ids: FxHashSet::default(),
            in_session: false,
        }
    }

    /// Restores a datamodel from its [`serialize_as_string`]
    /// (Self::serialize_as_string) form. Restoration is only permitted at
    /// construction time, which guarantees no runtime has bound to stale
    /// references.
    pub fn from_serialized(
        data: &str,
        dispatcher: Arc<FunctionDispatcher>,
    ) -> Result<Self, serde_json::Error> {
        let store: Value = serde_json::from_str(data)?;
        Ok(Self {
            store,
            dispatcher,
            active_ids: FxHashSet::default(),
            in_session: false,
        })
    }

    fn env(&self) -> EvalEnv<'_> {
        EvalEnv {
            store: &self.store,
            dispatcher: &self.dispatcher,
            active_ids: &self.active_ids,
            in_session: self.in_session,
        }
    }

    /// True when `location` resolves to an existing store slot.
    pub fn is_defined(&self, location: &str) -> bool {
        process_expression(self.env(), location)
            .map(|token| token.is_reference())
            .unwrap_or(false)
    }

    /// Declares `location`, initializing it to null. Fails if the location
    /// already exists or its name collides with a registered function.
    pub fn declare(&mut self, location: &str) -> Result<(), EvalError> {
        if self.is_defined(location) || self.dispatcher.has_function(location.trim()) {
            return Err(EvalError::new(format!(
                "cannot declare already defined location: {location}"
            )));
        }
        self.declare_and_assign_json(location, Value::Null)
    }

    /// Evaluates `expr` and stores the result at `location`. An empty
    /// expression is treated as null. The location's root must already be
    /// declared; missing intermediate objects and arrays are created along
    /// the way, and a kind mismatch against an existing value is an error.
    pub fn assign_expression(&mut self, location: &str, expr: &str) -> Result<(), EvalError> {
        let value = if expr.trim().is_empty() {
            Value::Null
        } else {
            self.evaluate_json(expr)?
        };
        self.assign_json(location, value)
    }

    /// Stores the literal string `value` at `location`.
    pub fn assign_string(&mut self, location: &str, value: &str) -> Result<(), EvalError> {
        self.assign_expression(location, &quote(value))
    }

    /// Assigns an already-evaluated value. Assignment never declares new
    /// top-level names; the root must exist.
    pub fn assign_json(&mut self, location: &str, value: Value) -> Result<(), EvalError> {
        let (root, segments) = parse_location_expression(self.env(), location)?;
        if self.store.get(root.as_str()).is_none() {
            return Err(EvalError::new(format!(
                "assignment to undeclared location: {location}"
            )));
        }
        let slot = resolve_location_slot(&mut self.store, &root, &segments)?;
        *slot = value;
        Ok(())
    }

    /// Whether `location` may be assigned to without any intermediate
    /// creation: it resolves to an existing slot, or it ends in an element
    /// access whose parent has the matching kind (string key on an object,
    /// non-negative integer on an array).
    pub fn is_assignable(&self, location: &str) -> bool {
        is_assignable(self.env(), location).is_ok()
    }

    /// Destructively evaluates the location expression — creating missing
    /// intermediate objects/arrays — and stores `value` at the resolved
    /// slot. This is the one operation allowed to grow the store.
    pub fn declare_and_assign_json(
        &mut self,
        location: &str,
        value: Value,
    ) -> Result<(), EvalError> {
        let (root, segments) = parse_location_expression(self.env(), location)?;
        let slot = resolve_location_slot(&mut self.store, &root, &segments)?;
        *slot = value;
        Ok(())
    }

    /// Evaluates `expr` under the truthiness rule.
    pub fn evaluate_bool(&self, expr: &str) -> Result<bool, EvalError> {
        Ok(process_expression(self.env(), expr)?.to_bool())
    }

    /// Evaluates `expr` to its unquoted string rendering.
    pub fn evaluate_string(&self, expr: &str) -> Result<String, EvalError> {
        Ok(value_to_string(
            process_expression(self.env(), expr)?.value(),
            false,
        ))
    }

    /// Evaluates `expr` to a value-expression string: strings come back
    /// quoted, objects and arrays as compact JSON. The result is itself a
    /// valid expression (and valid JSON for non-scalar results).
    pub fn evaluate_expression(&self, expr: &str) -> Result<String, EvalError> {
        Ok(value_to_string(
            process_expression(self.env(), expr)?.value(),
            true,
        ))
    }

    /// Evaluates `expr` to a JSON value.
    pub fn evaluate_json(&self, expr: &str) -> Result<Value, EvalError> {
        Ok(process_expression(self.env(), expr)?.into_value())
    }

    /// Evaluates an array-valued `location` into a cursor. Non-array results
    /// are an error.
    pub fn evaluate_iterator(&self, location: &str) -> Result<ValueIterator, EvalError> {
        let token = process_expression(self.env(), location)?;
        match token.value() {
            Value::Array(items) => Ok(ValueIterator::new(items.clone())),
            other => Err(EvalError::new(format!(
                "iterator location is not an array: {location} = {}",
                value_to_string(other, true)
            ))),
        }
    }

    /// Encodes a name → value-expression map as a JSON object literal, with
    /// names quoted and values inserted verbatim.
    pub fn encode_parameters(&self, parameters: &BTreeMap<String, String>) -> String {
        make_json_from_string_map(parameters)
    }

    /// The store as compact JSON; [`Datamodel::from_serialized`] restores it.
    pub fn serialize_as_string(&self) -> String {
        serde_json::to_string(&self.store).unwrap_or_else(|_| "{}".to_string())
    }

    /// A pretty-printed rendering of the store.
    pub fn debug_string(&self) -> String {
        serde_json::to_string_pretty(&self.store).unwrap_or_else(|_| "{}".to_string())
    }

    /// Clears all data in the store. Session marks are unaffected.
    pub fn clear(&mut self) {
        self.store = Value::Object(serde_json::Map::new());
    }

    // Active-state mirror maintenance, driven by the owning runtime.

    pub(crate) fn set_in_session(&mut self, in_session: bool) {
        self.in_session = in_session;
    }

    pub(crate) fn mark_active(&mut self, state_id: &str) {
        self.active_ids.insert(state_id.to_string());
    }

    pub(crate) fn unmark_active(&mut self, state_id: &str) {
        self.active_ids.remove(state_id);
    }

    pub(crate) fn clear_active_marks(&mut self) {
        self.active_ids.clear();
    }
}

impl std::fmt::Debug for Datamodel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datamodel")
            .field("store", &self.store)
            .field("active_ids", &self.active_ids)
            .field("in_session", &self.in_session)
            .finish()
    }
}
