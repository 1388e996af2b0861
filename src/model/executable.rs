//! Executable content: the side-effecting instructions attached to states
//! and transitions.
//!
//! Content forms a recursive tagged tree with a single operation:
//! `execute(runtime) -> bool`. A false return signals failure; a block stops
//! at the first failing child. Failures never halt the interpreter — each
//! one enqueues `error.execution` and the schedule continues.

use std::collections::BTreeMap;

use crate::runtime::Runtime;

/// A `send` attribute that is either a literal string or an expression
/// evaluated against the datamodel at execution time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrOrExpr {
    Literal(String),
    Expr(String),
}

impl StrOrExpr {
    /// The raw attribute text, for error messages.
    pub fn raw(&self) -> &str {
        match self {
            StrOrExpr::Literal(s) | StrOrExpr::Expr(s) => s,
        }
    }

    fn evaluate(&self, runtime: &Runtime) -> Option<String> {
        match self {
            StrOrExpr::Literal(s) => Some(s.clone()),
            StrOrExpr::Expr(expr) => runtime.datamodel().evaluate_string(expr).ok(),
        }
    }
}

/// The `send` element: evaluated attributes plus a parameter map handed to
/// listeners. The interpreter itself never delivers the event.
#[derive(Debug, Default)]
pub struct SendElement {
    pub(crate) event: Option<StrOrExpr>,
    pub(crate) target: Option<StrOrExpr>,
    pub(crate) id: Option<StrOrExpr>,
    pub(crate) event_type: Option<StrOrExpr>,
    /// Parameter name → value expression, evaluated at execution time.
    pub(crate) params: BTreeMap<String, String>,
}

impl SendElement {
    fn execute(&self, runtime: &mut Runtime) -> bool {
        let attributes = [
            ("event", &self.event),
            ("target", &self.target),
            ("type", &self.event_type),
            ("id", &self.id),
        ];
        let mut values: [String; 4] = Default::default();
        for (slot, (name, attr)) in values.iter_mut().zip(attributes.iter()) {
            if let Some(attr) = attr {
                match attr.evaluate(runtime) {
                    Some(value) => *slot = value,
                    None => {
                        runtime.enqueue_execution_error(&format!(
                            "'Send' attribute '{}' failed to evaluate value: {}",
                            name,
                            attr.raw()
                        ));
                        return false;
                    }
                }
            }
        }

        // A failing parameter is skipped; the rest still go out.
        let mut evaluated = BTreeMap::new();
        let mut no_error = true;
        for (name, expr) in &self.params {
            match runtime.datamodel().evaluate_expression(expr) {
                Ok(value) => {
                    evaluated.insert(name.clone(), value);
                }
                Err(_) => {
                    runtime.enqueue_execution_error(&format!(
                        "'Send' parameter '{name}' failed to evaluate value: {expr}"
                    ));
                    no_error = false;
                }
            }
        }

        let data = runtime.datamodel().encode_parameters(&evaluated);
        let [event, target, event_type, id] = values;
        runtime
            .dispatcher()
            .notify_send_event(&event, &target, &event_type, &id, &data);
        no_error
    }
}

/// A composable tree of side effects.
#[derive(Debug)]
pub enum ExecutableContent {
    /// Evaluate `expr` and store it at `location`.
    Assign { location: String, expr: String },
    /// Enqueue an internal event with an empty payload.
    Raise { event: String },
    /// Evaluate `expr` to a string and log it under `label`.
    Log { label: String, expr: String },
    /// Notify listeners of an outbound event.
    Send(SendElement),
    /// Condition/block pairs; an empty condition is the `else` branch and
    /// must come last.
    If {
        branches: Vec<(String, Option<ExecutableContent>)>,
    },
    /// Iterate an array-valued location, binding each element (and
    /// optionally its index) before running the body.
    ForEach {
        array: String,
        item: String,
        index: String,
        body: Option<Box<ExecutableContent>>,
    },
    /// Declare `location` and initialize it from `expr`.
    Data { location: String, expr: String },
    /// A sequence; stops at the first failing child.
    Block(Vec<ExecutableContent>),
}

impl ExecutableContent {
    /// Runs this content against the session. Returns false on failure,
    /// after enqueueing `error.execution`.
    pub fn execute(&self, runtime: &mut Runtime) -> bool {
        match self {
            ExecutableContent::Assign { location, expr } => {
                if runtime
                    .datamodel_mut()
                    .assign_expression(location, expr)
                    .is_err()
                {
                    runtime.enqueue_execution_error(&format!(
                        "'Assign' failure for: {location} = {expr}"
                    ));
                    return false;
                }
                true
            }
            ExecutableContent::Raise { event } => {
                runtime.enqueue_internal_event(event, "");
                true
            }
            ExecutableContent::Log { label, expr } => {
                let rendered = match runtime.datamodel().evaluate_string(expr) {
                    Ok(rendered) => rendered,
                    Err(_) => {
                        runtime.enqueue_execution_error(&format!(
                            "'Log' expression failed to evaluate to string: {expr}"
                        ));
                        return false;
                    }
                };
                if label.is_empty() {
                    tracing::info!(target: "statechart", "{rendered}");
                } else {
                    tracing::info!(target: "statechart", "{label}: {rendered}");
                }
                true
            }
            ExecutableContent::Send(send) => send.execute(runtime),
            ExecutableContent::If { branches } => execute_if(runtime, branches),
            ExecutableContent::ForEach {
                array,
                item,
                index,
                body,
            } => execute_foreach(runtime, array, item, index, body.as_deref()),
            ExecutableContent::Data { location, expr } => {
                if runtime.datamodel_mut().declare(location).is_err() {
                    runtime
                        .enqueue_execution_error(&format!("'Data' declare failed for: {location}"));
                    return false;
                }
                if runtime
                    .datamodel_mut()
                    .assign_expression(location, expr)
                    .is_err()
                {
                    runtime.enqueue_execution_error(&format!(
                        "'Data' failure for: {location} = {expr}"
                    ));
                    return false;
                }
                true
            }
            ExecutableContent::Block(children) => {
                for child in children {
                    if !child.execute(runtime) {
                        return false;
                    }
                }
                true
            }
        }
    }
}

fn execute_if(runtime: &mut Runtime, branches: &[(String, Option<ExecutableContent>)]) -> bool {
    let mut saw_empty = false;
    let mut no_error = true;
    for (cond, executable) in branches {
        if saw_empty {
            tracing::error!("empty conditions in 'If' executable must come last");
            return false;
        }
        let mut taken = cond.is_empty();
        if !taken {
            match runtime.datamodel().evaluate_bool(cond) {
                Ok(result) => taken = result,
                Err(_) => {
                    runtime.enqueue_execution_error(&format!(
                        "'If' condition failed to evaluate: {cond}"
                    ));
                    no_error = false;
                    continue;
                }
            }
        }
        if taken {
            if let Some(executable) = executable {
                executable.execute(runtime);
            }
            return no_error;
        }
        saw_empty |= cond.is_empty();
    }
    no_error
}

fn execute_foreach(
    runtime: &mut Runtime,
    array: &str,
    item: &str,
    index: &str,
    body: Option<&ExecutableContent>,
) -> bool {
    let mut iterator = match runtime.datamodel().evaluate_iterator(array) {
        Ok(iterator) => iterator,
        Err(_) => {
            runtime.enqueue_execution_error(&format!(
                "'ForEach' unable to get iterator for collection: {array}"
            ));
            return false;
        }
    };
    if !runtime.datamodel().is_defined(item) && runtime.datamodel_mut().declare(item).is_err() {
        runtime.enqueue_execution_error(&format!(
            "'ForEach' unable to declare item variable at: {item}"
        ));
        return false;
    }
    if !index.is_empty()
        && !runtime.datamodel().is_defined(index)
        && runtime.datamodel_mut().declare(index).is_err()
    {
        runtime.enqueue_execution_error(&format!(
            "'ForEach' unable to declare index variable at: {index}"
        ));
        return false;
    }

    while !iterator.at_end() {
        let value = iterator.value_expression();
        if runtime
            .datamodel_mut()
            .assign_expression(item, &value)
            .is_err()
        {
            runtime.enqueue_execution_error(&format!(
                "'ForEach' unable to assign item variable '{item}' with value: {value}"
            ));
            return false;
        }
        if !index.is_empty() {
            let position = iterator.index_expression();
            if runtime
                .datamodel_mut()
                .assign_expression(index, &position)
                .is_err()
            {
                runtime.enqueue_execution_error(&format!(
                    "'ForEach' unable to assign index variable '{index}' with value: {position}"
                ));
                return false;
            }
        }
        if let Some(body) = body {
            if !body.execute(runtime) {
                return false;
            }
        }
        iterator.advance();
    }
    true
}
