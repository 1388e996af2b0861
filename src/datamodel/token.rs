//! The omni token type of the expression language.
//!
//! A token is a value literal, a reference into the store, an operator, or a
//! system function name. References dereference the store transparently;
//! writing through them is never possible from the evaluator (assignment
//! walks the store separately).

use serde_json::Value;

use crate::functions::FunctionDispatcher;
use crate::utils::{is_quoted_string, looks_like_json_array, looks_like_json_object, quote, unquote};

/// Operators that delimit values and subexpressions, used both by the
/// tokenizer (longest-match scan) and by token classification.
pub(crate) const OPERATORS: [&str; 18] = [
    ",", "(", ")", "[", "]", "+", "-", "*", "/", "<", "<=", "==", "!=", ">=", ">", "&&", "||", "!",
];

static NULL_VALUE: Value = Value::Null;

#[derive(Debug, Clone)]
pub(crate) enum Token<'s> {
    /// An owned literal value.
    Value(Value),
    /// A pointer into the store; `value()` dereferences transparently.
    Reference(&'s Value),
    /// One of [`OPERATORS`].
    Operator(&'static str),
    /// The built-in `In` or a name registered on the function dispatcher.
    SystemFunction(String),
}

impl<'s> Token<'s> {
    /// Classifies a string token against the store and dispatcher. The
    /// priority order is: null literal, boolean literal, operator, integer,
    /// real, quoted string, JSON object/array literal, the built-in `In`,
    /// dispatcher function, store reference. Anything else is a lexical
    /// error.
    pub fn create(
        store: &'s Value,
        dispatcher: &FunctionDispatcher,
        expr: &str,
    ) -> Result<Token<'s>, ()> {
        let expr = expr.trim();
        if expr.is_empty() || expr == "null" {
            return Ok(Token::Value(Value::Null));
        }
        if expr == "true" {
            return Ok(Token::Value(Value::Bool(true)));
        }
        if expr == "false" {
            return Ok(Token::Value(Value::Bool(false)));
        }
        if let Some(op) = OPERATORS.iter().find(|op| **op == expr) {
            return Ok(Token::Operator(op));
        }
        if let Ok(i) = expr.parse::<i64>() {
            return Ok(Token::Value(Value::from(i)));
        }
        if let Ok(d) = expr.parse::<f64>() {
            return Ok(Token::Value(Value::from(d)));
        }
        if is_quoted_string(expr, '"') {
            return Ok(Token::Value(Value::String(unquote(expr, '"'))));
        }
        if looks_like_json_array(expr) || looks_like_json_object(expr) {
            // The shape probe is required: a bare JSON parser would accept
            // plain scalars and quoted fragments here.
            if let Ok(value) = serde_json::from_str::<Value>(expr) {
                return Ok(Token::Value(value));
            }
        }
        // A system function name takes precedence over a store location, so
        // declaring or assigning to a function name always fails.
        if expr == "In" || dispatcher.has_function(expr) {
            return Ok(Token::SystemFunction(expr.to_string()));
        }
        if let Some(reference) = resolve_path(store, expr) {
            return Ok(Token::Reference(reference));
        }
        Err(())
    }

    /// True for literals and references, i.e. `value()` may be called.
    pub fn is_value(&self) -> bool {
        matches!(self, Token::Value(_) | Token::Reference(_))
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Token::Reference(_))
    }

    pub fn is_op(&self, op: &str) -> bool {
        matches!(self, Token::Operator(o) if *o == op)
    }

    pub fn operator(&self) -> Option<&'static str> {
        match self {
            Token::Operator(op) => Some(op),
            _ => None,
        }
    }

    pub fn is_system_function(&self) -> bool {
        matches!(self, Token::SystemFunction(_))
    }

    /// Dereferencing accessor; returns null for non-value tokens (callers
    /// check `is_value()` first).
    pub fn value(&self) -> &Value {
        match self {
            Token::Value(v) => v,
            Token::Reference(r) => r,
            _ => &NULL_VALUE,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Token::Value(v) => v,
            Token::Reference(r) => r.clone(),
            _ => Value::Null,
        }
    }

    /// True if the value is internally an integer (booleans excluded).
    pub fn is_integer(&self) -> bool {
        match self.value() {
            Value::Number(n) => !n.is_f64(),
            _ => false,
        }
    }

    /// The truthiness rule: null is false, booleans are direct, numbers are
    /// non-zero, strings are non-empty, arrays and objects are true.
    pub fn to_bool(&self) -> bool {
        match self.value() {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().map(|d| d != 0.0).unwrap_or(false),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }

    pub fn debug_string(&self) -> String {
        match self {
            Token::Operator(op) => format!("OP:{op}"),
            Token::Reference(r) => format!("REF:{}", value_to_string(r, false)),
            Token::Value(v) => value_to_string(v, true),
            Token::SystemFunction(name) => format!("SYS:{name}"),
        }
    }
}

/// Renders a value as a compact expression fragment. Strings are quoted only
/// when `quote_string` is set; objects and arrays render as compact JSON.
pub(crate) fn value_to_string(value: &Value, quote_string: bool) -> String {
    match value {
        Value::Object(_) | Value::Array(_) => serde_json::to_string(value).unwrap_or_default(),
        Value::Null => "null".to_string(),
        Value::String(s) => {
            if quote_string {
                quote(s)
            } else {
                s.clone()
            }
        }
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
    }
}

/// Resolves a dot-separated path of object members against the store.
pub(crate) fn resolve_path<'s>(store: &'s Value, path: &str) -> Option<&'s Value> {
    if path.is_empty() {
        return None;
    }
    let mut current = store;
    for segment in path.split('.') {
        if segment.is_empty() {
            return None;
        }
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}
