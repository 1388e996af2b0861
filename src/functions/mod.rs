//! Host-function dispatch for the expression language.
//!
//! Charts call out to the host through system functions: any identifier
//! registered here becomes callable from conditions and expressions. The
//! dispatcher owns a name → function registry; registration is refused for
//! duplicate names so the set is monotonic over the dispatcher's life.
//!
//! Plain Rust closures register directly — arguments and return values are
//! converted through the [`coder`] traits:
//!
//! ```
//! use statechart::functions::FunctionDispatcher;
//! use serde_json::json;
//!
//! let mut dispatcher = FunctionDispatcher::new();
//! assert!(dispatcher.register("Decrement", |i: i64| i - 1));
//! assert!(!dispatcher.register("Decrement", |i: i64| i)); // duplicate refused
//!
//! let out = dispatcher.execute("Decrement", &[json!(10)]).unwrap();
//! assert_eq!(out, json!(9));
//! ```

pub mod builtin;
pub mod coder;

use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

use coder::{FromJson, ToJson};

/// Failure modes of a host-function call. These never halt the interpreter;
/// callers convert them into `error.execution` events.
#[derive(Debug, Error)]
pub enum FunctionError {
    #[error("no function registered for name: {0}")]
    Unknown(String),

    #[error("function {name} expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("function {name} could not decode argument {index}")]
    InvalidArgument { name: String, index: usize },
}

/// A type-erased host function callable with datamodel values.
pub trait HostFunction: Send + Sync {
    fn call(&self, name: &str, args: &[Value]) -> Result<Value, FunctionError>;
}

/// Conversion from plain closures into [`HostFunction`] objects, implemented
/// for arities 0 through 4 over [`FromJson`] arguments and [`ToJson`]
/// returns.
pub trait IntoHostFunction<Args> {
    fn into_host_function(self) -> Box<dyn HostFunction>;
}

macro_rules! impl_into_host_function {
    ($count:expr $(, $arg:ident : $idx:tt)*) => {
        impl<F, R $(, $arg)*> IntoHostFunction<(R, $($arg,)*)> for F
        where
            F: Fn($($arg),*) -> R + Send + Sync + 'static,
            R: ToJson + 'static,
            $($arg: FromJson + 'static,)*
        {
            fn into_host_function(self) -> Box<dyn HostFunction> {
                // The marker pins the signature so the impl below is fully
                // constrained; `fn() -> Args` keeps the wrapper Send + Sync.
                struct Wrapper<F, Args> {
                    function: F,
                    _signature: std::marker::PhantomData<fn() -> Args>,
                }
                impl<F, R $(, $arg)*> HostFunction for Wrapper<F, (R, $($arg,)*)>
                where
                    F: Fn($($arg),*) -> R + Send + Sync,
                    R: ToJson,
                    $($arg: FromJson,)*
                {
                    fn call(&self, name: &str, args: &[Value]) -> Result<Value, FunctionError> {
                        if args.len() != $count {
                            return Err(FunctionError::Arity {
                                name: name.to_string(),
                                expected: $count,
                                got: args.len(),
                            });
                        }
                        Ok((self.function)(
                            $($arg::from_json(&args[$idx]).ok_or_else(|| {
                                FunctionError::InvalidArgument {
                                    name: name.to_string(),
                                    index: $idx,
                                }
                            })?),*
                        )
                        .to_json())
                    }
                }
                Box::new(Wrapper::<F, (R, $($arg,)*)> {
                    function: self,
                    _signature: std::marker::PhantomData,
                })
            }
        }
    };
}

impl_into_host_function!(0);
impl_into_host_function!(1, A0: 0);
impl_into_host_function!(2, A0: 0, A1: 1);
impl_into_host_function!(3, A0: 0, A1: 1, A2: 2);
impl_into_host_function!(4, A0: 0, A1: 1, A2: 2, A3: 3);

/// Name → host-function registry shared by every expression evaluation of a
/// session.
///
/// A fresh dispatcher comes pre-loaded with the built-in functions
/// (`ContainsKey`, `FindFirstWithKeyValue`). Dispatchers may be shared
/// read-only across sessions once registration is complete.
pub struct FunctionDispatcher {
    functions: FxHashMap<String, Box<dyn HostFunction>>,
}

impl Default for FunctionDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionDispatcher {
    /// Creates a dispatcher with the built-in functions registered.
    pub fn new() -> Self {
        let mut dispatcher = Self {
            functions: FxHashMap::default(),
        };
        builtin::register_builtins(&mut dispatcher);
        dispatcher
    }

    /// Returns whether `name` is registered.
    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registers `function` under `name`. Returns false (and keeps the
    /// existing function) when the name is already taken.
    #[must_use = "a refused registration means the name was already taken"]
    pub fn register<Args>(&mut self, name: &str, function: impl IntoHostFunction<Args>) -> bool {
        if self.has_function(name) {
            return false;
        }
        self.functions
            .insert(name.to_string(), function.into_host_function());
        true
    }

    /// Executes the function registered under `name` with `args`.
    pub fn execute(&self, name: &str, args: &[Value]) -> Result<Value, FunctionError> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| FunctionError::Unknown(name.to_string()))?;
        function.call(name, args)
    }
}

impl std::fmt::Debug for FunctionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("FunctionDispatcher")
            .field("functions", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registers_and_executes_closures() {
        let mut dispatcher = FunctionDispatcher::new();
        assert!(dispatcher.register("Add", |a: i64, b: i64| a + b));
        assert_eq!(dispatcher.execute("Add", &[json!(2), json!(3)]).unwrap(), json!(5));
    }

    #[test]
    fn zero_argument_functions() {
        let mut dispatcher = FunctionDispatcher::new();
        assert!(dispatcher.register("Answer", || 42i64));
        assert_eq!(dispatcher.execute("Answer", &[]).unwrap(), json!(42));
    }

    #[test]
    fn duplicate_names_are_refused() {
        let mut dispatcher = FunctionDispatcher::new();
        assert!(dispatcher.register("F", |i: i64| i));
        assert!(!dispatcher.register("F", |i: i64| i + 1));
        // First registration wins.
        assert_eq!(dispatcher.execute("F", &[json!(1)]).unwrap(), json!(1));
    }

    #[test]
    fn argument_decode_failures_are_reported() {
        let mut dispatcher = FunctionDispatcher::new();
        assert!(dispatcher.register("Neg", |i: i64| -i));
        let err = dispatcher.execute("Neg", &[json!("one")]).unwrap_err();
        assert!(matches!(err, FunctionError::InvalidArgument { index: 0, .. }));
        let err = dispatcher.execute("Neg", &[]).unwrap_err();
        assert!(matches!(err, FunctionError::Arity { expected: 1, got: 0, .. }));
    }

    #[test]
    fn unknown_function_is_an_error() {
        let dispatcher = FunctionDispatcher::new();
        assert!(matches!(
            dispatcher.execute("Nope", &[]),
            Err(FunctionError::Unknown(_))
        ));
    }

    #[test]
    fn builtins_are_preregistered() {
        let dispatcher = FunctionDispatcher::new();
        assert!(dispatcher.has_function("ContainsKey"));
        assert!(dispatcher.has_function("FindFirstWithKeyValue"));
    }

    #[test]
    fn array_arguments_decode_elementwise() {
        let mut dispatcher = FunctionDispatcher::new();
        assert!(dispatcher.register("Sum", |xs: Vec<i64>| xs.iter().sum::<i64>()));
        assert_eq!(
            dispatcher.execute("Sum", &[json!([1, 2, 3])]).unwrap(),
            json!(6)
        );
        assert!(dispatcher.execute("Sum", &[json!([1, "x"])]).is_err());
    }
}
