//! Conversions between datamodel JSON values and native Rust values.
//!
//! Host functions are written against plain Rust types; the dispatcher uses
//! these traits to decode call arguments and encode return values. Decoding
//! is strict: an argument decodes only when the JSON value already has the
//! requested shape (integers do not decode from strings, arrays of `T`
//! decode only when every element decodes).

use serde_json::Value;

/// Decode a native value out of a datamodel JSON value.
pub trait FromJson: Sized {
    fn from_json(value: &Value) -> Option<Self>;
}

/// Encode a native value into a datamodel JSON value.
pub trait ToJson {
    fn to_json(self) -> Value;
}

impl FromJson for Value {
    fn from_json(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromJson for i64 {
    fn from_json(value: &Value) -> Option<Self> {
        value.as_i64()
    }
}

impl FromJson for i32 {
    fn from_json(value: &Value) -> Option<Self> {
        value.as_i64().and_then(|v| i32::try_from(v).ok())
    }
}

impl FromJson for f64 {
    // Integers promote to reals on decode.
    fn from_json(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}

impl FromJson for bool {
    fn from_json(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FromJson for String {
    fn from_json(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}

impl<T: FromJson> FromJson for Vec<T> {
    fn from_json(value: &Value) -> Option<Self> {
        value.as_array()?.iter().map(T::from_json).collect()
    }
}

impl ToJson for Value {
    fn to_json(self) -> Value {
        self
    }
}

impl ToJson for i64 {
    fn to_json(self) -> Value {
        Value::from(self)
    }
}

impl ToJson for i32 {
    fn to_json(self) -> Value {
        Value::from(self)
    }
}

impl ToJson for f64 {
    fn to_json(self) -> Value {
        Value::from(self)
    }
}

impl ToJson for bool {
    fn to_json(self) -> Value {
        Value::from(self)
    }
}

impl ToJson for String {
    fn to_json(self) -> Value {
        Value::from(self)
    }
}

impl ToJson for &str {
    fn to_json(self) -> Value {
        Value::from(self)
    }
}

impl<T: ToJson> ToJson for Vec<T> {
    fn to_json(self) -> Value {
        Value::Array(self.into_iter().map(ToJson::to_json).collect())
    }
}

impl ToJson for () {
    fn to_json(self) -> Value {
        Value::Null
    }
}
