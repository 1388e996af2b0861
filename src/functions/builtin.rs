//! Built-in host functions available to every chart.

use serde_json::Value;

use super::FunctionDispatcher;

/// Returns true if `value` is an object containing `field_name`.
pub fn contains_key(value: Value, field_name: String) -> bool {
    value
        .as_object()
        .map(|map| map.contains_key(&field_name))
        .unwrap_or(false)
}

/// Scans an array of objects for the first element whose `key` field equals
/// `value`. Returns the index, or -1 when no element matches (or `array` is
/// not an array).
pub fn find_first_with_key_value(array: Value, key: String, value: Value) -> i64 {
    if let Some(items) = array.as_array() {
        for (i, item) in items.iter().enumerate() {
            if item.get(&key) == Some(&value) {
                return i as i64;
            }
        }
    }
    -1
}

pub(crate) fn register_builtins(dispatcher: &mut FunctionDispatcher) {
    let registered = dispatcher.register("ContainsKey", contains_key)
        && dispatcher.register("FindFirstWithKeyValue", find_first_with_key_value);
    debug_assert!(registered);
}
