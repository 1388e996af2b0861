//! Small helpers shared by the datamodel evaluator and the executable
//! content: string quoting, JSON-shape probes, and error payload encoding.

pub mod strings;

pub use strings::{
    escape_quotes, is_quoted_string, looks_like_json_array, looks_like_json_object,
    make_json_error, make_json_from_string_map, quote, unquote,
};
