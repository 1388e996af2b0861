//! Tokenization and string-token preprocessing.
//!
//! A left-to-right scan splits an expression on the operator set, leaving
//! quoted strings intact. Preprocessing then normalizes quotes, rewrites
//! dot-path continuations and the array `length` property into element
//! accesses, and macro-expands `Math.random ( )`.

use serde_json::Value;

use super::token::{resolve_path, OPERATORS};
use crate::utils::{is_quoted_string, quote, unquote};

/// Splits `expr` into string tokens on the operator set. Characters inside
/// single- or double-quoted strings (backslash-escape aware) are not split;
/// whitespace around tokens is stripped.
pub(crate) fn tokenize_expression(expr: &str) -> Vec<String> {
    let bytes = expr.as_bytes();
    let mut tokens = Vec::new();
    let mut token_start = 0usize;
    let mut in_string = false;
    let mut quote_mark = 0u8;

    let mut i = 0usize;
    while i < bytes.len() {
        let c = bytes[i];
        if c == b'"' || c == b'\'' {
            if in_string {
                in_string = bytes[i - 1] == b'\\' || c != quote_mark;
            } else {
                in_string = true;
                quote_mark = c;
            }
        }
        if in_string {
            i += 1;
            continue;
        }
        // Longest operator match at this position.
        let rest = &expr[i..];
        let mut matched = "";
        for op in OPERATORS {
            if rest.starts_with(op) && op.len() > matched.len() {
                matched = op;
            }
        }
        if matched.is_empty() {
            i += 1;
            continue;
        }
        if token_start < i {
            let operand = expr[token_start..i].trim();
            if !operand.is_empty() {
                tokens.push(operand.to_string());
            }
        }
        tokens.push(matched.to_string());
        token_start = i + matched.len();
        i += matched.len();
    }
    if token_start < bytes.len() {
        let operand = expr[token_start..].trim();
        if !operand.is_empty() {
            tokens.push(operand.to_string());
        }
    }
    tokens
}

/// Preprocessing applied to string tokens before token-object construction:
///
/// 1. Single-quoted strings become double-quoted strings.
/// 2. A token beginning with `.` (a path continuation after an element
///    access) becomes a chain of `[` `"segment"` `]` triples.
/// 3. `identifier.length` becomes `identifier [ "length" ]` when the
///    identifier resolves to an array in the store.
/// 4. `Math.random ( )` is macro-expanded to a uniform real in [0, 1).
pub(crate) fn presubstitute_string_tokens(store: &Value, tokens: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tokens.len());
    for token in tokens {
        if is_quoted_string(&token, '\'') {
            out.push(quote(&unquote(&token, '\'')));
        } else if token.starts_with('.') {
            for segment in token.split('.').filter(|s| !s.is_empty()) {
                out.push("[".to_string());
                out.push(quote(segment));
                out.push("]".to_string());
            }
        } else if let Some(prefix) = token.strip_suffix(".length") {
            if resolve_path(store, prefix).map_or(false, Value::is_array) {
                out.push(prefix.to_string());
                out.push("[".to_string());
                out.push(quote("length"));
                out.push("]".to_string());
            } else {
                out.push(token);
            }
        } else {
            out.push(token);
        }
    }
    expand_math_random(&mut out);
    out
}

// Macro-expands each `Math.random ( )` occurrence into a freshly drawn
// uniform real in [0, 1).
fn expand_math_random(tokens: &mut Vec<String>) {
    let mut i = 0;
    while i + 3 <= tokens.len() {
        if tokens[i] == "Math.random" && tokens[i + 1] == "(" && tokens[i + 2] == ")" {
            let drawn: f64 = rand::random();
            tokens.splice(i..i + 3, std::iter::once(format!("{drawn}")));
        }
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn toks(expr: &str) -> Vec<String> {
        tokenize_expression(expr)
    }

    #[test]
    fn splits_on_operators_longest_match_first() {
        assert_eq!(toks("1+2"), ["1", "+", "2"]);
        assert_eq!(toks("a <= b"), ["a", "<=", "b"]);
        assert_eq!(toks("a<b"), ["a", "<", "b"]);
        assert_eq!(toks("x && !y"), ["x", "&&", "!", "y"]);
        assert_eq!(toks("f(a, b)"), ["f", "(", "a", ",", "b", ")"]);
        assert_eq!(toks("arr[0].foo"), ["arr", "[", "0", "]", ".foo"]);
    }

    #[test]
    fn quoted_strings_are_not_split() {
        assert_eq!(toks("'a + b'"), ["'a + b'"]);
        assert_eq!(toks("\"x[0]\" + y"), ["\"x[0]\"", "+", "y"]);
        assert_eq!(toks(r#"'it\'s' + '!'"#), [r#"'it\'s'"#, "+", "'!'"]);
    }

    #[test]
    fn whitespace_is_stripped() {
        assert_eq!(toks("  1  +  2  "), ["1", "+", "2"]);
        assert_eq!(toks("   "), Vec::<String>::new());
    }

    #[test]
    fn single_quotes_normalize_to_double() {
        let out = presubstitute_string_tokens(&json!({}), vec!["'abc'".to_string()]);
        assert_eq!(out, ["\"abc\""]);
    }

    #[test]
    fn dot_continuations_become_element_accesses() {
        let out = presubstitute_string_tokens(
            &json!({}),
            vec![
                "foo".to_string(),
                "[".to_string(),
                "0".to_string(),
                "]".to_string(),
                ".bar.baz".to_string(),
            ],
        );
        assert_eq!(
            out,
            ["foo", "[", "0", "]", "[", "\"bar\"", "]", "[", "\"baz\"", "]"]
        );
    }

    #[test]
    fn length_rewrites_only_for_arrays() {
        let store = json!({"arr": [1, 2, 3], "obj": {"length": 9}});
        let out = presubstitute_string_tokens(&store, vec!["arr.length".to_string()]);
        assert_eq!(out, ["arr", "[", "\"length\"", "]"]);
        // Not an array: token is left alone.
        let out = presubstitute_string_tokens(&store, vec!["obj.length".to_string()]);
        assert_eq!(out, ["obj.length"]);
        let out = presubstitute_string_tokens(&store, vec!["missing.length".to_string()]);
        assert_eq!(out, ["missing.length"]);
    }

    #[test]
    fn math_random_expands_to_a_real_in_unit_range() {
        let out = presubstitute_string_tokens(
            &json!({}),
            vec!["Math.random".to_string(), "(".to_string(), ")".to_string()],
        );
        assert_eq!(out.len(), 1);
        let drawn: f64 = out[0].parse().unwrap();
        assert!((0.0..1.0).contains(&drawn));
    }
}
