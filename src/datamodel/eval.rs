//! Expression evaluation by iterated substitution.
//!
//! A tokenized expression is rewritten by a fixed sequence of passes until it
//! collapses to a single value (or a value sequence inside an argument list):
//! parentheses, system-function calls, element access, unary minus, logical
//! not, multiplicative, additive, relational, equality, logical and, logical
//! or. Each pass does local splicing on the token vector; the contract is
//! only on the fixed-point result.

use rustc_hash::FxHashSet;
use serde_json::Value;

use super::lexer::{presubstitute_string_tokens, tokenize_expression};
use super::token::{value_to_string, Token};
use super::EvalError;
use crate::functions::FunctionDispatcher;
use crate::utils::quote;

/// Everything an evaluation needs to read: the store, the dispatcher, and
/// the active-state mirror backing `In()`.
#[derive(Clone, Copy)]
pub(crate) struct EvalEnv<'s> {
    pub store: &'s Value,
    pub dispatcher: &'s FunctionDispatcher,
    pub active_ids: &'s FxHashSet<String>,
    pub in_session: bool,
}

/// One step of a destructively evaluated location path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PathSeg {
    Key(String),
    Index(usize),
}

fn fail<T>(message: impl Into<String>) -> Result<T, EvalError> {
    Err(EvalError::new(message))
}

fn debug_join(tokens: &[Token]) -> String {
    tokens
        .iter()
        .map(Token::debug_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// True for an empty sequence or `value (, value)*`.
fn is_value_sequence(tokens: &[Token]) -> bool {
    if tokens.is_empty() {
        return true;
    }
    if !tokens[0].is_value() || tokens.len() % 2 == 0 {
        return false;
    }
    let mut i = 1;
    while i < tokens.len() {
        if !tokens[i].is_op(",") || !tokens[i + 1].is_value() {
            return false;
        }
        i += 2;
    }
    true
}

/// Finds the first window of consecutive tokens matching `predicates`,
/// starting the search at `from`.
fn find_window<'s>(
    tokens: &[Token<'s>],
    from: usize,
    predicates: &[&dyn Fn(&Token<'s>) -> bool],
) -> Option<usize> {
    let n = predicates.len();
    if tokens.len() < n || from > tokens.len() - n {
        return None;
    }
    (from..=tokens.len() - n)
        .find(|&i| predicates.iter().enumerate().all(|(j, p)| p(&tokens[i + j])))
}

/// Finds the first `(...)`/`[...]` group at or after `from`. The group type
/// is auto-detected from the first opener; only openers/closers of that type
/// participate in depth counting, so mixed nesting is handled by recursion.
/// Returns None when no complete group remains — including the stray-closer
/// case, which then surfaces as leftover tokens at the final check.
fn find_group(tokens: &[Token<'_>], from: usize) -> Option<(usize, usize, char)> {
    let mut open = None;
    for (i, token) in tokens.iter().enumerate().skip(from) {
        match token.operator() {
            Some("(") => {
                open = Some((i, '('));
                break;
            }
            Some("[") => {
                open = Some((i, '['));
                break;
            }
            Some(")") | Some("]") => return None,
            _ => {}
        }
    }
    let (start, ty) = open?;
    let (open_op, close_op) = if ty == '(' { ("(", ")") } else { ("[", "]") };
    let mut depth = 0i32;
    for (i, token) in tokens.iter().enumerate().skip(start) {
        if token.is_op(open_op) {
            depth += 1;
        } else if token.is_op(close_op) {
            depth -= 1;
            if depth == 0 {
                return Some((start, i, ty));
            }
        }
    }
    None
}

/// Recursively evaluates the contents of the outermost parentheses. Argument
/// lists of system functions and element-access brackets keep their
/// parentheses (their contents are reduced to a value sequence in place);
/// grouping parentheses are stripped.
fn substitute_parentheses<'s>(
    env: EvalEnv<'s>,
    expr: &mut Vec<Token<'s>>,
) -> Result<bool, EvalError> {
    let mut substituted = false;
    let mut i = 0usize;
    while let Some((start, end, ty)) = find_group(expr, i) {
        let before_is_sysfn = start > 0 && expr[start - 1].is_system_function();
        if is_value_sequence(&expr[start + 1..end]) && (ty == '[' || before_is_sysfn) {
            i = end + 1;
            continue;
        }
        let mut content: Vec<Token<'s>> = expr.drain(start + 1..end).collect();
        if content.is_empty() && ty == '[' {
            return fail("empty expression between '[]'");
        }
        if !content.is_empty() {
            substitute_until_value(env, &mut content)?;
        }
        let content_len = content.len();
        expr.splice(start + 1..start + 1, content);
        substituted = true;
        if ty == '(' && !before_is_sysfn {
            expr.remove(start + 1 + content_len);
            expr.remove(start);
            i = start + content_len;
        } else {
            i = start + content_len + 2;
        }
    }
    Ok(substituted)
}

/// Replaces `fn ( value-sequence )` with the call result. The built-in
/// `In(id)` consults the active-state mirror; everything else dispatches.
fn substitute_system_function_calls<'s>(
    env: EvalEnv<'s>,
    expr: &mut Vec<Token<'s>>,
) -> Result<bool, EvalError> {
    let is_sysfn: &dyn Fn(&Token<'s>) -> bool = &|t| t.is_system_function();
    let is_open: &dyn Fn(&Token<'s>) -> bool = &|t| t.is_op("(");
    let mut substituted = false;
    let mut i = 0usize;
    while let Some(idx) = find_window(expr, i, &[is_sysfn, is_open]) {
        let mut depth = 0i32;
        let mut close = None;
        for (j, token) in expr.iter().enumerate().skip(idx + 1) {
            if token.is_op("(") {
                depth += 1;
            } else if token.is_op(")") {
                depth -= 1;
                if depth == 0 {
                    close = Some(j);
                    break;
                }
            }
        }
        let Some(close) = close else {
            return fail(format!(
                "invalid function call syntax for: {}",
                expr[idx].debug_string()
            ));
        };
        let arg_tokens: Vec<Token<'s>> = expr.drain(idx + 2..close).collect();
        if !is_value_sequence(&arg_tokens) {
            return fail(format!(
                "invalid argument list for function call: {} {}",
                expr[idx].debug_string(),
                debug_join(&arg_tokens)
            ));
        }
        let arguments: Vec<Value> = arg_tokens
            .iter()
            .filter(|t| t.is_value())
            .map(|t| t.value().clone())
            .collect();
        let name = match &expr[idx] {
            Token::SystemFunction(name) => name.clone(),
            _ => unreachable!("window matched a system function"),
        };
        let result = if name == "In" {
            if !env.in_session || arguments.len() != 1 || !arguments[0].is_string() {
                return fail(format!(
                    "invalid call to function In({}); needs a running session and a \
                     single string argument",
                    debug_join(&arg_tokens)
                ));
            }
            let state_id = arguments[0].as_str().unwrap_or_default();
            Value::Bool(env.active_ids.contains(state_id))
        } else {
            env.dispatcher
                .execute(&name, &arguments)
                .map_err(|e| EvalError::new(format!("system function call failed: {e}")))?
        };
        // The argument sequence is already drained; replace `name ( )`.
        expr.splice(idx..idx + 3, std::iter::once(Token::Value(result)));
        substituted = true;
        i = idx + 1;
    }
    Ok(substituted)
}

/// Replaces `base [ key ]` with the accessed slot: a reference when the base
/// is a reference, a copied value otherwise. `array["length"]` yields an
/// integer literal, which is what makes `length` unassignable.
fn substitute_element_access<'s>(
    _env: EvalEnv<'s>,
    expr: &mut Vec<Token<'s>>,
) -> Result<bool, EvalError> {
    let is_container: &dyn Fn(&Token<'s>) -> bool =
        &|t| t.is_value() && (t.value().is_object() || t.value().is_array());
    let is_open: &dyn Fn(&Token<'s>) -> bool = &|t| t.is_op("[");
    let is_val: &dyn Fn(&Token<'s>) -> bool = &|t| t.is_value();
    let is_close: &dyn Fn(&Token<'s>) -> bool = &|t| t.is_op("]");
    let predicates = [is_container, is_open, is_val, is_close];

    let mut substituted = false;
    let mut i = 0usize;
    while let Some(idx) = find_window(expr, i, &predicates) {
        let replacement: Token<'s> = {
            let base = &expr[idx];
            let key = &expr[idx + 2];
            // A reference base keeps pointing into the store after the
            // access; an owned base copies the element out.
            let base_ref: Option<&'s Value> = match base {
                Token::Reference(r) => Some(*r),
                _ => None,
            };
            match base.value() {
                Value::Array(items) => {
                    if value_to_string(key.value(), false) == "length" {
                        Token::Value(Value::from(items.len() as i64))
                    } else {
                        match key.value().as_i64() {
                            Some(n) if n >= 0 && (n as usize) < items.len() => match base_ref {
                                Some(Value::Array(shared)) => {
                                    Token::Reference(&shared[n as usize])
                                }
                                _ => Token::Value(items[n as usize].clone()),
                            },
                            _ => {
                                return fail(format!(
                                    "accessing array at: {}, with invalid index: {}",
                                    base.debug_string(),
                                    key.debug_string()
                                ));
                            }
                        }
                    }
                }
                Value::Object(map) => {
                    let field = value_to_string(key.value(), false);
                    if !map.contains_key(&field) {
                        return fail(format!(
                            "accessing object at: {}, with invalid field: {}",
                            base.debug_string(),
                            key.debug_string()
                        ));
                    }
                    match base_ref {
                        Some(Value::Object(shared)) => Token::Reference(&shared[&field]),
                        _ => Token::Value(map[&field].clone()),
                    }
                }
                _ => unreachable!("window matched an object or array"),
            }
        };
        expr.splice(idx..idx + 4, std::iter::once(replacement));
        substituted = true;
        // Restart at the result so chained accesses like foo[1][2] reduce.
        i = idx;
    }
    Ok(substituted)
}

/// Right-associative unary pass shared by `-` and `!`. A candidate operator
/// directly preceded by a value is binary and is skipped.
fn substitute_unary<'s>(
    expr: &mut Vec<Token<'s>>,
    op: &str,
    apply: impl Fn(&Token<'s>) -> Result<Token<'static>, EvalError>,
) -> Result<bool, EvalError> {
    if expr.len() < 2 {
        return Ok(false);
    }
    let mut substituted = false;
    let mut i = expr.len();
    while i > 0 {
        i -= 1;
        if expr[i].is_value()
            && i >= 1
            && expr[i - 1].is_op(op)
            && (i < 2 || !expr[i - 2].is_value())
        {
            let result = apply(&expr[i])?;
            expr[i - 1] = result;
            expr.remove(i);
            substituted = true;
            // The next iteration examines the result, so chains like `--x`
            // reduce right to left.
        }
    }
    Ok(substituted)
}

fn unary_minus(token: &Token<'_>) -> Result<Token<'static>, EvalError> {
    match token.value() {
        Value::Number(n) => {
            if n.is_f64() {
                Ok(Token::Value(Value::from(-n.as_f64().unwrap_or(0.0))))
            } else {
                Ok(Token::Value(Value::from(
                    n.as_i64().unwrap_or(0).wrapping_neg(),
                )))
            }
        }
        _ => fail(format!("operand is not a number: - {}", token.debug_string())),
    }
}

fn logical_not(token: &Token<'_>) -> Result<Token<'static>, EvalError> {
    Ok(Token::Value(Value::Bool(!token.to_bool())))
}

/// Left-associative infix pass: finds `value op value` windows for the
/// operators selected by `op_match` and folds them left to right.
fn substitute_infix_binary<'s>(
    expr: &mut Vec<Token<'s>>,
    op_match: impl Fn(&str) -> bool,
    apply: impl Fn(&str, &Token<'s>, &Token<'s>) -> Result<Token<'static>, EvalError>,
) -> Result<bool, EvalError> {
    if expr.len() < 3 {
        return Ok(false);
    }
    let is_val: &dyn Fn(&Token<'s>) -> bool = &|t| t.is_value();
    let is_matching_op: &dyn Fn(&Token<'s>) -> bool =
        &|t| t.operator().map(&op_match).unwrap_or(false);
    let predicates = [is_val, is_matching_op, is_val];

    let mut substituted = false;
    let mut i = 0usize;
    while let Some(idx) = find_window(expr, i, &predicates) {
        let op = expr[idx + 1].operator().unwrap_or_default();
        let result = apply(op, &expr[idx], &expr[idx + 2])?;
        expr.splice(idx..idx + 3, std::iter::once(result));
        substituted = true;
        // Continue from the result for left associativity.
        i = idx;
    }
    Ok(substituted)
}

fn int_like(token: &Token<'_>) -> bool {
    token.is_integer() || token.value().is_boolean()
}

fn as_int(token: &Token<'_>) -> i64 {
    match token.value() {
        Value::Bool(b) => *b as i64,
        Value::Number(n) => n.as_i64().unwrap_or(0),
        _ => 0,
    }
}

fn real_like(token: &Token<'_>) -> bool {
    token.value().is_number() || token.value().is_boolean()
}

fn as_real(token: &Token<'_>) -> f64 {
    match token.value() {
        Value::Bool(b) => *b as i64 as f64,
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Integer arithmetic when both operands are integral (booleans count as
/// 0/1); otherwise both promote to reals.
fn numeric_operation(
    a: &Token<'_>,
    b: &Token<'_>,
    int_op: impl Fn(i64, i64) -> i64,
    real_op: impl Fn(f64, f64) -> f64,
) -> Result<Token<'static>, EvalError> {
    if int_like(a) && int_like(b) {
        Ok(Token::Value(Value::from(int_op(as_int(a), as_int(b)))))
    } else if real_like(a) && real_like(b) {
        Ok(Token::Value(Value::from(real_op(as_real(a), as_real(b)))))
    } else {
        fail(format!(
            "unsupported operand type: {}, {}",
            a.debug_string(),
            b.debug_string()
        ))
    }
}

/// `+` stringifies and concatenates when either operand is a string,
/// otherwise adds numerically.
fn additive_operation(
    op: &str,
    a: &Token<'_>,
    b: &Token<'_>,
) -> Result<Token<'static>, EvalError> {
    match op {
        "+" => {
            if a.value().is_string() || b.value().is_string() {
                Ok(Token::Value(Value::String(
                    value_to_string(a.value(), false) + &value_to_string(b.value(), false),
                )))
            } else {
                numeric_operation(a, b, i64::wrapping_add, |x, y| x + y)
            }
        }
        "-" => numeric_operation(a, b, i64::wrapping_sub, |x, y| x - y),
        _ => fail(format!("unrecognized operator: {op}")),
    }
}

fn multiplicative_operation(
    op: &str,
    a: &Token<'_>,
    b: &Token<'_>,
) -> Result<Token<'static>, EvalError> {
    match op {
        "*" => numeric_operation(a, b, i64::wrapping_mul, |x, y| x * y),
        "/" => {
            if b.value().is_number() && as_real(b) == 0.0 {
                return fail(format!(
                    "divide by zero: {} / {}",
                    a.debug_string(),
                    b.debug_string()
                ));
            }
            numeric_operation(a, b, i64::wrapping_div, |x, y| x / y)
        }
        _ => fail(format!("unrecognized operator: {op}")),
    }
}

fn compare_ints(op: &str, a: i64, b: i64) -> bool {
    match op {
        "==" => a == b,
        "!=" => a != b,
        "<" => a < b,
        "<=" => a <= b,
        ">" => a > b,
        ">=" => a >= b,
        _ => false,
    }
}

fn compare_reals(op: &str, a: f64, b: f64) -> bool {
    match op {
        "==" => a == b,
        "!=" => a != b,
        "<" => a < b,
        "<=" => a <= b,
        ">" => a > b,
        ">=" => a >= b,
        _ => false,
    }
}

fn compare_strings(op: &str, a: &str, b: &str) -> Option<bool> {
    Some(match op {
        "==" => a == b,
        "!=" => a != b,
        "<" => a < b,
        "<=" => a <= b,
        ">" => a > b,
        ">=" => a >= b,
        _ => return None,
    })
}

/// Comparison with the numeric promotion rule. Strings compare only with
/// strings; booleans and null support equality only.
fn comparison_operation(
    op: &str,
    a: &Token<'_>,
    b: &Token<'_>,
) -> Result<Token<'static>, EvalError> {
    let va = a.value();
    let vb = b.value();

    if va.is_boolean() && vb.is_boolean() {
        return match op {
            "==" => Ok(Token::Value(Value::Bool(a.to_bool() == b.to_bool()))),
            "!=" => Ok(Token::Value(Value::Bool(a.to_bool() != b.to_bool()))),
            _ => fail(format!("invalid boolean comparison: {op}")),
        };
    }
    if va.is_null() || vb.is_null() {
        return match op {
            "==" => Ok(Token::Value(Value::Bool(va.is_null() && vb.is_null()))),
            "!=" => Ok(Token::Value(Value::Bool(!(va.is_null() && vb.is_null())))),
            _ => fail(format!("invalid null comparison: {op}")),
        };
    }
    if va.is_number() && vb.is_number() {
        let result = if a.is_integer() && b.is_integer() {
            compare_ints(op, as_int(a), as_int(b))
        } else {
            compare_reals(op, as_real(a), as_real(b))
        };
        return Ok(Token::Value(Value::Bool(result)));
    }
    if let (Value::String(sa), Value::String(sb)) = (va, vb) {
        if let Some(result) = compare_strings(op, sa, sb) {
            return Ok(Token::Value(Value::Bool(result)));
        }
    }
    fail(format!(
        "invalid comparison: {} {} {}",
        a.debug_string(),
        op,
        b.debug_string()
    ))
}

/// Substitutes the token list until it is a value sequence, applying the
/// passes in their fixed order and repeating while progress is made.
pub(crate) fn substitute_until_value<'s>(
    env: EvalEnv<'s>,
    expr: &mut Vec<Token<'s>>,
) -> Result<(), EvalError> {
    loop {
        let mut progressed = false;
        progressed |= substitute_parentheses(env, expr)?;
        progressed |= substitute_system_function_calls(env, expr)?;
        progressed |= substitute_element_access(env, expr)?;
        progressed |= substitute_unary(expr, "-", unary_minus)?;
        progressed |= substitute_unary(expr, "!", logical_not)?;
        progressed |=
            substitute_infix_binary(expr, |op| op == "*" || op == "/", multiplicative_operation)?;
        progressed |=
            substitute_infix_binary(expr, |op| op == "+" || op == "-", additive_operation)?;
        progressed |= substitute_infix_binary(
            expr,
            |op| matches!(op, "<" | "<=" | ">" | ">="),
            comparison_operation,
        )?;
        progressed |= substitute_infix_binary(
            expr,
            |op| matches!(op, "==" | "!="),
            comparison_operation,
        )?;
        progressed |= substitute_infix_binary(
            expr,
            |op| op == "&&",
            |_, a, b| Ok(Token::Value(Value::Bool(a.to_bool() && b.to_bool()))),
        )?;
        progressed |= substitute_infix_binary(
            expr,
            |op| op == "||",
            |_, a, b| Ok(Token::Value(Value::Bool(a.to_bool() || b.to_bool()))),
        )?;

        if is_value_sequence(expr) {
            return Ok(());
        }
        if !progressed {
            return fail(format!(
                "expression did not reduce to a value, remaining tokens: {}",
                debug_join(expr)
            ));
        }
    }
}

/// Converts string tokens to token objects; any lexical error fails the
/// whole expression.
fn convert_tokens<'s>(
    env: EvalEnv<'s>,
    string_tokens: &[String],
) -> Result<Vec<Token<'s>>, EvalError> {
    string_tokens
        .iter()
        .map(|s| {
            Token::create(env.store, env.dispatcher, s)
                .map_err(|()| EvalError::new(format!("token creation failed for token: {s}")))
        })
        .collect()
}

/// Evaluates a complete value expression down to a single token.
pub(crate) fn process_expression<'s>(
    env: EvalEnv<'s>,
    expression: &str,
) -> Result<Token<'s>, EvalError> {
    let expression = expression.trim();
    if expression.is_empty() {
        return fail("empty expression");
    }

    // A whole-expression token (literal, quoted string, reference) needs no
    // substitution at all.
    if let Ok(token) = Token::create(env.store, env.dispatcher, expression) {
        if token.is_value() {
            return Ok(token);
        }
    }

    let string_tokens = presubstitute_string_tokens(env.store, tokenize_expression(expression));
    let mut tokens = convert_tokens(env, &string_tokens)?;
    substitute_until_value(env, &mut tokens)?;
    match tokens.pop() {
        Some(token) if tokens.is_empty() => Ok(token),
        _ => fail(format!(
            "expression evaluated to a sequence, not a value: {expression}"
        )),
    }
}

/// Validates that `path` is a dot-separated location path none of whose
/// prefixes names a registered function.
fn is_dot_separated_path(dispatcher: &FunctionDispatcher, path: &str) -> bool {
    if path.is_empty() {
        return false;
    }
    if path == "." {
        return true;
    }
    let mut prefix = String::new();
    for (i, segment) in path.split('.').enumerate() {
        if i > 0 {
            if segment.is_empty() {
                return false;
            }
            prefix.push('.');
        }
        prefix.push_str(segment);
        if dispatcher.has_function(&prefix) {
            return false;
        }
    }
    true
}

/// Evaluates a location expression into its root name plus a chain of
/// element-access segments, evaluating any bracketed key expressions against
/// the current store. The store is not modified.
pub(crate) fn parse_location_expression(
    env: EvalEnv<'_>,
    expression: &str,
) -> Result<(String, Vec<PathSeg>), EvalError> {
    let expression = expression.trim();
    if expression.is_empty() {
        return fail("empty location expression");
    }

    let mut string_tokens = presubstitute_string_tokens(env.store, tokenize_expression(expression));
    if string_tokens.is_empty() {
        return fail(format!("invalid location expression: {expression}"));
    }
    if !is_dot_separated_path(env.dispatcher, &string_tokens[0]) {
        return fail(format!("location is not a path: {}", string_tokens[0]));
    }

    // Split the leading dotted path into a root plus element accesses so
    // each step can be type-checked against the store.
    let path_segments: Vec<String> = string_tokens[0]
        .split('.')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    let Some((root, rest)) = path_segments.split_first() else {
        return fail(format!("invalid location expression: {expression}"));
    };
    let root = root.clone();
    let mut rewritten: Vec<String> = Vec::new();
    for segment in rest {
        rewritten.push("[".to_string());
        rewritten.push(quote(segment));
        rewritten.push("]".to_string());
    }
    rewritten.extend(string_tokens.drain(1..));

    // The root may not exist yet, so only the access chain is converted and
    // evaluated.
    let mut tokens = convert_tokens(env, &rewritten)?;
    substitute_parentheses(env, &mut tokens)?;
    if tokens.len() % 3 != 0 {
        return fail(format!("malformed location expression: {expression}"));
    }

    let mut segments = Vec::with_capacity(tokens.len() / 3);
    let mut it = tokens.iter();
    while let (Some(open), Some(key), Some(close)) = (it.next(), it.next(), it.next()) {
        if !open.is_op("[") || !key.is_value() || !close.is_op("]") {
            return fail(format!("malformed location expression: {expression}"));
        }
        match key.value() {
            Value::String(s) => segments.push(PathSeg::Key(s.clone())),
            Value::Number(n) => match n.as_i64() {
                Some(index) if index >= 0 => segments.push(PathSeg::Index(index as usize)),
                _ => {
                    return fail(format!(
                        "array index out of bounds: {}, from expression: {expression}",
                        key.debug_string()
                    ));
                }
            },
            _ => {
                return fail(format!(
                    "field is not an index or a string: {}",
                    key.debug_string()
                ));
            }
        }
    }
    Ok((root, segments))
}

/// Destructively walks the store along a parsed location, creating a missing
/// intermediate object for a key access and a missing intermediate array for
/// an index access. A kind mismatch against an existing value is an error.
/// Returns the resolved slot.
pub(crate) fn resolve_location_slot<'m>(
    store: &'m mut Value,
    root: &str,
    segments: &[PathSeg],
) -> Result<&'m mut Value, EvalError> {
    // One access step: type-check the current slot, record whether the next
    // slot is freshly created, and descend.
    fn descend<'v>(
        current: &'v mut Value,
        segment: &PathSeg,
        is_new: &mut bool,
    ) -> Result<&'v mut Value, EvalError> {
        match segment {
            PathSeg::Key(key) => match current {
                Value::Object(map) => {
                    *is_new = !map.contains_key(key);
                    Ok(map.entry(key.clone()).or_insert(Value::Null))
                }
                other => fail(format!(
                    "object element access failed on non-object: {}",
                    value_to_string(other, true)
                )),
            },
            PathSeg::Index(index) => match current {
                Value::Array(items) => {
                    *is_new = *index >= items.len();
                    if *index >= items.len() {
                        items.resize(index + 1, Value::Null);
                    }
                    Ok(&mut items[*index])
                }
                other => fail(format!(
                    "array element access failed on non-array: {}",
                    value_to_string(other, true)
                )),
            },
        }
    }

    let root_map = match store {
        Value::Object(map) => map,
        _ => return fail("store root is not an object"),
    };
    let mut is_new = !root_map.contains_key(root);
    let mut current: &mut Value = root_map.entry(root.to_string()).or_insert(Value::Null);

    for segment in segments {
        if is_new {
            *current = match segment {
                PathSeg::Key(_) => Value::Object(serde_json::Map::new()),
                PathSeg::Index(_) => Value::Array(Vec::new()),
            };
        }
        current = descend(current, segment, &mut is_new)?;
    }
    Ok(current)
}

/// Whether `location` can be assigned to without declaring it: it resolves
/// already, or it ends in an element access whose parent has the matching
/// kind (string key on an object, non-negative integer on an array).
pub(crate) fn is_assignable(env: EvalEnv<'_>, location: &str) -> Result<(), EvalError> {
    let location = location.trim();
    if let Ok(token) = process_expression(env, location) {
        if token.is_reference() {
            return Ok(());
        }
    }

    let string_tokens = presubstitute_string_tokens(env.store, tokenize_expression(location));
    if string_tokens.is_empty() {
        return fail("empty location expression");
    }
    if string_tokens.len() == 1 {
        // An undefined dotted path: assignable when the parent path is an
        // existing object.
        let token = &string_tokens[0];
        let parent = match token.rfind('.') {
            Some(pos) => &token[..pos],
            None => token.as_str(),
        };
        return match Token::create(env.store, env.dispatcher, parent) {
            Ok(parent_token) if parent_token.is_reference() && parent_token.value().is_object() => {
                Ok(())
            }
            _ => fail(format!("location is not assignable: {location}")),
        };
    }

    let mut tokens = convert_tokens(env, &string_tokens)?;
    substitute_parentheses(env, &mut tokens)?;
    if tokens.len() < 4 || (tokens.len() - 1) % 3 != 0 {
        return fail(format!("location is not assignable: {location}"));
    }
    // Split off the last access; the remaining prefix must reduce to a
    // reference of the matching kind.
    let tail: Vec<Token> = tokens.split_off(tokens.len() - 3);
    substitute_until_value(env, &mut tokens)?;
    let parent = tokens
        .first()
        .filter(|t| t.is_reference())
        .ok_or_else(|| EvalError::new(format!("location parent is not a reference: {location}")))?;
    let key = &tail[1];
    if !key.is_value() {
        return fail(format!("location key is not a value: {location}"));
    }
    let parent_value = parent.value();
    if parent_value.is_array() && key.value().as_i64().map_or(false, |i| i >= 0) {
        return Ok(());
    }
    if parent_value.is_object() && key.value().is_string() {
        return Ok(());
    }
    fail(format!("location is not assignable: {location}"))
}
