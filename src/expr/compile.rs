//! Lowering of expression trees into aggregation expressions.

use regex::Regex;
use serde_json::{json, Map, Value};

use super::ast::{ArithOp, CmpOp, Expr};
use super::errors::{ExprError, ExprResult};

/// Operators accepted in raw expressions, sorted for binary search.
pub(crate) const KNOWN_OPERATORS: &[&str] = &[
    "$abs",
    "$add",
    "$and",
    "$arrayElemAt",
    "$concat",
    "$cond",
    "$divide",
    "$eq",
    "$exists",
    "$expr",
    "$filter",
    "$gt",
    "$gte",
    "$ifNull",
    "$in",
    "$let",
    "$literal",
    "$lt",
    "$lte",
    "$map",
    "$max",
    "$mergeObjects",
    "$min",
    "$mod",
    "$multiply",
    "$ne",
    "$nin",
    "$not",
    "$or",
    "$reduce",
    "$regexMatch",
    "$size",
    "$slice",
    "$subtract",
    "$sum",
    "$switch",
    "$toLower",
    "$toUpper",
];

impl Expr {
    /// Lowers this expression into an aggregation expression.
    ///
    /// `prefix` is the path that bare field references resolve against,
    /// e.g. `Some("$$this")` inside a list comprehension or
    /// `Some("$predictions")` for an embedded document. `None` binds bare
    /// references to the document root.
    pub fn compile(&self, prefix: Option<&str>) -> ExprResult<Value> {
        match self {
            Expr::Field { path } => Ok(compile_field(path, prefix)),
            Expr::Literal { value } => Ok(compile_literal(value)),
            Expr::Raw { value } => {
                validate_raw(value)?;
                Ok(value.clone())
            }
            Expr::Compare { op, lhs, rhs } => {
                let name = match op {
                    CmpOp::Eq => "$eq",
                    CmpOp::Ne => "$ne",
                    CmpOp::Gt => "$gt",
                    CmpOp::Gte => "$gte",
                    CmpOp::Lt => "$lt",
                    CmpOp::Lte => "$lte",
                };
                Ok(wrap(
                    name,
                    json!([lhs.compile(prefix)?, rhs.compile(prefix)?]),
                ))
            }
            Expr::And { exprs } => Ok(wrap("$and", compile_all(exprs, prefix)?)),
            Expr::Or { exprs } => Ok(wrap("$or", compile_all(exprs, prefix)?)),
            Expr::Not { expr } => Ok(wrap("$not", json!([expr.compile(prefix)?]))),
            Expr::Arith { op, lhs, rhs } => {
                let name = match op {
                    ArithOp::Add => "$add",
                    ArithOp::Subtract => "$subtract",
                    ArithOp::Multiply => "$multiply",
                    ArithOp::Divide => "$divide",
                };
                Ok(wrap(
                    name,
                    json!([lhs.compile(prefix)?, rhs.compile(prefix)?]),
                ))
            }
            Expr::Abs { expr } => Ok(wrap("$abs", expr.compile(prefix)?)),
            Expr::Min { lhs, rhs } => Ok(wrap(
                "$min",
                json!([lhs.compile(prefix)?, rhs.compile(prefix)?]),
            )),
            Expr::Max { lhs, rhs } => Ok(wrap(
                "$max",
                json!([lhs.compile(prefix)?, rhs.compile(prefix)?]),
            )),
            Expr::Index { expr, index } => Ok(wrap(
                "$arrayElemAt",
                json!([expr.compile(prefix)?, index]),
            )),
            Expr::Length { expr } => Ok(wrap(
                "$size",
                wrap("$ifNull", json!([expr.compile(prefix)?, []])),
            )),
            Expr::Map { input, body } => Ok(wrap(
                "$map",
                json!({
                    "input": input.compile(prefix)?,
                    "in": body.compile(Some("$$this"))?,
                }),
            )),
            Expr::Filter { input, cond } => Ok(wrap(
                "$filter",
                json!({
                    "input": input.compile(prefix)?,
                    "cond": cond.compile(Some("$$this"))?,
                }),
            )),
            Expr::Reduce {
                input,
                init,
                combine,
            } => Ok(wrap(
                "$reduce",
                json!({
                    "input": input.compile(prefix)?,
                    "initialValue": compile_literal(init),
                    "in": combine.compile(Some("$$this"))?,
                }),
            )),
            Expr::Sum { input } => Ok(wrap("$sum", input.compile(prefix)?)),
            Expr::Contains { input, value } => Ok(wrap(
                "$in",
                json!([compile_literal(value), input.compile(prefix)?]),
            )),
            Expr::IsIn { expr, values } => Ok(wrap(
                "$in",
                json!([
                    expr.compile(prefix)?,
                    compile_literal(&Value::Array(values.clone())),
                ]),
            )),
            Expr::Exists { expr, expect } => {
                let test = wrap("$gt", json!([expr.compile(prefix)?, null]));
                if *expect {
                    Ok(test)
                } else {
                    Ok(wrap("$not", json!([test])))
                }
            }
            Expr::IfElse {
                cond,
                then,
                otherwise,
            } => Ok(wrap(
                "$cond",
                json!({
                    "if": cond.compile(prefix)?,
                    "then": then.compile(prefix)?,
                    "else": otherwise.compile(prefix)?,
                }),
            )),
            Expr::Upper { expr } => Ok(wrap("$toUpper", expr.compile(prefix)?)),
            Expr::Lower { expr } => Ok(wrap("$toLower", expr.compile(prefix)?)),
            Expr::Concat { exprs } => Ok(wrap("$concat", compile_all(exprs, prefix)?)),
            Expr::StartsWith { expr, prefix: lit } => Ok(wrap(
                "$regexMatch",
                json!({
                    "input": expr.compile(prefix)?,
                    "regex": format!("^{}", regex::escape(lit)),
                }),
            )),
            Expr::EndsWith { expr, suffix } => Ok(wrap(
                "$regexMatch",
                json!({
                    "input": expr.compile(prefix)?,
                    "regex": format!("{}$", regex::escape(suffix)),
                }),
            )),
            Expr::MatchesRegex { expr, pattern } => {
                validate_regex(pattern)?;
                Ok(wrap(
                    "$regexMatch",
                    json!({
                        "input": expr.compile(prefix)?,
                        "regex": pattern,
                    }),
                ))
            }
            Expr::MapValues { expr, mapping } => {
                let input = expr.compile(prefix)?;
                let branches: Vec<Value> = mapping
                    .iter()
                    .map(|(from, to)| {
                        json!({
                            "case": wrap(
                                "$eq",
                                json!([
                                    input.clone(),
                                    compile_literal(&Value::String(from.clone())),
                                ]),
                            ),
                            "then": compile_literal(to),
                        })
                    })
                    .collect();
                Ok(wrap(
                    "$switch",
                    json!({ "branches": branches, "default": input }),
                ))
            }
        }
    }
}

/// Returns whether a compiled expression references the frames of a
/// video sample, directly or through a nested path.
pub fn mentions_frames(expr: &Value) -> bool {
    match expr {
        Value::String(s) => s == "$frames" || s.starts_with("$frames."),
        Value::Array(items) => items.iter().any(mentions_frames),
        Value::Object(map) => map.values().any(mentions_frames),
        _ => false,
    }
}

fn compile_all(exprs: &[Expr], prefix: Option<&str>) -> ExprResult<Value> {
    exprs
        .iter()
        .map(|e| e.compile(prefix))
        .collect::<ExprResult<Vec<Value>>>()
        .map(Value::Array)
}

fn compile_field(path: &str, prefix: Option<&str>) -> Value {
    if path.is_empty() {
        return Value::String(prefix.unwrap_or("$$CURRENT").to_string());
    }
    // Root-bound references and $$ variables pass through untouched.
    if path.starts_with('$') {
        return Value::String(path.to_string());
    }
    match prefix {
        Some(p) => Value::String(format!("{}.{}", p, path)),
        None => Value::String(format!("${}", path)),
    }
}

fn compile_literal(value: &Value) -> Value {
    if needs_guard(value) {
        wrap("$literal", value.clone())
    } else {
        value.clone()
    }
}

/// A literal needs `$literal` protection if any string inside it could
/// be mistaken for a field reference or operator.
fn needs_guard(value: &Value) -> bool {
    match value {
        Value::String(s) => s.starts_with('$'),
        Value::Array(items) => items.iter().any(needs_guard),
        Value::Object(map) => map.iter().any(|(k, v)| k.starts_with('$') || needs_guard(v)),
        _ => false,
    }
}

fn validate_raw(value: &Value) -> ExprResult<()> {
    match value {
        Value::Array(items) => items.iter().try_for_each(validate_raw),
        Value::Object(map) => {
            for (key, nested) in map {
                if key.starts_with('$') && KNOWN_OPERATORS.binary_search(&key.as_str()).is_err() {
                    return Err(ExprError::UnknownOperator(key.clone()));
                }
                if key == "$regexMatch" {
                    if let Some(pattern) = nested.get("regex").and_then(Value::as_str) {
                        validate_regex(pattern)?;
                    }
                }
                validate_raw(nested)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn validate_regex(pattern: &str) -> ExprResult<()> {
    Regex::new(pattern)
        .map(|_| ())
        .map_err(|err| ExprError::InvalidRegex {
            pattern: pattern.to_string(),
            message: err.to_string(),
        })
}

fn wrap(op: &str, body: Value) -> Value {
    let mut map = Map::with_capacity(1);
    map.insert(op.to_string(), body);
    Value::Object(map)
}
