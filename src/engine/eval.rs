//! Aggregation expression evaluator.
//!
//! Evaluates compiled expressions against a single document. Field paths
//! (`$a.b`) resolve against the document root; `$$` variables resolve
//! against the bindings introduced by `$map`, `$filter`, `$reduce`, and
//! `$let`. Missing fields evaluate to null.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use regex::RegexBuilder;
use serde_json::{Map, Value};

use super::errors::{invalid, EngineError, EngineResult};
use super::sort::{compare_values, values_equal};

/// Variable bindings in scope during evaluation.
#[derive(Debug, Clone, Default)]
pub(crate) struct Vars {
    bindings: BTreeMap<String, Value>,
}

impl Vars {
    pub(crate) fn new() -> Vars {
        Vars::default()
    }

    /// Returns a child scope with one extra binding.
    fn with(&self, name: &str, value: Value) -> Vars {
        let mut bindings = self.bindings.clone();
        bindings.insert(name.to_string(), value);
        Vars { bindings }
    }

    fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }
}

/// Evaluates an expression against `root` with the given bindings.
pub(crate) fn eval(expr: &Value, root: &Value, vars: &Vars) -> EngineResult<Value> {
    match expr {
        Value::String(s) if s.starts_with("$$") => resolve_variable(s, root, vars),
        Value::String(s) if s.starts_with('$') => Ok(resolve_path(root, &s[1..])),
        Value::Array(items) => items
            .iter()
            .map(|item| eval(item, root, vars))
            .collect::<EngineResult<Vec<Value>>>()
            .map(Value::Array),
        Value::Object(map) => {
            if let Some((op, operand)) = single_operator(map) {
                return eval_operator(op, operand, root, vars);
            }
            if let Some(key) = map.keys().find(|k| k.starts_with('$')) {
                return Err(EngineError::MalformedOperation(format!(
                    "operator '{}' must be the only key in its object",
                    key
                )));
            }
            let mut out = Map::with_capacity(map.len());
            for (key, value) in map {
                out.insert(key.clone(), eval(value, root, vars)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Resolves a dotted path against a document; missing yields null.
pub(crate) fn resolve_path(doc: &Value, path: &str) -> Value {
    lookup_path(doc, path).unwrap_or(Value::Null)
}

/// Resolves a dotted path, distinguishing missing (`None`) from null.
pub(crate) fn lookup_path(doc: &Value, path: &str) -> Option<Value> {
    let segments: Vec<&str> = path.split('.').collect();
    descend(doc, &segments)
}

/// Walks one path segment at a time. Descending into an array maps the
/// remaining path over its elements, dropping the ones where it is
/// missing.
fn descend(value: &Value, segments: &[&str]) -> Option<Value> {
    if segments.is_empty() {
        return Some(value.clone());
    }
    match value {
        Value::Object(map) => map
            .get(segments[0])
            .and_then(|child| descend(child, &segments[1..])),
        Value::Array(items) => Some(Value::Array(
            items
                .iter()
                .filter_map(|item| descend(item, segments))
                .collect(),
        )),
        _ => None,
    }
}

pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        _ => true,
    }
}

fn single_operator(map: &Map<String, Value>) -> Option<(&str, &Value)> {
    if map.len() != 1 {
        return None;
    }
    map.iter()
        .next()
        .and_then(|(k, v)| k.starts_with('$').then_some((k.as_str(), v)))
}

fn resolve_variable(reference: &str, root: &Value, vars: &Vars) -> EngineResult<Value> {
    let body = &reference[2..];
    let (name, rest) = match body.split_once('.') {
        Some((name, rest)) => (name, Some(rest)),
        None => (body, None),
    };
    let base = match name {
        "ROOT" | "CURRENT" => root.clone(),
        _ => vars
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UndefinedVariable(name.to_string()))?,
    };
    Ok(match rest {
        Some(path) => resolve_path(&base, path),
        None => base,
    })
}

fn eval_operator(op: &str, operand: &Value, root: &Value, vars: &Vars) -> EngineResult<Value> {
    match op {
        "$literal" => Ok(operand.clone()),

        "$and" => {
            let items = operands(op, operand, 1)?;
            for item in items {
                if !is_truthy(&eval(item, root, vars)?) {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        "$or" => {
            let items = operands(op, operand, 1)?;
            for item in items {
                if is_truthy(&eval(item, root, vars)?) {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "$not" => {
            let inner = match operand {
                Value::Array(items) if items.len() == 1 => &items[0],
                other => other,
            };
            Ok(Value::Bool(!is_truthy(&eval(inner, root, vars)?)))
        }

        "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" => {
            let (a, b) = binary(op, operand)?;
            let a = eval(a, root, vars)?;
            let b = eval(b, root, vars)?;
            let ord = compare_values(&a, &b);
            Ok(Value::Bool(match op {
                "$eq" => ord == Ordering::Equal,
                "$ne" => ord != Ordering::Equal,
                "$gt" => ord == Ordering::Greater,
                "$gte" => ord != Ordering::Less,
                "$lt" => ord == Ordering::Less,
                _ => ord != Ordering::Greater,
            }))
        }

        "$add" | "$multiply" => {
            let items = operands(op, operand, 2)?;
            eval_arith_chain(op, items, root, vars)
        }
        "$subtract" => {
            let (a, b) = binary(op, operand)?;
            eval_arith_chain(op, &[a.clone(), b.clone()], root, vars)
        }
        "$divide" => {
            let (a, b) = binary(op, operand)?;
            let a = eval(a, root, vars)?;
            let b = eval(b, root, vars)?;
            if a.is_null() || b.is_null() {
                return Ok(Value::Null);
            }
            let x = as_f64(op, &a)?;
            let y = as_f64(op, &b)?;
            if y == 0.0 {
                return Err(EngineError::DivisionByZero);
            }
            Ok(Value::from(x / y))
        }
        "$mod" => {
            let (a, b) = binary(op, operand)?;
            let a = eval(a, root, vars)?;
            let b = eval(b, root, vars)?;
            if a.is_null() || b.is_null() {
                return Ok(Value::Null);
            }
            if let (Some(i), Some(j)) = (a.as_i64(), b.as_i64()) {
                if j == 0 {
                    return Err(EngineError::DivisionByZero);
                }
                return Ok(Value::from(i % j));
            }
            let x = as_f64(op, &a)?;
            let y = as_f64(op, &b)?;
            if y == 0.0 {
                return Err(EngineError::DivisionByZero);
            }
            Ok(Value::from(x % y))
        }
        "$abs" => {
            let value = eval(operand, root, vars)?;
            if value.is_null() {
                return Ok(Value::Null);
            }
            if let Some(i) = value.as_i64() {
                if let Some(abs) = i.checked_abs() {
                    return Ok(Value::from(abs));
                }
            }
            Ok(Value::from(as_f64(op, &value)?.abs()))
        }
        "$min" | "$max" => {
            let items = operands(op, operand, 1)?;
            let mut best: Option<Value> = None;
            for item in items {
                let value = eval(item, root, vars)?;
                if value.is_null() {
                    continue;
                }
                best = Some(match best {
                    None => value,
                    Some(current) => {
                        let keep_new = match op {
                            "$min" => compare_values(&value, &current) == Ordering::Less,
                            _ => compare_values(&value, &current) == Ordering::Greater,
                        };
                        if keep_new {
                            value
                        } else {
                            current
                        }
                    }
                });
            }
            Ok(best.unwrap_or(Value::Null))
        }

        "$cond" => {
            let (cond, then, otherwise) = match operand {
                Value::Object(map) => {
                    let cond = map.get("if").ok_or_else(|| invalid(op, "missing 'if'"))?;
                    let then = map.get("then").ok_or_else(|| invalid(op, "missing 'then'"))?;
                    let otherwise =
                        map.get("else").ok_or_else(|| invalid(op, "missing 'else'"))?;
                    (cond, then, otherwise)
                }
                Value::Array(items) if items.len() == 3 => (&items[0], &items[1], &items[2]),
                _ => return Err(invalid(op, "expected {if, then, else} or three operands")),
            };
            if is_truthy(&eval(cond, root, vars)?) {
                eval(then, root, vars)
            } else {
                eval(otherwise, root, vars)
            }
        }
        "$ifNull" => {
            let items = operands(op, operand, 2)?;
            let mut last = Value::Null;
            for item in items {
                last = eval(item, root, vars)?;
                if !last.is_null() {
                    return Ok(last);
                }
            }
            Ok(last)
        }
        "$switch" => {
            let spec = operand
                .as_object()
                .ok_or_else(|| invalid(op, "expected a document"))?;
            let branches = spec
                .get("branches")
                .and_then(Value::as_array)
                .ok_or_else(|| invalid(op, "missing 'branches'"))?;
            for branch in branches {
                let case = branch
                    .get("case")
                    .ok_or_else(|| invalid(op, "branch missing 'case'"))?;
                if is_truthy(&eval(case, root, vars)?) {
                    let then = branch
                        .get("then")
                        .ok_or_else(|| invalid(op, "branch missing 'then'"))?;
                    return eval(then, root, vars);
                }
            }
            match spec.get("default") {
                Some(default) => eval(default, root, vars),
                None => Err(invalid(op, "no branch matched and no default")),
            }
        }
        "$let" => {
            let spec = operand
                .as_object()
                .ok_or_else(|| invalid(op, "expected a document"))?;
            let declared = spec
                .get("vars")
                .and_then(Value::as_object)
                .ok_or_else(|| invalid(op, "missing 'vars'"))?;
            let body = spec.get("in").ok_or_else(|| invalid(op, "missing 'in'"))?;
            let mut scope = vars.clone();
            for (name, value) in declared {
                let bound = eval(value, root, vars)?;
                scope = scope.with(name, bound);
            }
            eval(body, root, &scope)
        }

        "$in" => {
            let (needle, haystack) = binary(op, operand)?;
            let needle = eval(needle, root, vars)?;
            let haystack = eval(haystack, root, vars)?;
            let items = haystack
                .as_array()
                .ok_or_else(|| invalid(op, "second operand must be an array"))?;
            Ok(Value::Bool(items.iter().any(|item| values_equal(item, &needle))))
        }
        "$size" => {
            let value = eval(operand, root, vars)?;
            let items = value
                .as_array()
                .ok_or_else(|| invalid(op, format!("expected an array, found {}", json_type(&value))))?;
            Ok(Value::from(items.len() as i64))
        }
        "$slice" => {
            let items = operands(op, operand, 2)?;
            if items.len() > 3 {
                return Err(invalid(op, "expected two or three operands"));
            }
            let array = eval(&items[0], root, vars)?;
            if array.is_null() {
                return Ok(Value::Null);
            }
            let array = array
                .as_array()
                .ok_or_else(|| invalid(op, "first operand must be an array"))?;
            if items.len() == 2 {
                let count = eval_i64(op, &items[1], root, vars)?;
                let sliced: Vec<Value> = if count >= 0 {
                    array.iter().take(count as usize).cloned().collect()
                } else {
                    let keep = (-count) as usize;
                    let start = array.len().saturating_sub(keep);
                    array[start..].to_vec()
                };
                return Ok(Value::Array(sliced));
            }
            let skip = eval_i64(op, &items[1], root, vars)?;
            let count = eval_i64(op, &items[2], root, vars)?;
            if count <= 0 {
                return Err(invalid(op, "count must be positive"));
            }
            let start = if skip < 0 {
                array.len().saturating_sub((-skip) as usize)
            } else {
                (skip as usize).min(array.len())
            };
            Ok(Value::Array(
                array[start..].iter().take(count as usize).cloned().collect(),
            ))
        }
        "$arrayElemAt" => {
            let (array, index) = binary(op, operand)?;
            let array = eval(array, root, vars)?;
            if array.is_null() {
                return Ok(Value::Null);
            }
            let items = array
                .as_array()
                .ok_or_else(|| invalid(op, "first operand must be an array"))?;
            let index = eval_i64(op, index, root, vars)?;
            let index = if index < 0 {
                items.len() as i64 + index
            } else {
                index
            };
            if index < 0 || index as usize >= items.len() {
                return Ok(Value::Null);
            }
            Ok(items[index as usize].clone())
        }

        "$map" => {
            let spec = comprehension_spec(op, operand)?;
            let input = eval(spec.input, root, vars)?;
            if input.is_null() {
                return Ok(Value::Null);
            }
            let items = input
                .as_array()
                .ok_or_else(|| invalid(op, "input must be an array"))?;
            let body = spec
                .body
                .ok_or_else(|| invalid(op, "missing 'in'"))?;
            items
                .iter()
                .map(|item| eval(body, root, &vars.with(spec.var, item.clone())))
                .collect::<EngineResult<Vec<Value>>>()
                .map(Value::Array)
        }
        "$filter" => {
            let spec = comprehension_spec(op, operand)?;
            let input = eval(spec.input, root, vars)?;
            if input.is_null() {
                return Ok(Value::Null);
            }
            let items = input
                .as_array()
                .ok_or_else(|| invalid(op, "input must be an array"))?;
            let cond = spec
                .cond
                .ok_or_else(|| invalid(op, "missing 'cond'"))?;
            let mut kept = Vec::new();
            for item in items {
                if is_truthy(&eval(cond, root, &vars.with(spec.var, item.clone()))?) {
                    kept.push(item.clone());
                }
            }
            Ok(Value::Array(kept))
        }
        "$reduce" => {
            let spec = operand
                .as_object()
                .ok_or_else(|| invalid(op, "expected a document"))?;
            let input = spec
                .get("input")
                .ok_or_else(|| invalid(op, "missing 'input'"))?;
            let init = spec
                .get("initialValue")
                .ok_or_else(|| invalid(op, "missing 'initialValue'"))?;
            let body = spec.get("in").ok_or_else(|| invalid(op, "missing 'in'"))?;
            let input = eval(input, root, vars)?;
            if input.is_null() {
                return Ok(Value::Null);
            }
            let items = input
                .as_array()
                .ok_or_else(|| invalid(op, "input must be an array"))?;
            let mut acc = eval(init, root, vars)?;
            for item in items {
                let scope = vars.with("value", acc).with("this", item.clone());
                acc = eval(body, root, &scope)?;
            }
            Ok(acc)
        }
        "$mergeObjects" => {
            let items = operands(op, operand, 1)?;
            let mut merged = Map::new();
            for item in items {
                let value = eval(item, root, vars)?;
                match value {
                    Value::Null => {}
                    Value::Object(map) => {
                        for (key, nested) in map {
                            merged.insert(key, nested);
                        }
                    }
                    other => {
                        return Err(invalid(
                            op,
                            format!("expected a document, found {}", json_type(&other)),
                        ))
                    }
                }
            }
            Ok(Value::Object(merged))
        }
        "$sum" => {
            let values = match operand {
                Value::Array(items) => items
                    .iter()
                    .map(|item| eval(item, root, vars))
                    .collect::<EngineResult<Vec<Value>>>()?,
                single => match eval(single, root, vars)? {
                    Value::Array(items) => items,
                    other => vec![other],
                },
            };
            sum_numeric(&values)
        }

        "$concat" => {
            let items = operands(op, operand, 1)?;
            let mut out = String::new();
            for item in items {
                let value = eval(item, root, vars)?;
                match value {
                    Value::Null => return Ok(Value::Null),
                    Value::String(s) => out.push_str(&s),
                    other => {
                        return Err(invalid(
                            op,
                            format!("expected a string, found {}", json_type(&other)),
                        ))
                    }
                }
            }
            Ok(Value::String(out))
        }
        "$toUpper" | "$toLower" => {
            let inner = match operand {
                Value::Array(items) if items.len() == 1 => &items[0],
                other => other,
            };
            let value = eval(inner, root, vars)?;
            let text = match &value {
                Value::Null => String::new(),
                Value::String(s) => s.clone(),
                other => {
                    return Err(invalid(
                        op,
                        format!("expected a string, found {}", json_type(other)),
                    ))
                }
            };
            Ok(Value::String(if op == "$toUpper" {
                text.to_uppercase()
            } else {
                text.to_lowercase()
            }))
        }
        "$regexMatch" => {
            let spec = operand
                .as_object()
                .ok_or_else(|| invalid(op, "expected a document"))?;
            let input = spec
                .get("input")
                .ok_or_else(|| invalid(op, "missing 'input'"))?;
            let input = eval(input, root, vars)?;
            let text = match &input {
                Value::Null => return Ok(Value::Bool(false)),
                Value::String(s) => s.as_str(),
                other => {
                    return Err(invalid(
                        op,
                        format!("input must be a string, found {}", json_type(other)),
                    ))
                }
            };
            let pattern = spec
                .get("regex")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid(op, "missing 'regex'"))?;
            let options = spec.get("options").and_then(Value::as_str).unwrap_or("");
            let mut builder = RegexBuilder::new(pattern);
            for flag in options.chars() {
                match flag {
                    'i' => {
                        builder.case_insensitive(true);
                    }
                    'm' => {
                        builder.multi_line(true);
                    }
                    's' => {
                        builder.dot_matches_new_line(true);
                    }
                    'x' => {
                        builder.ignore_whitespace(true);
                    }
                    other => {
                        return Err(invalid(op, format!("unsupported option '{}'", other)))
                    }
                }
            }
            let re = builder.build().map_err(|err| EngineError::InvalidRegex {
                pattern: pattern.to_string(),
                message: err.to_string(),
            })?;
            Ok(Value::Bool(re.is_match(text)))
        }

        other => Err(EngineError::UnknownOperator(other.to_string())),
    }
}

struct ComprehensionSpec<'a> {
    input: &'a Value,
    var: &'a str,
    body: Option<&'a Value>,
    cond: Option<&'a Value>,
}

fn comprehension_spec<'a>(op: &str, operand: &'a Value) -> EngineResult<ComprehensionSpec<'a>> {
    let spec = operand
        .as_object()
        .ok_or_else(|| invalid(op, "expected a document"))?;
    let input = spec
        .get("input")
        .ok_or_else(|| invalid(op, "missing 'input'"))?;
    let var = spec.get("as").and_then(Value::as_str).unwrap_or("this");
    Ok(ComprehensionSpec {
        input,
        var,
        body: spec.get("in"),
        cond: spec.get("cond"),
    })
}

fn operands<'a>(op: &str, operand: &'a Value, min: usize) -> EngineResult<&'a [Value]> {
    match operand {
        Value::Array(items) if items.len() >= min => Ok(items),
        _ => Err(invalid(
            op,
            format!("expected an array of at least {} operands", min),
        )),
    }
}

fn binary<'a>(op: &str, operand: &'a Value) -> EngineResult<(&'a Value, &'a Value)> {
    match operand {
        Value::Array(items) if items.len() == 2 => Ok((&items[0], &items[1])),
        _ => Err(invalid(op, "expected exactly two operands")),
    }
}

fn eval_i64(op: &str, expr: &Value, root: &Value, vars: &Vars) -> EngineResult<i64> {
    let value = eval(expr, root, vars)?;
    value
        .as_i64()
        .ok_or_else(|| invalid(op, format!("expected an integer, found {}", json_type(&value))))
}

fn eval_arith_chain(op: &str, items: &[Value], root: &Value, vars: &Vars) -> EngineResult<Value> {
    let mut values = Vec::with_capacity(items.len());
    for item in items {
        let value = eval(item, root, vars)?;
        if value.is_null() {
            return Ok(Value::Null);
        }
        as_f64(op, &value)?;
        values.push(value);
    }
    let mut acc = values[0].clone();
    for value in &values[1..] {
        acc = apply_arith(op, &acc, value)?;
    }
    Ok(acc)
}

/// Integer arithmetic is preserved when both operands are integers and
/// the result does not overflow; otherwise the result is a float.
fn apply_arith(op: &str, a: &Value, b: &Value) -> EngineResult<Value> {
    if let (Some(i), Some(j)) = (a.as_i64(), b.as_i64()) {
        let exact = match op {
            "$add" => i.checked_add(j),
            "$subtract" => i.checked_sub(j),
            "$multiply" => i.checked_mul(j),
            _ => None,
        };
        if let Some(value) = exact {
            return Ok(Value::from(value));
        }
    }
    let x = as_f64(op, a)?;
    let y = as_f64(op, b)?;
    let out = match op {
        "$add" => x + y,
        "$subtract" => x - y,
        "$multiply" => x * y,
        _ => return Err(invalid(op, "not an arithmetic operator")),
    };
    Ok(Value::from(out))
}

fn sum_numeric(values: &[Value]) -> EngineResult<Value> {
    let mut acc = Value::from(0);
    for value in values {
        if value.is_number() {
            acc = apply_arith("$add", &acc, value)?;
        }
    }
    Ok(acc)
}

fn as_f64(op: &str, value: &Value) -> EngineResult<f64> {
    value
        .as_f64()
        .ok_or_else(|| invalid(op, format!("expected a number, found {}", json_type(value))))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
