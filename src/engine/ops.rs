//! Pipeline operations over materialized documents.
//!
//! The runner understands the operation set that stages lower to:
//! `$match`, `$set`, `$unset`, `$project`, `$sort`, `$skip`, `$limit`.
//! Anything else is reported as unsupported rather than silently
//! skipped.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::errors::{EngineError, EngineResult};
use super::eval::{eval, is_truthy, lookup_path, resolve_path, Vars};
use super::sort::{compare_values, values_equal};
use super::DocumentSource;
use crate::pipeline::Plan;

/// Runs compiled plans against a document source.
pub struct PlanRunner;

impl PlanRunner {
    /// Materializes the source and applies each plan operation in order.
    pub fn run(source: &dyn DocumentSource, plan: &Plan) -> EngineResult<Vec<Value>> {
        let mut docs = source.documents(plan.attach_frames);
        for op in &plan.ops {
            docs = apply_operation(docs, op)?;
        }
        Ok(docs)
    }
}

fn apply_operation(docs: Vec<Value>, op: &Value) -> EngineResult<Vec<Value>> {
    let map = op.as_object().filter(|m| m.len() == 1).ok_or_else(|| {
        EngineError::MalformedOperation(
            "each operation must be a single-key document".to_string(),
        )
    })?;
    let (name, spec) = match map.iter().next() {
        Some(entry) => entry,
        None => {
            return Err(EngineError::MalformedOperation(
                "empty operation".to_string(),
            ))
        }
    };
    match name.as_str() {
        "$match" => apply_match(docs, spec),
        "$set" => apply_set(docs, spec),
        "$unset" => apply_unset(docs, spec),
        "$project" => apply_project(docs, spec),
        "$sort" => apply_sort(docs, spec),
        "$skip" => {
            let n = non_negative(name, spec)?;
            Ok(docs.into_iter().skip(n).collect())
        }
        "$limit" => {
            let n = non_negative(name, spec)?;
            let mut docs = docs;
            docs.truncate(n);
            Ok(docs)
        }
        other => Err(EngineError::UnsupportedOperation(other.to_string())),
    }
}

fn non_negative(op: &str, spec: &Value) -> EngineResult<usize> {
    spec.as_u64().map(|n| n as usize).ok_or_else(|| {
        EngineError::MalformedOperation(format!("{} expects a non-negative integer", op))
    })
}

// ---------------------------------------------------------------------
// $match
// ---------------------------------------------------------------------

fn apply_match(docs: Vec<Value>, query: &Value) -> EngineResult<Vec<Value>> {
    let query = query.as_object().ok_or_else(|| {
        EngineError::MalformedOperation("$match expects a query document".to_string())
    })?;
    let mut kept = Vec::new();
    for doc in docs {
        if matches_query(&doc, query)? {
            kept.push(doc);
        }
    }
    Ok(kept)
}

/// Evaluates a query document against one document. Top-level keys are
/// combined with AND.
fn matches_query(doc: &Value, query: &Map<String, Value>) -> EngineResult<bool> {
    for (key, condition) in query {
        let hit = match key.as_str() {
            "$expr" => is_truthy(&eval(condition, doc, &Vars::new())?),
            "$and" => matches_clauses(doc, key, condition)?.iter().all(|m| *m),
            "$or" => matches_clauses(doc, key, condition)?.iter().any(|m| *m),
            field if field.starts_with('$') => {
                return Err(EngineError::MalformedOperation(format!(
                    "unsupported query operator '{}'",
                    field
                )))
            }
            field => matches_field(doc, field, condition)?,
        };
        if !hit {
            return Ok(false);
        }
    }
    Ok(true)
}

fn matches_clauses(doc: &Value, op: &str, condition: &Value) -> EngineResult<Vec<bool>> {
    let clauses = condition.as_array().ok_or_else(|| {
        EngineError::MalformedOperation(format!("{} expects an array of queries", op))
    })?;
    clauses
        .iter()
        .map(|clause| {
            let clause = clause.as_object().ok_or_else(|| {
                EngineError::MalformedOperation(format!("{} clauses must be documents", op))
            })?;
            matches_query(doc, clause)
        })
        .collect()
}

fn matches_field(doc: &Value, path: &str, condition: &Value) -> EngineResult<bool> {
    let value = lookup_path(doc, path);
    match condition {
        Value::Object(spec) if spec.keys().any(|k| k.starts_with('$')) => {
            for (op, operand) in spec {
                if !matches_operator(&value, op, operand)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        literal => Ok(literal_matches(&value, literal)),
    }
}

/// Field-level equality: direct equality, array containment, and the
/// null-matches-missing rule.
fn literal_matches(value: &Option<Value>, literal: &Value) -> bool {
    match value {
        None => literal.is_null(),
        Some(v) => {
            if values_equal(v, literal) {
                return true;
            }
            if let Value::Array(items) = v {
                items.iter().any(|item| values_equal(item, literal))
            } else {
                false
            }
        }
    }
}

fn matches_operator(value: &Option<Value>, op: &str, operand: &Value) -> EngineResult<bool> {
    match op {
        "$eq" => Ok(literal_matches(value, operand)),
        "$ne" => Ok(!literal_matches(value, operand)),
        "$gt" | "$gte" | "$lt" | "$lte" => {
            let v = match value {
                Some(v) => v,
                None => return Ok(false),
            };
            let ord = compare_values(v, operand);
            Ok(match op {
                "$gt" => ord == Ordering::Greater,
                "$gte" => ord != Ordering::Less,
                "$lt" => ord == Ordering::Less,
                _ => ord != Ordering::Greater,
            })
        }
        "$in" | "$nin" => {
            let items = operand.as_array().ok_or_else(|| {
                EngineError::MalformedOperation(format!("{} expects an array", op))
            })?;
            let found = items.iter().any(|item| literal_matches(value, item));
            Ok(if op == "$in" { found } else { !found })
        }
        "$exists" => {
            let expected = is_truthy(operand);
            Ok(value.is_some() == expected)
        }
        "$not" => {
            let spec = operand.as_object().filter(|m| m.keys().all(|k| k.starts_with('$')));
            let spec = spec.ok_or_else(|| {
                EngineError::MalformedOperation(
                    "$not expects an operator document".to_string(),
                )
            })?;
            for (inner, inner_operand) in spec {
                if !matches_operator(value, inner, inner_operand)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        other => Err(EngineError::MalformedOperation(format!(
            "unsupported query operator '{}'",
            other
        ))),
    }
}

// ---------------------------------------------------------------------
// $set / $unset
// ---------------------------------------------------------------------

fn apply_set(docs: Vec<Value>, spec: &Value) -> EngineResult<Vec<Value>> {
    let fields = spec.as_object().ok_or_else(|| {
        EngineError::MalformedOperation("$set expects a document".to_string())
    })?;
    docs.into_iter()
        .map(|mut doc| {
            // All expressions see the input document, not each other's
            // updates.
            let mut updates = Vec::with_capacity(fields.len());
            for (path, expr) in fields {
                updates.push((path.as_str(), eval(expr, &doc, &Vars::new())?));
            }
            for (path, value) in updates {
                set_path(&mut doc, path, value);
            }
            Ok(doc)
        })
        .collect()
}

fn set_path(doc: &mut Value, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    set_segments(doc, &segments, &value);
}

/// Dotted sets descend into arrays element-wise and replace non-document
/// intermediates with fresh documents.
fn set_segments(target: &mut Value, segments: &[&str], value: &Value) {
    if let Value::Array(items) = target {
        for item in items {
            set_segments(item, segments, value);
        }
        return;
    }
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    let map = match target.as_object_mut() {
        Some(map) => map,
        None => return,
    };
    if segments.len() == 1 {
        map.insert(segments[0].to_string(), value.clone());
        return;
    }
    let child = map
        .entry(segments[0].to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    set_segments(child, &segments[1..], value);
}

fn apply_unset(mut docs: Vec<Value>, spec: &Value) -> EngineResult<Vec<Value>> {
    let paths: Vec<String> = match spec {
        Value::String(path) => vec![path.clone()],
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str().map(String::from).ok_or_else(|| {
                    EngineError::MalformedOperation(
                        "$unset paths must be strings".to_string(),
                    )
                })
            })
            .collect::<EngineResult<Vec<String>>>()?,
        _ => {
            return Err(EngineError::MalformedOperation(
                "$unset expects a path or an array of paths".to_string(),
            ))
        }
    };
    for doc in &mut docs {
        for path in &paths {
            let segments: Vec<&str> = path.split('.').collect();
            unset_segments(doc, &segments);
        }
    }
    Ok(docs)
}

fn unset_segments(target: &mut Value, segments: &[&str]) {
    if let Value::Array(items) = target {
        for item in items {
            unset_segments(item, segments);
        }
        return;
    }
    let map = match target.as_object_mut() {
        Some(map) => map,
        None => return,
    };
    if segments.len() == 1 {
        map.remove(segments[0]);
        return;
    }
    if let Some(child) = map.get_mut(segments[0]) {
        unset_segments(child, &segments[1..]);
    }
}

// ---------------------------------------------------------------------
// $project
// ---------------------------------------------------------------------

#[derive(Default)]
struct ProjectionNode {
    include_all: bool,
    children: BTreeMap<String, ProjectionNode>,
}

impl ProjectionNode {
    fn insert(&mut self, path: &str) {
        let mut node = self;
        for segment in path.split('.') {
            node = node.children.entry(segment.to_string()).or_default();
        }
        node.include_all = true;
    }
}

fn apply_project(docs: Vec<Value>, spec: &Value) -> EngineResult<Vec<Value>> {
    let fields = spec.as_object().filter(|m| !m.is_empty()).ok_or_else(|| {
        EngineError::MalformedOperation(
            "$project expects a non-empty document".to_string(),
        )
    })?;
    let mut root = ProjectionNode::default();
    for (path, include) in fields {
        if !projection_includes(include) {
            return Err(EngineError::MalformedOperation(format!(
                "exclusion projection for '{}' is not supported",
                path
            )));
        }
        root.insert(path);
    }
    if !fields.contains_key("_id") {
        root.insert("_id");
    }
    Ok(docs
        .into_iter()
        .map(|doc| project_value(&doc, &root).unwrap_or_else(|| Value::Object(Map::new())))
        .collect())
}

fn projection_includes(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        _ => false,
    }
}

/// Rebuilds a value keeping only the projected paths. Arrays project
/// element-wise, preserving structure; scalars under a narrowed path
/// drop out.
fn project_value(value: &Value, node: &ProjectionNode) -> Option<Value> {
    if node.include_all {
        return Some(value.clone());
    }
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, child) in &node.children {
                if let Some(kept) = map.get(key).and_then(|v| project_value(v, child)) {
                    out.insert(key.clone(), kept);
                }
            }
            Some(Value::Object(out))
        }
        Value::Array(items) => Some(Value::Array(
            items
                .iter()
                .filter_map(|item| project_value(item, node))
                .collect(),
        )),
        _ => None,
    }
}

// ---------------------------------------------------------------------
// $sort
// ---------------------------------------------------------------------

fn apply_sort(mut docs: Vec<Value>, spec: &Value) -> EngineResult<Vec<Value>> {
    let keys = spec.as_object().filter(|m| !m.is_empty()).ok_or_else(|| {
        EngineError::MalformedOperation("$sort expects a non-empty document".to_string())
    })?;
    let mut directions = Vec::with_capacity(keys.len());
    for (path, direction) in keys {
        let direction = direction.as_i64().filter(|d| *d == 1 || *d == -1).ok_or_else(|| {
            EngineError::MalformedOperation(format!(
                "sort direction for '{}' must be 1 or -1",
                path
            ))
        })?;
        directions.push((path.clone(), direction));
    }
    // Vec::sort_by is stable, so equal keys keep their input order.
    docs.sort_by(|a, b| {
        for (path, direction) in &directions {
            let ord = compare_values(&resolve_path(a, path), &resolve_path(b, path));
            let ord = if *direction < 0 { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    Ok(docs)
}
