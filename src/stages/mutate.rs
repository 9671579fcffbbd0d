//! Field mutation pipelines: expression assignment, label remapping,
//! and label-list truncation.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::collection::SampleCollection;
use crate::expr::Expr;
use crate::schema::{
    handle_frame_field, labels_list_path, labels_path, list_segments, PathSegment, FRAMES_PREFIX,
};

use super::errors::StageResult;

/// Lowers an expression assignment to a field path.
///
/// Paths that traverse lists rebuild each element through `$map` and
/// `$mergeObjects`; frame-scoped paths are additionally wrapped in a map
/// over `frames`. With `embedded_root` the expression's bare field
/// references bind to the document containing the target; without it
/// they bind to the target value itself.
pub(crate) fn set_field_pipeline(
    collection: &dyn SampleCollection,
    field: &str,
    expr: &Expr,
    embedded_root: bool,
) -> StageResult<Vec<Value>> {
    let (local, is_frame) = handle_frame_field(collection, field);
    let segments = list_segments(collection, &local, is_frame);

    if is_frame {
        let value = nested_set_value("$$frame", &segments, expr, embedded_root)?;
        let patch = keyed(&segments[0].name, value);
        return Ok(vec![json!({"$set": {"frames": {"$map": {
            "input": "$frames",
            "as": "frame",
            "in": {"$mergeObjects": ["$$frame", patch]},
        }}}})]);
    }

    // The dotted `$set` key runs up to the first list boundary; past it,
    // elements are rebuilt expression-side.
    let boundary = segments[..segments.len().saturating_sub(1)]
        .iter()
        .position(|s| s.is_list);

    match boundary {
        None => {
            let path = join_names(&segments);
            let parent = join_names(&segments[..segments.len() - 1]);
            let prefix = if embedded_root {
                if parent.is_empty() {
                    None
                } else {
                    Some(format!("${}", parent))
                }
            } else {
                Some(format!("${}", path))
            };
            let compiled = expr.compile(prefix.as_deref())?;
            Ok(vec![json!({"$set": { path: compiled }})])
        }
        Some(idx) => {
            let set_key = join_names(&segments[..=idx]);
            let value = nested_set_value("$$this", &segments[idx + 1..], expr, embedded_root)?;
            let patch = keyed(&segments[idx + 1].name, value);
            let mapped = json!({"$map": {
                "input": format!("${}", set_key),
                "in": {"$mergeObjects": ["$$this", patch]},
            }});
            Ok(vec![json!({"$set": { set_key: mapped }})])
        }
    }
}

/// Lowers a label-value remap: the `label` attribute of every label under
/// the field is rewritten through the mapping, unmapped values passing
/// through.
pub(crate) fn map_labels_pipeline(
    collection: &dyn SampleCollection,
    field: &str,
    mapping: &BTreeMap<String, Value>,
) -> StageResult<Vec<Value>> {
    let resolved = labels_path(collection, field)?;
    let target = format!("{}.label", resolved.path);
    let expr = Expr::current().map_values(mapping.clone());
    set_field_pipeline(collection, &target, &expr, false)
}

/// Lowers a label-list truncation to a `$slice`. Negative limits clamp
/// to zero.
pub(crate) fn limit_labels_pipeline(
    collection: &dyn SampleCollection,
    field: &str,
    limit: i64,
) -> StageResult<Vec<Value>> {
    let resolved = labels_list_path(collection, field)?;
    let limit = limit.max(0);

    if resolved.is_frame {
        let local = resolved
            .path
            .strip_prefix(FRAMES_PREFIX)
            .unwrap_or(&resolved.path);
        let (container, attr) = local.rsplit_once('.').unwrap_or((local, ""));
        let container_ref = format!("$$frame.{}", container);
        let sliced = json!({"$slice": [format!("{}.{}", container_ref, attr), limit]});
        let patch = keyed(
            container,
            json!({"$mergeObjects": [container_ref, keyed(attr, sliced)]}),
        );
        return Ok(vec![json!({"$set": {"frames": {"$map": {
            "input": "$frames",
            "as": "frame",
            "in": {"$mergeObjects": ["$$frame", patch]},
        }}}})]);
    }

    let path = resolved.path;
    let input = format!("${}", path);
    Ok(vec![json!({"$set": { path: {"$slice": [input, limit]} }})])
}

/// Builds the replacement value for `segments[0]` as referenced from
/// `context`.
fn nested_set_value(
    context: &str,
    segments: &[PathSegment],
    expr: &Expr,
    embedded_root: bool,
) -> StageResult<Value> {
    let seg = &segments[0];
    let self_ref = format!("{}.{}", context, seg.name);

    if segments.len() == 1 {
        let prefix = if embedded_root {
            context.to_string()
        } else {
            self_ref
        };
        return Ok(expr.compile(Some(&prefix))?);
    }

    if seg.is_list {
        let value = nested_set_value("$$this", &segments[1..], expr, embedded_root)?;
        let patch = keyed(&segments[1].name, value);
        Ok(json!({"$map": {
            "input": self_ref,
            "in": {"$mergeObjects": ["$$this", patch]},
        }}))
    } else {
        let value = nested_set_value(&self_ref, &segments[1..], expr, embedded_root)?;
        let patch = keyed(&segments[1].name, value);
        Ok(json!({"$mergeObjects": [self_ref, patch]}))
    }
}

fn join_names(segments: &[PathSegment]) -> String {
    segments
        .iter()
        .map(|s| s.name.as_str())
        .collect::<Vec<&str>>()
        .join(".")
}

fn keyed(key: &str, value: Value) -> Value {
    let mut map = Map::with_capacity(1);
    map.insert(key.to_string(), value);
    Value::Object(map)
}
