//! Pipeline shapes for field and label filtering.
//!
//! Scalar fields filter by nulling out non-matching values; label lists
//! filter by trimming their elements. Frame-scoped variants rebuild the
//! `frames` array through `$map` so each frame is patched in place.

use serde_json::{json, Value};

use crate::collection::SampleCollection;
use crate::expr::Expr;
use crate::schema::{handle_frame_field, labels_path, FRAMES_PREFIX};

use super::errors::StageResult;

/// Lowers a filter over a scalar (non-label) field.
pub(crate) fn filter_field_pipeline(
    collection: &dyn SampleCollection,
    field: &str,
    filter: &Expr,
    only_matches: bool,
) -> StageResult<Vec<Value>> {
    let (local, is_frame) = handle_frame_field(collection, field);
    if is_frame {
        let cond = filter.compile(Some(&format!("$$frame.{}", local)))?;
        Ok(frames_field_ops(&local, cond, only_matches))
    } else {
        let cond = filter.compile(Some(&format!("${}", local)))?;
        Ok(sample_field_ops(&local, cond, only_matches))
    }
}

/// Lowers a filter over a label field, resolved to its filterable path.
///
/// Container kinds filter their elements; singular kinds null out the
/// whole label document when it does not match.
pub(crate) fn filter_labels_pipeline(
    collection: &dyn SampleCollection,
    field: &str,
    filter: &Expr,
    only_matches: bool,
) -> StageResult<Vec<Value>> {
    let resolved = labels_path(collection, field)?;

    if resolved.is_list {
        let cond = filter.compile(Some("$$this"))?;
        if resolved.is_frame {
            let local = resolved
                .path
                .strip_prefix(FRAMES_PREFIX)
                .unwrap_or(&resolved.path);
            let (container, attr) = match local.rsplit_once('.') {
                Some(parts) => parts,
                None => (local, ""),
            };
            Ok(frames_list_ops(container, attr, cond, only_matches))
        } else {
            Ok(list_ops(&resolved.path, cond, only_matches))
        }
    } else if resolved.is_frame {
        let local = resolved
            .path
            .strip_prefix(FRAMES_PREFIX)
            .unwrap_or(&resolved.path);
        let cond = filter.compile(Some(&format!("$$frame.{}", local)))?;
        Ok(frames_field_ops(local, cond, only_matches))
    } else {
        let cond = filter.compile(Some(&format!("${}", resolved.path)))?;
        Ok(sample_field_ops(&resolved.path, cond, only_matches))
    }
}

/// `$set` the field to itself or null, then optionally drop the nulls.
fn sample_field_ops(field: &str, cond: Value, only_matches: bool) -> Vec<Value> {
    let mut pipeline = vec![json!({"$set": {
        field: {"$cond": {"if": cond, "then": format!("${}", field), "else": null}},
    }})];
    if only_matches {
        pipeline.push(json!({"$match": {
            "$expr": {"$gt": [format!("${}", field), null]},
        }}));
    }
    pipeline
}

/// Frame-scoped variant of [`sample_field_ops`]: patches each frame, and
/// matches samples with at least one surviving value.
fn frames_field_ops(field: &str, cond: Value, only_matches: bool) -> Vec<Value> {
    let mut pipeline = vec![json!({"$set": {"frames": {"$map": {
        "input": "$frames",
        "as": "frame",
        "in": {"$mergeObjects": ["$$frame", {
            field: {"$cond": {
                "if": cond,
                "then": format!("$$frame.{}", field),
                "else": null,
            }},
        }]},
    }}}})];
    if only_matches {
        let survivors = json!({"$reduce": {
            "input": "$frames",
            "initialValue": 0,
            "in": {"$sum": ["$$value", {
                "$cond": [{"$ne": [format!("$$this.{}", field), null]}, 1, 0],
            }]},
        }});
        pipeline.push(json!({"$match": {"$expr": {"$gt": [survivors, 0]}}}));
    }
    pipeline
}

/// `$filter` a labels list in place, then optionally drop samples whose
/// list came out empty.
fn list_ops(path: &str, cond: Value, only_matches: bool) -> Vec<Value> {
    let mut pipeline = vec![json!({"$set": {
        path: {"$filter": {"input": format!("${}", path), "cond": cond}},
    }})];
    if only_matches {
        pipeline.push(json!({"$match": {"$expr": {
            "$gt": [{"$size": {"$ifNull": [format!("${}", path), []]}}, 0],
        }}}));
    }
    pipeline
}

/// Frame-scoped variant of [`list_ops`]: filters the list inside every
/// frame, and matches samples whose frames retain at least one label.
fn frames_list_ops(container: &str, attr: &str, cond: Value, only_matches: bool) -> Vec<Value> {
    let container_ref = format!("$$frame.{}", container);
    let list_ref = format!("{}.{}", container_ref, attr);
    let mut pipeline = vec![json!({"$set": {"frames": {"$map": {
        "input": "$frames",
        "as": "frame",
        "in": {"$mergeObjects": ["$$frame", {
            container: {"$mergeObjects": [container_ref, {
                attr: {"$filter": {"input": list_ref, "cond": cond}},
            }]},
        }]},
    }}}})];
    if only_matches {
        let total = json!({"$reduce": {
            "input": "$frames",
            "initialValue": 0,
            "in": {"$sum": ["$$value", {
                "$size": {"$ifNull": [format!("$$this.{}.{}", container, attr), []]},
            }]},
        }});
        pipeline.push(json!({"$match": {"$expr": {"$gt": [total, 0]}}}));
    }
    pipeline
}
