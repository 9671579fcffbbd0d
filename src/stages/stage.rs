//! The stage catalog: one tagged union covering every view stage, with
//! validation, frame detection, and lowering to primitive operations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::collection::SampleCollection;
use crate::expr::{mentions_frames, Expr};
use crate::schema::{
    is_frame_field, labels_list_path, labels_path, validate_fields_exist, LabelKind, MediaType,
    SchemaError,
};

use super::errors::{StageError, StageResult};
use super::fields::{
    drop_scope, exclude_fields_pipeline, keep_scope, select_fields_pipeline, SchemaScope,
};
use super::filter::{filter_field_pipeline, filter_labels_pipeline};
use super::mutate::{limit_labels_pipeline, map_labels_pipeline, set_field_pipeline};
use super::objects::{
    exclude_objects_pipeline, group_objects, select_objects_pipeline, validate_id, ObjectRef,
};
use super::sample::{
    draw_multiplier, limit_pipeline, shuffle_pipeline, skip_pipeline, sort_by_expr_pipeline,
    sort_by_field_pipeline, take_pipeline,
};

/// The argument to a `Match` stage: a typed expression or a raw query
/// document handed through unvalidated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchFilter {
    Expr(Expr),
    Query(Value),
}

/// The key of a `SortBy` stage: a stored field path or an expression
/// materialized into a scratch field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortTarget {
    Field(String),
    Expr(Expr),
}

/// A single view stage.
///
/// Stages are immutable values: construct one, validate it against a
/// collection, compile it to primitive operations. Randomized stages
/// draw their multiplier at construction so every later compile of the
/// same stage is deterministic.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Exclude {
        sample_ids: Vec<String>,
    },
    ExcludeFields {
        field_names: Vec<String>,
    },
    ExcludeObjects {
        objects: Vec<ObjectRef>,
    },
    Exists {
        field: String,
        expect: bool,
    },
    FilterField {
        field: String,
        filter: Expr,
        only_matches: bool,
    },
    FilterLabels {
        field: String,
        filter: Expr,
        only_matches: bool,
        /// Container kind required by the deprecated filter aliases.
        pinned: Option<LabelKind>,
    },
    Limit {
        limit: i64,
    },
    LimitLabels {
        field: String,
        limit: i64,
    },
    MapLabels {
        field: String,
        map: BTreeMap<String, Value>,
    },
    Match {
        filter: MatchFilter,
    },
    MatchTags {
        tags: Vec<String>,
    },
    Mongo {
        pipeline: Vec<Value>,
    },
    Select {
        sample_ids: Vec<String>,
    },
    SelectFields {
        field_names: Vec<String>,
    },
    SelectObjects {
        objects: Vec<ObjectRef>,
    },
    SetField {
        field: String,
        expr: Expr,
    },
    Shuffle {
        seed: Option<u64>,
        multiplier: i64,
    },
    Skip {
        skip: i64,
    },
    SortBy {
        sort_by: SortTarget,
        reverse: bool,
    },
    Take {
        size: i64,
        seed: Option<u64>,
        multiplier: i64,
    },
}

impl Stage {
    pub fn exclude<I, S>(sample_ids: I) -> StageResult<Stage>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Stage::Exclude {
            sample_ids: collect_ids(sample_ids)?,
        })
    }

    pub fn exclude_fields<I, S>(field_names: I) -> Stage
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Stage::ExcludeFields {
            field_names: field_names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn exclude_objects(objects: Vec<ObjectRef>) -> StageResult<Stage> {
        group_objects(&objects)?;
        Ok(Stage::ExcludeObjects { objects })
    }

    pub fn exists(field: impl Into<String>, expect: bool) -> Stage {
        Stage::Exists {
            field: field.into(),
            expect,
        }
    }

    pub fn filter_field(field: impl Into<String>, filter: Expr, only_matches: bool) -> Stage {
        Stage::FilterField {
            field: field.into(),
            filter,
            only_matches,
        }
    }

    pub fn filter_labels(field: impl Into<String>, filter: Expr, only_matches: bool) -> Stage {
        Stage::FilterLabels {
            field: field.into(),
            filter,
            only_matches,
            pinned: None,
        }
    }

    /// Deprecated alias: `filter_labels` pinned to `Classifications`.
    pub fn filter_classifications(
        field: impl Into<String>,
        filter: Expr,
        only_matches: bool,
    ) -> Stage {
        Stage::pinned_filter(field, filter, only_matches, LabelKind::Classifications)
    }

    /// Deprecated alias: `filter_labels` pinned to `Detections`.
    pub fn filter_detections(field: impl Into<String>, filter: Expr, only_matches: bool) -> Stage {
        Stage::pinned_filter(field, filter, only_matches, LabelKind::Detections)
    }

    /// Deprecated alias: `filter_labels` pinned to `Polylines`.
    pub fn filter_polylines(field: impl Into<String>, filter: Expr, only_matches: bool) -> Stage {
        Stage::pinned_filter(field, filter, only_matches, LabelKind::Polylines)
    }

    /// Deprecated alias: `filter_labels` pinned to `Keypoints`.
    pub fn filter_keypoints(field: impl Into<String>, filter: Expr, only_matches: bool) -> Stage {
        Stage::pinned_filter(field, filter, only_matches, LabelKind::Keypoints)
    }

    fn pinned_filter(
        field: impl Into<String>,
        filter: Expr,
        only_matches: bool,
        kind: LabelKind,
    ) -> Stage {
        Stage::FilterLabels {
            field: field.into(),
            filter,
            only_matches,
            pinned: Some(kind),
        }
    }

    pub fn limit(limit: i64) -> Stage {
        Stage::Limit { limit }
    }

    pub fn limit_labels(field: impl Into<String>, limit: i64) -> Stage {
        Stage::LimitLabels {
            field: field.into(),
            limit,
        }
    }

    pub fn map_labels<I, K, V>(field: impl Into<String>, map: I) -> Stage
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Stage::MapLabels {
            field: field.into(),
            map: map
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn match_expr(expr: Expr) -> Stage {
        Stage::Match {
            filter: MatchFilter::Expr(expr),
        }
    }

    pub fn match_query(query: Value) -> Stage {
        Stage::Match {
            filter: MatchFilter::Query(query),
        }
    }

    pub fn match_tags<I, S>(tags: I) -> Stage
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Stage::MatchTags {
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    pub fn mongo(pipeline: Vec<Value>) -> Stage {
        Stage::Mongo { pipeline }
    }

    pub fn select<I, S>(sample_ids: I) -> StageResult<Stage>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Stage::Select {
            sample_ids: collect_ids(sample_ids)?,
        })
    }

    pub fn select_fields<I, S>(field_names: I) -> Stage
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Stage::SelectFields {
            field_names: field_names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn select_objects(objects: Vec<ObjectRef>) -> StageResult<Stage> {
        group_objects(&objects)?;
        Ok(Stage::SelectObjects { objects })
    }

    pub fn set_field(field: impl Into<String>, expr: Expr) -> Stage {
        Stage::SetField {
            field: field.into(),
            expr,
        }
    }

    pub fn shuffle(seed: Option<u64>) -> Stage {
        Stage::Shuffle {
            seed,
            multiplier: draw_multiplier(seed),
        }
    }

    pub fn skip(skip: i64) -> Stage {
        Stage::Skip { skip }
    }

    pub fn sort_by(field: impl Into<String>, reverse: bool) -> Stage {
        Stage::SortBy {
            sort_by: SortTarget::Field(field.into()),
            reverse,
        }
    }

    pub fn sort_by_expr(expr: Expr, reverse: bool) -> Stage {
        Stage::SortBy {
            sort_by: SortTarget::Expr(expr),
            reverse,
        }
    }

    pub fn take(size: i64, seed: Option<u64>) -> Stage {
        Stage::Take {
            size,
            seed,
            multiplier: draw_multiplier(seed),
        }
    }

    /// The serialized kind tag. Pinned filters keep their deprecated
    /// alias names so stored views round-trip unchanged.
    pub fn kind(&self) -> &'static str {
        match self {
            Stage::Exclude { .. } => "exclude",
            Stage::ExcludeFields { .. } => "exclude_fields",
            Stage::ExcludeObjects { .. } => "exclude_objects",
            Stage::Exists { .. } => "exists",
            Stage::FilterField { .. } => "filter_field",
            Stage::FilterLabels { pinned, .. } => match pinned {
                Some(LabelKind::Classifications) => "filter_classifications",
                Some(LabelKind::Detections) => "filter_detections",
                Some(LabelKind::Polylines) => "filter_polylines",
                Some(LabelKind::Keypoints) => "filter_keypoints",
                _ => "filter_labels",
            },
            Stage::Limit { .. } => "limit",
            Stage::LimitLabels { .. } => "limit_labels",
            Stage::MapLabels { .. } => "map_labels",
            Stage::Match { .. } => "match",
            Stage::MatchTags { .. } => "match_tags",
            Stage::Mongo { .. } => "mongo",
            Stage::Select { .. } => "select",
            Stage::SelectFields { .. } => "select_fields",
            Stage::SelectObjects { .. } => "select_objects",
            Stage::SetField { .. } => "set_field",
            Stage::Shuffle { .. } => "shuffle",
            Stage::Skip { .. } => "skip",
            Stage::SortBy { .. } => "sort_by",
            Stage::Take { .. } => "take",
        }
    }

    /// Checks the stage's parameters against the collection's schema.
    /// Errors here are eager: nothing is deferred to execution.
    pub fn validate(&self, collection: &dyn SampleCollection) -> StageResult<()> {
        match self {
            Stage::Exclude { .. }
            | Stage::Select { .. }
            | Stage::Limit { .. }
            | Stage::Skip { .. }
            | Stage::Match { .. }
            | Stage::MatchTags { .. }
            | Stage::Mongo { .. }
            | Stage::Shuffle { .. }
            | Stage::Take { .. } => Ok(()),
            Stage::ExcludeFields { field_names } => {
                exclude_fields_pipeline(collection, field_names).map(|_| ())
            }
            Stage::SelectFields { field_names } => {
                select_fields_pipeline(collection, field_names).map(|_| ())
            }
            Stage::ExcludeObjects { objects } | Stage::SelectObjects { objects } => {
                let grouped = group_objects(objects)?;
                let names: Vec<String> = grouped.fields.into_keys().collect();
                Ok(validate_fields_exist(collection, &names)?)
            }
            Stage::Exists { field, .. } => Ok(validate_fields_exist(collection, &[field])?),
            Stage::FilterField { field, .. } => {
                if field == "filepath" {
                    return Err(StageError::FilterRequiredField(field.clone()));
                }
                Ok(validate_fields_exist(collection, &[field])?)
            }
            Stage::FilterLabels { field, pinned, .. } => {
                let resolved = labels_path(collection, field)?;
                if let Some(expected) = pinned {
                    if resolved.kind != *expected {
                        return Err(StageError::LabelKindMismatch {
                            field: field.clone(),
                            expected: expected.type_name().to_string(),
                            found: resolved.kind.type_name().to_string(),
                        });
                    }
                }
                Ok(())
            }
            Stage::LimitLabels { field, .. } => {
                labels_list_path(collection, field)?;
                Ok(())
            }
            Stage::MapLabels { field, .. } => {
                labels_path(collection, field)?;
                Ok(())
            }
            Stage::SetField { field, .. } => Ok(validate_fields_exist(collection, &[field])?),
            Stage::SortBy { sort_by, .. } => {
                if let SortTarget::Field(field) = sort_by {
                    validate_fields_exist(collection, &[field])?;
                    collection.create_index(field);
                }
                Ok(())
            }
        }
    }

    /// Whether executing this stage requires frames attached to the
    /// documents. Always false for non-video collections.
    pub fn needs_frames(&self, collection: &dyn SampleCollection) -> StageResult<bool> {
        if collection.media_type() != MediaType::Video {
            return Ok(false);
        }
        let needed = match self {
            Stage::Exclude { .. }
            | Stage::Select { .. }
            | Stage::Limit { .. }
            | Stage::Skip { .. }
            | Stage::MatchTags { .. }
            | Stage::Shuffle { .. }
            | Stage::Take { .. } => false,
            // Selection projects the default frame paths on video.
            Stage::SelectFields { .. } | Stage::SelectObjects { .. } => true,
            Stage::ExcludeFields { field_names } => field_names
                .iter()
                .any(|name| is_frame_field(collection, name)),
            Stage::ExcludeObjects { objects } => objects
                .iter()
                .any(|object| is_frame_field(collection, &object.field)),
            Stage::Exists { field, .. }
            | Stage::LimitLabels { field, .. }
            | Stage::MapLabels { field, .. } => is_frame_field(collection, field),
            Stage::FilterField { field, filter, .. }
            | Stage::FilterLabels { field, filter, .. } => {
                is_frame_field(collection, field) || expr_mentions_frames(filter)?
            }
            Stage::SetField { field, expr } => {
                is_frame_field(collection, field) || expr_mentions_frames(expr)?
            }
            Stage::Match { filter } => match filter {
                MatchFilter::Expr(expr) => expr_mentions_frames(expr)?,
                MatchFilter::Query(query) => value_mentions_frames(query),
            },
            Stage::Mongo { pipeline } => pipeline.iter().any(value_mentions_frames),
            Stage::SortBy { sort_by, .. } => match sort_by {
                SortTarget::Field(field) => is_frame_field(collection, field),
                SortTarget::Expr(expr) => expr_mentions_frames(expr)?,
            },
        };
        Ok(needed)
    }

    /// Lowers the stage to primitive operations. Assumes `validate`
    /// succeeded, but re-resolves schema facts rather than caching them.
    pub fn compile(&self, collection: &dyn SampleCollection) -> StageResult<Vec<Value>> {
        match self {
            Stage::Exclude { sample_ids } => Ok(vec![json!({"$match": {
                "_id": {"$not": {"$in": sample_ids}},
            }})]),
            Stage::Select { sample_ids } => Ok(vec![json!({"$match": {
                "_id": {"$in": sample_ids},
            }})]),
            Stage::ExcludeFields { field_names } => {
                exclude_fields_pipeline(collection, field_names)
            }
            Stage::SelectFields { field_names } => select_fields_pipeline(collection, field_names),
            Stage::ExcludeObjects { objects } => exclude_objects_pipeline(collection, objects),
            Stage::SelectObjects { objects } => select_objects_pipeline(collection, objects),
            Stage::Exists { field, expect } => {
                let test = crate::expr::field(field.as_str()).exists(*expect);
                Ok(vec![json!({"$match": {"$expr": test.compile(None)?}})])
            }
            Stage::FilterField {
                field,
                filter,
                only_matches,
            } => filter_field_pipeline(collection, field, filter, *only_matches),
            Stage::FilterLabels {
                field,
                filter,
                only_matches,
                ..
            } => filter_labels_pipeline(collection, field, filter, *only_matches),
            Stage::Limit { limit } => Ok(limit_pipeline(*limit)),
            Stage::LimitLabels { field, limit } => limit_labels_pipeline(collection, field, *limit),
            Stage::MapLabels { field, map } => map_labels_pipeline(collection, field, map),
            Stage::Match { filter } => match filter {
                MatchFilter::Expr(expr) => {
                    Ok(vec![json!({"$match": {"$expr": expr.compile(None)?}})])
                }
                MatchFilter::Query(query) => Ok(vec![json!({"$match": query})]),
            },
            Stage::MatchTags { tags } => Ok(vec![json!({"$match": {"tags": {"$in": tags}}})]),
            Stage::Mongo { pipeline } => Ok(pipeline.clone()),
            Stage::SetField { field, expr } => set_field_pipeline(collection, field, expr, true),
            Stage::Shuffle { multiplier, .. } => Ok(shuffle_pipeline(*multiplier)),
            Stage::Skip { skip } => Ok(skip_pipeline(*skip)),
            Stage::SortBy { sort_by, reverse } => match sort_by {
                SortTarget::Field(field) => Ok(sort_by_field_pipeline(field, *reverse)),
                SortTarget::Expr(expr) => sort_by_expr_pipeline(expr, *reverse),
            },
            Stage::Take {
                size, multiplier, ..
            } => Ok(take_pipeline(*size, *multiplier)),
        }
    }

    /// The schema narrowing this stage applies to later stages, if any.
    pub fn schema_scope(
        &self,
        collection: &dyn SampleCollection,
    ) -> StageResult<Option<SchemaScope>> {
        match self {
            Stage::SelectFields { field_names } => {
                Ok(Some(keep_scope(collection, field_names)?))
            }
            Stage::SelectObjects { objects } => {
                let grouped = group_objects(objects)?;
                let names: Vec<String> = grouped.fields.into_keys().collect();
                Ok(Some(keep_scope(collection, &names)?))
            }
            Stage::ExcludeFields { field_names } => {
                Ok(Some(drop_scope(collection, field_names)))
            }
            _ => Ok(None),
        }
    }

    /// Root fields this stage keeps, or `None` when it does not select.
    pub fn selected_paths(
        &self,
        collection: &dyn SampleCollection,
        frames: bool,
    ) -> StageResult<Option<Vec<String>>> {
        match self.schema_scope(collection)? {
            Some(SchemaScope::Keep { sample, frames: frame_roots }) => {
                let roots = if frames { frame_roots } else { sample };
                Ok(Some(roots.into_iter().collect()))
            }
            _ => Ok(None),
        }
    }

    /// Root fields this stage drops, or `None` when it does not exclude.
    pub fn excluded_paths(
        &self,
        collection: &dyn SampleCollection,
        frames: bool,
    ) -> StageResult<Option<Vec<String>>> {
        match self.schema_scope(collection)? {
            Some(SchemaScope::Drop { sample, frames: frame_roots }) => {
                let roots = if frames { frame_roots } else { sample };
                Ok(Some(roots.into_iter().collect()))
            }
            _ => Ok(None),
        }
    }

    /// Label-list paths this stage filters in place.
    pub fn filtered_list_paths(
        &self,
        collection: &dyn SampleCollection,
    ) -> StageResult<Vec<String>> {
        match self {
            Stage::FilterLabels { field, .. } => {
                let resolved = labels_path(collection, field)?;
                if resolved.is_list {
                    Ok(vec![resolved.path])
                } else {
                    Ok(Vec::new())
                }
            }
            Stage::LimitLabels { field, .. } => {
                Ok(vec![labels_list_path(collection, field)?.path])
            }
            Stage::SelectObjects { objects } | Stage::ExcludeObjects { objects } => {
                let grouped = group_objects(objects)?;
                let mut paths = Vec::new();
                for name in grouped.fields.keys() {
                    match labels_path(collection, name) {
                        Ok(resolved) if resolved.is_list => paths.push(resolved.path),
                        Ok(_) => {}
                        Err(SchemaError::NotALabelField { .. }) => {}
                        Err(err) => return Err(err.into()),
                    }
                }
                Ok(paths)
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Ordered `(name, value)` parameter pairs for serialization.
    pub fn params(&self) -> Vec<(&'static str, Value)> {
        match self {
            Stage::Exclude { sample_ids } => vec![("sample_ids", json!(sample_ids))],
            Stage::ExcludeFields { field_names } => vec![("field_names", json!(field_names))],
            Stage::ExcludeObjects { objects } => vec![("objects", json!(objects))],
            Stage::Exists { field, expect } => {
                vec![("field", json!(field)), ("bool", json!(expect))]
            }
            Stage::FilterField {
                field,
                filter,
                only_matches,
            }
            | Stage::FilterLabels {
                field,
                filter,
                only_matches,
                ..
            } => vec![
                ("field", json!(field)),
                ("filter", json!(filter)),
                ("only_matches", json!(only_matches)),
            ],
            Stage::Limit { limit } => vec![("limit", json!(limit))],
            Stage::LimitLabels { field, limit } => {
                vec![("field", json!(field)), ("limit", json!(limit))]
            }
            Stage::MapLabels { field, map } => {
                vec![("field", json!(field)), ("map", json!(map))]
            }
            Stage::Match { filter } => vec![("filter", json!(filter))],
            Stage::MatchTags { tags } => vec![("tags", json!(tags))],
            Stage::Mongo { pipeline } => vec![("pipeline", json!(pipeline))],
            Stage::Select { sample_ids } => vec![("sample_ids", json!(sample_ids))],
            Stage::SelectFields { field_names } => vec![("field_names", json!(field_names))],
            Stage::SelectObjects { objects } => vec![("objects", json!(objects))],
            Stage::SetField { field, expr } => {
                vec![("field", json!(field)), ("expr", json!(expr))]
            }
            Stage::Shuffle { seed, multiplier } => vec![
                ("seed", json!(seed)),
                ("multiplier", json!(multiplier)),
            ],
            Stage::Skip { skip } => vec![("skip", json!(skip))],
            Stage::SortBy { sort_by, reverse } => vec![
                ("sort_by", json!(sort_by)),
                ("reverse", json!(reverse)),
            ],
            Stage::Take {
                size,
                seed,
                multiplier,
            } => vec![
                ("size", json!(size)),
                ("seed", json!(seed)),
                ("multiplier", json!(multiplier)),
            ],
        }
    }
}

fn collect_ids<I, S>(ids: I) -> StageResult<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
    for id in &ids {
        validate_id(id)?;
    }
    Ok(ids)
}

fn expr_mentions_frames(expr: &Expr) -> StageResult<bool> {
    Ok(mentions_frames(&expr.compile(None)?))
}

/// Recursive scan of a raw query or pipeline document for references to
/// the frames array, by key prefix or by field reference.
fn value_mentions_frames(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.iter().any(|(key, nested)| {
            key == "frames" || key.starts_with("frames.") || value_mentions_frames(nested)
        }),
        Value::Array(items) => items.iter().any(value_mentions_frames),
        Value::String(text) => text == "$frames" || text.starts_with("$frames."),
        _ => false,
    }
}
