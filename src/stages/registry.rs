//! Explicit registry mapping serialized stage kinds to decoders.
//!
//! Built once at startup with [`StageRegistry::builtin`] and read-only
//! afterwards; deserialization never consults global state.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::expr::Expr;
use crate::schema::LabelKind;

use super::errors::{StageError, StageResult};
use super::objects::ObjectRef;
use super::sample::draw_multiplier;
use super::stage::{MatchFilter, SortTarget, Stage};

/// Decodes one stage from its named parameters.
pub type StageDecoder = fn(&ParamTable) -> StageResult<Stage>;

/// The named parameters of one serialized stage.
pub struct ParamTable {
    kind: String,
    values: BTreeMap<String, Value>,
}

impl ParamTable {
    fn require(&self, name: &str) -> StageResult<&Value> {
        self.values.get(name).ok_or_else(|| StageError::MissingParameter {
            kind: self.kind.clone(),
            name: name.to_string(),
        })
    }

    /// Decodes a required parameter into its typed form.
    pub fn parse<T: DeserializeOwned>(&self, name: &str) -> StageResult<T> {
        serde_json::from_value(self.require(name)?.clone())
            .map_err(|err| self.invalid(name, err.to_string()))
    }

    /// Decodes an optional parameter; absent or null reads as `None`.
    pub fn parse_opt<T: DeserializeOwned>(&self, name: &str) -> StageResult<Option<T>> {
        match self.values.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|err| self.invalid(name, err.to_string())),
        }
    }

    fn invalid(&self, name: &str, detail: String) -> StageError {
        StageError::InvalidParameter {
            kind: self.kind.clone(),
            name: name.to_string(),
            detail,
        }
    }
}

/// Maps serialized stage kinds to their decoders.
pub struct StageRegistry {
    decoders: BTreeMap<String, StageDecoder>,
}

impl StageRegistry {
    /// An empty registry. Useful only as a base for custom stages.
    pub fn new() -> StageRegistry {
        StageRegistry {
            decoders: BTreeMap::new(),
        }
    }

    /// The registry covering every built-in stage kind, including the
    /// deprecated filter aliases.
    pub fn builtin() -> StageRegistry {
        let mut registry = StageRegistry::new();
        registry.register("exclude", decode_exclude);
        registry.register("exclude_fields", decode_exclude_fields);
        registry.register("exclude_objects", decode_exclude_objects);
        registry.register("exists", decode_exists);
        registry.register("filter_field", decode_filter_field);
        registry.register("filter_labels", decode_filter_labels);
        registry.register("filter_classifications", decode_filter_classifications);
        registry.register("filter_detections", decode_filter_detections);
        registry.register("filter_polylines", decode_filter_polylines);
        registry.register("filter_keypoints", decode_filter_keypoints);
        registry.register("limit", decode_limit);
        registry.register("limit_labels", decode_limit_labels);
        registry.register("map_labels", decode_map_labels);
        registry.register("match", decode_match);
        registry.register("match_tags", decode_match_tags);
        registry.register("mongo", decode_mongo);
        registry.register("select", decode_select);
        registry.register("select_fields", decode_select_fields);
        registry.register("select_objects", decode_select_objects);
        registry.register("set_field", decode_set_field);
        registry.register("shuffle", decode_shuffle);
        registry.register("skip", decode_skip);
        registry.register("sort_by", decode_sort_by);
        registry.register("take", decode_take);
        registry
    }

    pub fn register(&mut self, kind: &str, decoder: StageDecoder) {
        self.decoders.insert(kind.to_string(), decoder);
    }

    /// The registered kind names, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        self.decoders.keys().map(String::as_str).collect()
    }

    /// Rebuilds a stage from its serialized document, returning the
    /// stage and its stored uuid when present.
    pub fn decode(&self, value: &Value) -> StageResult<(Stage, Option<String>)> {
        let doc = value
            .as_object()
            .ok_or_else(|| StageError::MalformedStage("expected a JSON object".to_string()))?;
        let kind = doc
            .get("kind")
            .and_then(Value::as_str)
            .ok_or_else(|| StageError::MalformedStage("missing 'kind'".to_string()))?;
        let decoder = self
            .decoders
            .get(kind)
            .ok_or_else(|| StageError::UnknownStageKind(kind.to_string()))?;

        let uuid = doc.get("uuid").and_then(Value::as_str).map(str::to_string);

        let mut values = BTreeMap::new();
        if let Some(params) = doc.get("params") {
            let entries = params.as_array().ok_or_else(|| {
                StageError::MalformedStage("'params' must be an array".to_string())
            })?;
            for entry in entries {
                let pair = entry
                    .as_array()
                    .filter(|pair| pair.len() == 2)
                    .and_then(|pair| Some((pair[0].as_str()?, &pair[1])));
                let (name, value) = pair.ok_or_else(|| {
                    StageError::MalformedStage(
                        "parameters must be [name, value] pairs".to_string(),
                    )
                })?;
                values.insert(name.to_string(), value.clone());
            }
        }

        let table = ParamTable {
            kind: kind.to_string(),
            values,
        };
        let stage = decoder(&table)?;
        Ok((stage, uuid))
    }
}

impl Default for StageRegistry {
    fn default() -> StageRegistry {
        StageRegistry::builtin()
    }
}

fn decode_exclude(params: &ParamTable) -> StageResult<Stage> {
    Stage::exclude(params.parse::<Vec<String>>("sample_ids")?)
}

fn decode_exclude_fields(params: &ParamTable) -> StageResult<Stage> {
    Ok(Stage::exclude_fields(
        params.parse::<Vec<String>>("field_names")?,
    ))
}

fn decode_exclude_objects(params: &ParamTable) -> StageResult<Stage> {
    Stage::exclude_objects(params.parse::<Vec<ObjectRef>>("objects")?)
}

fn decode_exists(params: &ParamTable) -> StageResult<Stage> {
    Ok(Stage::exists(
        params.parse::<String>("field")?,
        params.parse::<bool>("bool")?,
    ))
}

fn decode_filter_field(params: &ParamTable) -> StageResult<Stage> {
    Ok(Stage::filter_field(
        params.parse::<String>("field")?,
        params.parse::<Expr>("filter")?,
        params.parse::<bool>("only_matches")?,
    ))
}

fn decode_filter_labels(params: &ParamTable) -> StageResult<Stage> {
    Ok(Stage::filter_labels(
        params.parse::<String>("field")?,
        params.parse::<Expr>("filter")?,
        params.parse::<bool>("only_matches")?,
    ))
}

fn decode_pinned_filter(params: &ParamTable, kind: LabelKind) -> StageResult<Stage> {
    let stage = decode_filter_labels(params)?;
    match stage {
        Stage::FilterLabels {
            field,
            filter,
            only_matches,
            ..
        } => Ok(Stage::FilterLabels {
            field,
            filter,
            only_matches,
            pinned: Some(kind),
        }),
        other => Ok(other),
    }
}

fn decode_filter_classifications(params: &ParamTable) -> StageResult<Stage> {
    decode_pinned_filter(params, LabelKind::Classifications)
}

fn decode_filter_detections(params: &ParamTable) -> StageResult<Stage> {
    decode_pinned_filter(params, LabelKind::Detections)
}

fn decode_filter_polylines(params: &ParamTable) -> StageResult<Stage> {
    decode_pinned_filter(params, LabelKind::Polylines)
}

fn decode_filter_keypoints(params: &ParamTable) -> StageResult<Stage> {
    decode_pinned_filter(params, LabelKind::Keypoints)
}

fn decode_limit(params: &ParamTable) -> StageResult<Stage> {
    Ok(Stage::limit(params.parse::<i64>("limit")?))
}

fn decode_limit_labels(params: &ParamTable) -> StageResult<Stage> {
    Ok(Stage::limit_labels(
        params.parse::<String>("field")?,
        params.parse::<i64>("limit")?,
    ))
}

fn decode_map_labels(params: &ParamTable) -> StageResult<Stage> {
    Ok(Stage::map_labels(
        params.parse::<String>("field")?,
        params.parse::<BTreeMap<String, Value>>("map")?,
    ))
}

fn decode_match(params: &ParamTable) -> StageResult<Stage> {
    let filter = params.parse::<MatchFilter>("filter")?;
    Ok(Stage::Match { filter })
}

fn decode_match_tags(params: &ParamTable) -> StageResult<Stage> {
    Ok(Stage::match_tags(params.parse::<Vec<String>>("tags")?))
}

fn decode_mongo(params: &ParamTable) -> StageResult<Stage> {
    Ok(Stage::mongo(params.parse::<Vec<Value>>("pipeline")?))
}

fn decode_select(params: &ParamTable) -> StageResult<Stage> {
    Stage::select(params.parse::<Vec<String>>("sample_ids")?)
}

fn decode_select_fields(params: &ParamTable) -> StageResult<Stage> {
    Ok(Stage::select_fields(
        params.parse::<Vec<String>>("field_names")?,
    ))
}

fn decode_select_objects(params: &ParamTable) -> StageResult<Stage> {
    Stage::select_objects(params.parse::<Vec<ObjectRef>>("objects")?)
}

fn decode_set_field(params: &ParamTable) -> StageResult<Stage> {
    Ok(Stage::set_field(
        params.parse::<String>("field")?,
        params.parse::<Expr>("expr")?,
    ))
}

fn decode_shuffle(params: &ParamTable) -> StageResult<Stage> {
    let seed = params.parse_opt::<u64>("seed")?;
    let multiplier = params.parse_opt::<i64>("multiplier")?;
    Ok(Stage::Shuffle {
        seed,
        multiplier: multiplier.unwrap_or_else(|| draw_multiplier(seed)),
    })
}

fn decode_skip(params: &ParamTable) -> StageResult<Stage> {
    Ok(Stage::skip(params.parse::<i64>("skip")?))
}

fn decode_sort_by(params: &ParamTable) -> StageResult<Stage> {
    Ok(Stage::SortBy {
        sort_by: params.parse::<SortTarget>("sort_by")?,
        reverse: params.parse::<bool>("reverse")?,
    })
}

fn decode_take(params: &ParamTable) -> StageResult<Stage> {
    let size = params.parse::<i64>("size")?;
    let seed = params.parse_opt::<u64>("seed")?;
    let multiplier = params.parse_opt::<i64>("multiplier")?;
    Ok(Stage::Take {
        size,
        seed,
        multiplier: multiplier.unwrap_or_else(|| draw_multiplier(seed)),
    })
}
