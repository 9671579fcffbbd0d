//! Field selection and exclusion.
//!
//! Selection projects the requested fields plus the defaults every sample
//! keeps; exclusion unsets the named fields and refuses to touch private
//! or default ones. Frame-scoped fields project and unset under the
//! `frames.` prefix.

use std::collections::BTreeSet;

use serde_json::{json, Map, Value};

use crate::collection::SampleCollection;
use crate::schema::{
    default_frame_paths, default_sample_paths, handle_frame_field, is_private,
    validate_fields_exist, MediaType, FRAMES_PREFIX,
};

use super::errors::{StageError, StageResult};

/// How a stage narrows the schema visible to the stages after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaScope {
    /// Keep only these root fields.
    Keep {
        sample: BTreeSet<String>,
        frames: BTreeSet<String>,
    },
    /// Drop these root fields.
    Drop {
        sample: BTreeSet<String>,
        frames: BTreeSet<String>,
    },
}

/// Lowers a field selection to a `$project` of the requested paths plus
/// the default ones.
pub(crate) fn select_fields_pipeline(
    collection: &dyn SampleCollection,
    field_names: &[String],
) -> StageResult<Vec<Value>> {
    let (sample, frames) = selected_paths(collection, field_names)?;

    let mut spec = Map::new();
    for path in collapse_paths(&sample) {
        spec.insert(path, Value::Bool(true));
    }
    for path in collapse_paths(&frames) {
        spec.insert(format!("{}{}", FRAMES_PREFIX, path), Value::Bool(true));
    }

    Ok(vec![json!({ "$project": spec })])
}

/// Lowers a field exclusion to a single `$unset`.
pub(crate) fn exclude_fields_pipeline(
    collection: &dyn SampleCollection,
    field_names: &[String],
) -> StageResult<Vec<Value>> {
    let mut targets = Vec::with_capacity(field_names.len());
    for name in field_names {
        let (local, is_frame) = handle_frame_field(collection, name);
        if is_private(&local) {
            return Err(StageError::ExcludePrivateField(name.clone()));
        }
        let is_default = if is_frame {
            default_frame_paths().contains(local.as_str())
        } else {
            default_sample_paths(collection.media_type()).contains(local.as_str())
        };
        if is_default {
            return Err(StageError::ExcludeDefaultField(name.clone()));
        }
        validate_fields_exist(collection, &[name])?;
        targets.push(if is_frame {
            format!("{}{}", FRAMES_PREFIX, local)
        } else {
            local
        });
    }

    Ok(vec![json!({ "$unset": targets })])
}

/// The scope a selection leaves behind: the roots of everything kept.
pub(crate) fn keep_scope(
    collection: &dyn SampleCollection,
    field_names: &[String],
) -> StageResult<SchemaScope> {
    let (sample, frames) = selected_paths(collection, field_names)?;
    Ok(SchemaScope::Keep {
        sample: sample.iter().map(|p| root_of(p)).collect(),
        frames: frames.iter().map(|p| root_of(p)).collect(),
    })
}

/// The scope an exclusion leaves behind. Only whole-root exclusions
/// narrow the schema; excluding an embedded path leaves its root
/// declared.
pub(crate) fn drop_scope(
    collection: &dyn SampleCollection,
    field_names: &[String],
) -> SchemaScope {
    let mut sample = BTreeSet::new();
    let mut frames = BTreeSet::new();
    for name in field_names {
        let (local, is_frame) = handle_frame_field(collection, name);
        if local.contains('.') {
            continue;
        }
        if is_frame {
            frames.insert(local);
        } else {
            sample.insert(local);
        }
    }
    SchemaScope::Drop { sample, frames }
}

/// Resolves the requested names into sample and frame path sets, with
/// defaults merged in. For video, frame fields project individually
/// instead of through a whole-`frames` inclusion.
fn selected_paths(
    collection: &dyn SampleCollection,
    field_names: &[String],
) -> StageResult<(BTreeSet<String>, BTreeSet<String>)> {
    let media = collection.media_type();
    let video = media == MediaType::Video;

    let mut sample: BTreeSet<String> = default_sample_paths(media)
        .iter()
        .map(|p| p.to_string())
        .collect();
    let mut frames: BTreeSet<String> = if video {
        default_frame_paths().iter().map(|p| p.to_string()).collect()
    } else {
        BTreeSet::new()
    };
    if video {
        sample.remove("frames");
    }

    for name in field_names {
        let (local, is_frame) = handle_frame_field(collection, name);
        if is_private(&local) {
            return Err(StageError::SelectPrivateField(name.clone()));
        }
        validate_fields_exist(collection, &[name])?;
        if is_frame {
            frames.insert(local);
        } else {
            sample.insert(local);
        }
    }

    Ok((sample, frames))
}

/// Drops paths that have a shorter selected prefix, so the projection
/// never carries colliding entries like `metadata` and
/// `metadata.mime_type` together.
fn collapse_paths(paths: &BTreeSet<String>) -> Vec<String> {
    paths
        .iter()
        .filter(|path| !has_selected_prefix(paths, path))
        .cloned()
        .collect()
}

fn has_selected_prefix(paths: &BTreeSet<String>, path: &str) -> bool {
    for (i, ch) in path.char_indices() {
        if ch == '.' && paths.contains(&path[..i]) {
            return true;
        }
    }
    false
}

fn root_of(path: &str) -> String {
    path.split('.').next().unwrap_or(path).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::MemoryCollection;
    use crate::schema::{FieldType, LabelKind};

    fn image_collection() -> MemoryCollection {
        let mut collection = MemoryCollection::image();
        collection.declare_field("ground_truth", FieldType::label(LabelKind::Detections));
        collection.declare_field("uniqueness", FieldType::Float);
        collection
    }

    fn video_collection() -> MemoryCollection {
        let mut collection = MemoryCollection::video();
        collection.declare_frame_field("quality", FieldType::Float);
        collection
    }

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_select_includes_defaults() {
        let collection = image_collection();
        let pipeline =
            select_fields_pipeline(&collection, &strings(&["ground_truth"])).unwrap();

        assert_eq!(
            pipeline,
            vec![json!({"$project": {
                "_id": true,
                "_rand": true,
                "filepath": true,
                "ground_truth": true,
                "metadata": true,
                "tags": true,
            }})]
        );
    }

    #[test]
    fn test_select_frame_fields_project_under_prefix() {
        let collection = video_collection();
        let pipeline =
            select_fields_pipeline(&collection, &strings(&["frames.quality"])).unwrap();

        assert_eq!(
            pipeline,
            vec![json!({"$project": {
                "_id": true,
                "_rand": true,
                "filepath": true,
                "frames._id": true,
                "frames.frame_number": true,
                "frames.quality": true,
                "metadata": true,
                "tags": true,
            }})]
        );
    }

    #[test]
    fn test_select_collapses_nested_paths_into_defaults() {
        let collection = image_collection();
        let pipeline =
            select_fields_pipeline(&collection, &strings(&["metadata.mime_type"])).unwrap();

        let spec = pipeline[0]["$project"].as_object().unwrap();
        assert!(spec.contains_key("metadata"));
        assert!(!spec.contains_key("metadata.mime_type"));
    }

    #[test]
    fn test_select_rejects_private_and_unknown_fields() {
        let collection = image_collection();

        let err = select_fields_pipeline(&collection, &strings(&["_secret"])).unwrap_err();
        assert_eq!(err, StageError::SelectPrivateField("_secret".to_string()));

        let err = select_fields_pipeline(&collection, &strings(&["nope"])).unwrap_err();
        assert!(matches!(err, StageError::Schema(_)));
    }

    #[test]
    fn test_exclude_unsets_with_frame_prefix() {
        let collection = video_collection();
        let pipeline =
            exclude_fields_pipeline(&collection, &strings(&["frames.quality"])).unwrap();

        assert_eq!(pipeline, vec![json!({"$unset": ["frames.quality"]})]);
    }

    #[test]
    fn test_exclude_rejects_default_and_private_fields() {
        let collection = image_collection();

        let err = exclude_fields_pipeline(&collection, &strings(&["filepath"])).unwrap_err();
        assert_eq!(err, StageError::ExcludeDefaultField("filepath".to_string()));

        let err = exclude_fields_pipeline(&collection, &strings(&["_rand"])).unwrap_err();
        assert_eq!(err, StageError::ExcludePrivateField("_rand".to_string()));

        let collection = video_collection();
        let err = exclude_fields_pipeline(&collection, &strings(&["frames.frame_number"]))
            .unwrap_err();
        assert_eq!(
            err,
            StageError::ExcludeDefaultField("frames.frame_number".to_string())
        );
    }

    #[test]
    fn test_scopes_reduce_to_roots() {
        let collection = image_collection();

        let scope = keep_scope(&collection, &strings(&["ground_truth"])).unwrap();
        match scope {
            SchemaScope::Keep { sample, .. } => {
                assert!(sample.contains("ground_truth"));
                assert!(sample.contains("filepath"));
                assert!(!sample.contains("uniqueness"));
            }
            other => panic!("expected Keep, got {:?}", other),
        }

        let scope = drop_scope(&collection, &strings(&["uniqueness", "metadata.mime_type"]));
        match scope {
            SchemaScope::Drop { sample, .. } => {
                assert!(sample.contains("uniqueness"));
                // embedded exclusions leave the root declared
                assert!(!sample.contains("metadata"));
            }
            other => panic!("expected Drop, got {:?}", other),
        }
    }
}
