//! Compilation of a view into an executable plan.
//!
//! Stages validate and compile against a *scoped* collection: the base
//! schema narrowed by the selections and exclusions of earlier stages,
//! so each stage sees the schema it will actually receive at runtime.

use serde_json::Value;

use crate::collection::SampleCollection;
use crate::observability::Logger;
use crate::schema::{FieldSchema, MediaType};
use crate::stages::SchemaScope;

use super::errors::{PlanError, PlanResult};
use super::view::View;

/// An executable plan: ordered primitive operations plus the frame
/// attachment flag the document source honors before the first one.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub ops: Vec<Value>,
    pub attach_frames: bool,
}

/// The base collection narrowed by earlier selection stages.
struct ScopedCollection<'a> {
    base: &'a dyn SampleCollection,
    sample: FieldSchema,
    frames: FieldSchema,
}

impl<'a> ScopedCollection<'a> {
    fn new(base: &'a dyn SampleCollection) -> ScopedCollection<'a> {
        ScopedCollection {
            base,
            sample: base.field_schema().clone(),
            frames: base.frame_field_schema().clone(),
        }
    }

    fn apply(&mut self, scope: SchemaScope) {
        match scope {
            SchemaScope::Keep { sample, frames } => {
                self.sample.retain(|name, _| sample.contains(name));
                self.frames.retain(|name, _| frames.contains(name));
            }
            SchemaScope::Drop { sample, frames } => {
                for name in &sample {
                    self.sample.remove(name);
                }
                for name in &frames {
                    self.frames.remove(name);
                }
            }
        }
    }
}

impl SampleCollection for ScopedCollection<'_> {
    fn media_type(&self) -> MediaType {
        self.base.media_type()
    }

    fn field_schema(&self) -> &FieldSchema {
        &self.sample
    }

    fn frame_field_schema(&self) -> &FieldSchema {
        &self.frames
    }

    fn create_index(&self, path: &str) {
        self.base.create_index(path);
    }
}

/// Runs every stage through validate / needs_frames / compile, in order,
/// threading the schema scope forward. Any failure aborts the compile.
pub(crate) fn compile_view(view: &View, collection: &dyn SampleCollection) -> PlanResult<Plan> {
    let mut scoped = ScopedCollection::new(collection);
    let mut ops = Vec::new();
    let mut attach_frames = false;

    for (index, entry) in view.stages().iter().enumerate() {
        let stage = entry.stage();
        let fail = |source| PlanError::Stage {
            index,
            kind: stage.kind().to_string(),
            source,
        };

        stage.validate(&scoped).map_err(fail)?;
        if stage.needs_frames(&scoped).map_err(fail)? {
            attach_frames = true;
        }
        ops.extend(stage.compile(&scoped).map_err(fail)?);

        if let Some(scope) = stage.schema_scope(&scoped).map_err(fail)? {
            scoped.apply(scope);
        }
    }

    let stages = view.len().to_string();
    let operations = ops.len().to_string();
    Logger::info(
        "PLAN_COMPILED",
        &[
            ("stages", stages.as_str()),
            ("operations", operations.as_str()),
            ("attach_frames", if attach_frames { "true" } else { "false" }),
        ],
    );

    Ok(Plan {
        ops,
        attach_frames,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::MemoryCollection;
    use crate::expr::field;
    use crate::schema::{FieldType, LabelKind, SchemaError};
    use crate::stages::{Stage, StageError};
    use serde_json::json;

    fn image_collection() -> MemoryCollection {
        let mut collection = MemoryCollection::image();
        collection.declare_field("ground_truth", FieldType::label(LabelKind::Detections));
        collection.declare_field("weather", FieldType::label(LabelKind::Classification));
        collection.declare_field("uniqueness", FieldType::Float);
        collection
    }

    fn video_collection() -> MemoryCollection {
        let mut collection = MemoryCollection::video();
        collection.declare_frame_field("quality", FieldType::Float);
        collection
    }

    #[test]
    fn test_empty_view_compiles_to_empty_plan() {
        let collection = image_collection();
        let plan = View::new().compile(&collection).unwrap();
        assert!(plan.ops.is_empty());
        assert!(!plan.attach_frames);
    }

    #[test]
    fn test_operations_concatenate_in_stage_order() {
        let collection = image_collection();
        let view = View::new()
            .add_stage(Stage::match_expr(field("uniqueness").gt(0.5)))
            .add_stage(Stage::skip(2))
            .add_stage(Stage::limit(3));

        let plan = view.compile(&collection).unwrap();
        assert_eq!(
            plan.ops,
            vec![
                json!({"$match": {"$expr": {"$gt": ["$uniqueness", 0.5]}}}),
                json!({"$skip": 2}),
                json!({"$limit": 3}),
            ]
        );
    }

    #[test]
    fn test_errors_carry_index_and_kind() {
        let collection = image_collection();
        let view = View::new()
            .add_stage(Stage::limit(5))
            .add_stage(Stage::filter_labels("nope", field("label").eq("x"), true));

        let err = view.compile(&collection).unwrap_err();
        assert_eq!(
            err,
            PlanError::Stage {
                index: 1,
                kind: "filter_labels".to_string(),
                source: StageError::Schema(SchemaError::FieldNotFound("nope".to_string())),
            }
        );
    }

    #[test]
    fn test_selection_narrows_the_scope_for_later_stages() {
        let collection = image_collection();
        let view = View::new()
            .add_stage(Stage::select_fields(["ground_truth"]))
            .add_stage(Stage::filter_labels(
                "weather",
                field("label").eq("sunny"),
                false,
            ));

        let err = view.compile(&collection).unwrap_err();
        assert_eq!(
            err,
            PlanError::Stage {
                index: 1,
                kind: "filter_labels".to_string(),
                source: StageError::Schema(SchemaError::FieldNotFound("weather".to_string())),
            }
        );
    }

    #[test]
    fn test_exclusion_narrows_the_scope_for_later_stages() {
        let collection = image_collection();
        let view = View::new()
            .add_stage(Stage::exclude_fields(["weather"]))
            .add_stage(Stage::exists("weather", true));

        let err = view.compile(&collection).unwrap_err();
        assert!(matches!(err, PlanError::Stage { index: 1, .. }));

        // embedded exclusions leave the root declared
        let view = View::new()
            .add_stage(Stage::exclude_fields(["metadata.mime_type"]))
            .add_stage(Stage::exists("metadata", true));
        assert!(view.compile(&collection).is_ok());
    }

    #[test]
    fn test_selection_keeps_defaults_in_scope() {
        let collection = image_collection();
        let view = View::new()
            .add_stage(Stage::select_fields(["ground_truth"]))
            .add_stage(Stage::match_tags(["train"]))
            .add_stage(Stage::sort_by("filepath", false));
        assert!(view.compile(&collection).is_ok());
    }

    #[test]
    fn test_attach_frames_accumulates_across_stages() {
        let collection = video_collection();

        let plain = View::new().add_stage(Stage::limit(3));
        assert!(!plain.compile(&collection).unwrap().attach_frames);

        let mixed = View::new()
            .add_stage(Stage::limit(3))
            .add_stage(Stage::filter_field(
                "frames.quality",
                field("").gt(0.5),
                true,
            ));
        assert!(mixed.compile(&collection).unwrap().attach_frames);
    }

    #[test]
    fn test_frames_never_attach_for_images() {
        let collection = image_collection();
        let view = View::new().add_stage(Stage::match_query(
            json!({"frames.quality": {"$gt": 0.5}}),
        ));
        let plan = view.compile(&collection).unwrap();
        assert!(!plan.attach_frames);
    }
}
