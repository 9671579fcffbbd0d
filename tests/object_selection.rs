//! Object-level selection
//!
//! Covers:
//! 1. SelectObjects restricts samples, fields, and label membership
//! 2. ExcludeObjects removes exactly the referenced labels
//! 3. References into non-label fields are skipped, not fatal
//! 4. Malformed object ids are rejected at construction

use serde_json::{json, Value};

use lightbox::collection::MemoryCollection;
use lightbox::engine::PlanRunner;
use lightbox::pipeline::View;
use lightbox::schema::{FieldType, LabelKind};
use lightbox::stages::{ObjectRef, Stage, StageError};

const SAMPLE_A: &str = "11111111-1111-4111-8111-111111111111";
const SAMPLE_B: &str = "22222222-2222-4222-8222-222222222222";
const CAT_A: &str = "aaaaaaaa-aaaa-4aaa-8aaa-aaaaaaaaaaaa";
const DOG_A: &str = "bbbbbbbb-bbbb-4bbb-8bbb-bbbbbbbbbbbb";
const CAT_PRED: &str = "cccccccc-cccc-4ccc-8ccc-cccccccccccc";
const CAT_B: &str = "dddddddd-dddd-4ddd-8ddd-dddddddddddd";

fn annotated_dataset() -> MemoryCollection {
    let mut collection = MemoryCollection::image().with_rand_seed(23);
    collection.declare_field("ground_truth", FieldType::label(LabelKind::Detections));
    collection.declare_field("predictions", FieldType::label(LabelKind::Detections));
    collection.declare_field("uniqueness", FieldType::Float);

    collection
        .add_sample(json!({
            "_id": SAMPLE_A,
            "filepath": "/data/a.png",
            "uniqueness": 0.25,
            "ground_truth": {"detections": [
                {"_id": CAT_A, "label": "cat"},
                {"_id": DOG_A, "label": "dog"},
            ]},
            "predictions": {"detections": [
                {"_id": CAT_PRED, "label": "cat", "confidence": 0.9},
            ]},
        }))
        .unwrap();
    collection
        .add_sample(json!({
            "_id": SAMPLE_B,
            "filepath": "/data/b.png",
            "uniqueness": 0.5,
            "ground_truth": {"detections": [
                {"_id": CAT_B, "label": "cat"},
            ]},
        }))
        .unwrap();
    collection
}

fn run(view: View, collection: &MemoryCollection) -> Vec<Value> {
    let plan = view.compile(collection).unwrap();
    PlanRunner::run(collection, &plan).unwrap()
}

// =========================================================================
// SelectObjects
// =========================================================================

/// Test: selecting one detection keeps its sample, its field, and only
/// that detection; unreferenced fields are projected away.
#[test]
fn test_select_objects_restricts_to_referenced_labels() {
    let collection = annotated_dataset();
    let stage =
        Stage::select_objects(vec![ObjectRef::new(SAMPLE_A, "ground_truth", CAT_A)]).unwrap();

    let docs = run(View::new().add_stage(stage), &collection);
    assert_eq!(docs.len(), 1);
    let doc = docs[0].as_object().unwrap();
    assert_eq!(doc["_id"], json!(SAMPLE_A));
    assert_eq!(
        doc["ground_truth"]["detections"],
        json!([{"_id": CAT_A, "label": "cat"}])
    );
    assert!(!doc.contains_key("predictions"));
    assert!(!doc.contains_key("uniqueness"));
}

/// Test: references across samples and fields union into one selection.
#[test]
fn test_select_objects_unions_references() {
    let collection = annotated_dataset();
    let stage = Stage::select_objects(vec![
        ObjectRef::new(SAMPLE_A, "predictions", CAT_PRED),
        ObjectRef::new(SAMPLE_B, "ground_truth", CAT_B),
    ])
    .unwrap();

    let docs = run(View::new().add_stage(stage), &collection);
    assert_eq!(docs.len(), 2);
    // Both fields stay selected on both samples; membership filters
    // each list down to the referenced ids.
    assert_eq!(docs[0]["ground_truth"]["detections"], json!([]));
    assert_eq!(
        docs[0]["predictions"]["detections"],
        json!([{"_id": CAT_PRED, "label": "cat", "confidence": 0.9}])
    );
    assert_eq!(
        docs[1]["ground_truth"]["detections"],
        json!([{"_id": CAT_B, "label": "cat"}])
    );
}

// =========================================================================
// ExcludeObjects
// =========================================================================

/// Test: excluding one detection removes it and nothing else.
#[test]
fn test_exclude_objects_removes_exactly_the_references() {
    let collection = annotated_dataset();
    let stage =
        Stage::exclude_objects(vec![ObjectRef::new(SAMPLE_A, "ground_truth", DOG_A)]).unwrap();

    let docs = run(View::new().add_stage(stage), &collection);
    assert_eq!(docs.len(), 2);
    assert_eq!(
        docs[0]["ground_truth"]["detections"],
        json!([{"_id": CAT_A, "label": "cat"}])
    );
    assert_eq!(
        docs[0]["predictions"]["detections"]
            .as_array()
            .unwrap()
            .len(),
        1
    );
    assert_eq!(
        docs[1]["ground_truth"]["detections"],
        json!([{"_id": CAT_B, "label": "cat"}])
    );
}

// =========================================================================
// Degenerate references
// =========================================================================

/// Test: references into a non-label field compile to a no-op for that
/// field instead of failing the view.
#[test]
fn test_non_label_field_references_are_skipped() {
    let collection = annotated_dataset();
    let stage =
        Stage::exclude_objects(vec![ObjectRef::new(SAMPLE_A, "uniqueness", CAT_A)]).unwrap();

    let docs = run(View::new().add_stage(stage), &collection);
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0]["uniqueness"], json!(0.25));
    assert_eq!(
        docs[0]["ground_truth"]["detections"]
            .as_array()
            .unwrap()
            .len(),
        2
    );
}

/// Test: malformed ids are rejected when the stage is constructed.
#[test]
fn test_malformed_object_ids_are_rejected() {
    let err =
        Stage::select_objects(vec![ObjectRef::new("not-a-uuid", "ground_truth", CAT_A)])
            .unwrap_err();
    assert_eq!(err, StageError::InvalidId("not-a-uuid".to_string()));

    let err =
        Stage::exclude_objects(vec![ObjectRef::new(SAMPLE_A, "ground_truth", "bogus")])
            .unwrap_err();
    assert_eq!(err, StageError::InvalidId("bogus".to_string()));
}

/// Test: referencing an undeclared field fails view validation with the
/// stage position.
#[test]
fn test_unknown_field_references_fail_validation() {
    let collection = annotated_dataset();
    let stage =
        Stage::select_objects(vec![ObjectRef::new(SAMPLE_A, "hallucinations", CAT_A)]).unwrap();

    assert!(View::new()
        .add_stage(stage)
        .compile(&collection)
        .is_err());
}
