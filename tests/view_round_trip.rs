//! View serialization round trips
//!
//! Covers:
//! 1. Serialize, deserialize, and compile parity for mixed views
//! 2. Stage uuids are assigned lazily and survive the round trip
//! 3. Deprecated alias kinds reload under their alias names
//! 4. Randomized stages reload with their drawn multiplier intact
//! 5. Decode and validation failures report the stage position

use serde_json::json;

use lightbox::collection::MemoryCollection;
use lightbox::expr::field;
use lightbox::pipeline::{PlanError, View};
use lightbox::schema::{FieldType, LabelKind, SchemaError};
use lightbox::stages::{Stage, StageError, StageRegistry};

fn dataset() -> MemoryCollection {
    let mut collection = MemoryCollection::image().with_rand_seed(29);
    collection.declare_field("ground_truth", FieldType::label(LabelKind::Detections));
    collection.declare_field("weather", FieldType::label(LabelKind::Classification));
    collection.declare_field("uniqueness", FieldType::Float);
    for index in 0..6 {
        collection
            .add_sample(json!({
                "filepath": format!("/data/{:03}.png", index),
                "uniqueness": index as f64 / 6.0,
                "ground_truth": {"detections": [
                    {"label": "cat", "confidence": 0.9},
                ]},
            }))
            .unwrap();
    }
    collection
}

// =========================================================================
// Round trips
// =========================================================================

/// Test: a reloaded view compiles to exactly the plan of the original.
#[test]
fn test_round_trip_compiles_identical_plan() {
    let collection = dataset();
    let registry = StageRegistry::default();

    let mut view = View::new()
        .add_stage(Stage::match_expr(field("uniqueness").gt(0.5)))
        .add_stage(Stage::filter_labels(
            "ground_truth",
            field("confidence").gt(0.8),
            true,
        ))
        .add_stage(Stage::take(2, Some(51)))
        .add_stage(Stage::sort_by("uniqueness", true));

    let original = view.compile(&collection).unwrap();
    let encoded = view.to_json();
    let restored = View::from_json(&encoded, &registry).unwrap();
    let reloaded = restored.compile(&collection).unwrap();

    assert_eq!(original, reloaded);
    assert_eq!(restored.len(), view.len());
}

/// Test: uuids appear on first serialization, stay stable, and survive
/// the reload.
#[test]
fn test_uuids_are_lazy_and_preserved() {
    let registry = StageRegistry::default();
    let mut view = View::new()
        .add_stage(Stage::limit(5))
        .add_stage(Stage::skip(1));

    assert!(view.stages().iter().all(|stage| stage.uuid().is_none()));

    let first = view.to_json();
    let second = view.to_json();
    assert_eq!(first, second);

    let mut restored = View::from_json(&first, &registry).unwrap();
    assert_eq!(restored.to_json(), first);
}

/// Test: deprecated aliases keep their kind names through a round trip
/// and still enforce their pinned label kind afterwards.
#[test]
fn test_alias_kinds_survive_round_trip() {
    let collection = dataset();
    let registry = StageRegistry::default();

    let mut view = View::new().add_stage(Stage::filter_detections(
        "ground_truth",
        field("confidence").gt(0.5),
        true,
    ));
    let encoded = view.to_json();
    assert_eq!(encoded["stages"][0]["kind"], json!("filter_detections"));

    let restored = View::from_json(&encoded, &registry).unwrap();
    assert_eq!(restored.stages()[0].stage().kind(), "filter_detections");

    // Still pinned: applying the reloaded stage to a classification
    // field is a kind mismatch.
    let mut retargeted = encoded.clone();
    retargeted["stages"][0]["params"][0][1] = json!("weather");
    let view = View::from_json(&retargeted, &registry).unwrap();
    let err = view.compile(&collection).unwrap_err();
    assert!(matches!(
        err,
        PlanError::Stage {
            index: 0,
            source: StageError::LabelKindMismatch { .. },
            ..
        }
    ));
}

/// Test: the serialized multiplier wins over the seed on reload, so
/// reloaded randomized stages reproduce the original order.
#[test]
fn test_randomized_stages_reload_their_multiplier() {
    let collection = dataset();
    let registry = StageRegistry::default();

    let mut view = View::new().add_stage(Stage::shuffle(None));
    let original = view.compile(&collection).unwrap();

    let encoded = view.to_json();
    let restored = View::from_json(&encoded, &registry).unwrap();
    let reloaded = restored.compile(&collection).unwrap();

    assert_eq!(original, reloaded);
}

// =========================================================================
// Failure reporting
// =========================================================================

/// Test: decode failures name the position of the offending stage.
#[test]
fn test_decode_failures_carry_the_stage_index() {
    let registry = StageRegistry::default();

    let doc = json!({"stages": [
        {"kind": "limit", "uuid": null, "params": [["limit", 5]]},
        {"kind": "warp_speed", "uuid": null, "params": []},
    ]});
    let err = View::from_json(&doc, &registry).unwrap_err();
    assert_eq!(
        err,
        PlanError::Decode {
            index: 1,
            source: StageError::UnknownStageKind("warp_speed".to_string()),
        }
    );

    let doc = json!({"stages": [
        {"kind": "limit", "uuid": null, "params": []},
    ]});
    let err = View::from_json(&doc, &registry).unwrap_err();
    assert!(matches!(err, PlanError::Decode { index: 0, .. }));

    let doc = json!({"pipeline": []});
    assert!(matches!(
        View::from_json(&doc, &registry).unwrap_err(),
        PlanError::MalformedView(_)
    ));
}

/// Test: excluding a field twice fails on the second stage because the
/// first already removed it from scope.
#[test]
fn test_double_exclusion_is_a_compile_error() {
    let collection = dataset();
    let view = View::new()
        .add_stage(Stage::exclude_fields(["weather"]))
        .add_stage(Stage::exclude_fields(["weather"]));

    let err = view.compile(&collection).unwrap_err();
    assert_eq!(
        err,
        PlanError::Stage {
            index: 1,
            kind: "exclude_fields".to_string(),
            source: StageError::Schema(SchemaError::FieldNotFound("weather".to_string())),
        }
    );
}

/// Test: a stage dropped from a view by uuid no longer contributes to
/// the compiled plan.
#[test]
fn test_remove_stage_by_uuid() {
    let collection = dataset();

    let mut view = View::new()
        .add_stage(Stage::limit(3))
        .add_stage(Stage::skip(1));
    let encoded = view.to_json();
    let uuid = encoded["stages"][1]["uuid"].as_str().unwrap().to_string();

    let removed = view.remove_stage(&uuid).unwrap();
    assert_eq!(removed.kind(), "skip");
    assert_eq!(view.len(), 1);

    let plan = view.compile(&collection).unwrap();
    assert_eq!(plan.ops, vec![json!({"$limit": 3})]);
}
