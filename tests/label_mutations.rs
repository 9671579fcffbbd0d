//! Label and field mutations
//!
//! Covers:
//! 1. MapLabels rewrites mapped values and passes unmapped ones through
//! 2. SetField binds expressions at the document root and rebuilds
//!    list elements past a list boundary
//! 3. LimitLabels truncates label lists with clamped limits
//! 4. Expression sorts order by computed values and clean up after
//!    themselves

use serde_json::{json, Value};

use lightbox::collection::MemoryCollection;
use lightbox::engine::PlanRunner;
use lightbox::expr::field;
use lightbox::pipeline::View;
use lightbox::schema::{FieldType, LabelKind};
use lightbox::stages::Stage;

fn annotated_dataset() -> MemoryCollection {
    let mut collection = MemoryCollection::image().with_rand_seed(31);
    collection.declare_field("ground_truth", FieldType::label(LabelKind::Detections));
    collection.declare_field("weather", FieldType::label(LabelKind::Classification));
    collection.declare_field("uniqueness", FieldType::Float);

    collection
        .add_sample(json!({
            "filepath": "/data/a.png",
            "uniqueness": 0.9,
            "weather": {"label": "sunny"},
            "ground_truth": {"detections": [
                {"label": "cat", "confidence": 0.9},
                {"label": "dog", "confidence": 0.4},
            ]},
        }))
        .unwrap();
    collection
        .add_sample(json!({
            "filepath": "/data/b.png",
            "uniqueness": 0.2,
            "weather": {"label": "rainy"},
            "ground_truth": {"detections": [
                {"label": "cat", "confidence": 0.7},
            ]},
        }))
        .unwrap();
    collection
        .add_sample(json!({"filepath": "/data/c.png", "uniqueness": 0.5}))
        .unwrap();
    collection
}

fn run(view: View, collection: &MemoryCollection) -> Vec<Value> {
    let plan = view.compile(collection).unwrap();
    PlanRunner::run(collection, &plan).unwrap()
}

// =========================================================================
// MapLabels
// =========================================================================

/// Test: mapped label values are rewritten in every list element;
/// unmapped values pass through untouched.
#[test]
fn test_map_labels_rewrites_through_the_mapping() {
    let collection = annotated_dataset();
    let view = View::new().add_stage(Stage::map_labels(
        "ground_truth",
        [("cat", "feline")],
    ));

    let docs = run(view, &collection);
    assert_eq!(docs.len(), 3);
    assert_eq!(
        docs[0]["ground_truth"]["detections"][0]["label"],
        json!("feline")
    );
    assert_eq!(
        docs[0]["ground_truth"]["detections"][1]["label"],
        json!("dog")
    );
    assert_eq!(
        docs[1]["ground_truth"]["detections"][0]["label"],
        json!("feline")
    );
    // Attributes other than the label are untouched.
    assert_eq!(
        docs[0]["ground_truth"]["detections"][0]["confidence"],
        json!(0.9)
    );
}

/// Test: singular labels remap in place.
#[test]
fn test_map_labels_on_singular_labels() {
    let collection = annotated_dataset();
    let view = View::new().add_stage(Stage::map_labels("weather", [("sunny", "clear")]));

    let docs = run(view, &collection);
    assert_eq!(docs[0]["weather"]["label"], json!("clear"));
    assert_eq!(docs[1]["weather"]["label"], json!("rainy"));
}

// =========================================================================
// SetField
// =========================================================================

/// Test: a top-level assignment binds bare field references to the
/// document root.
#[test]
fn test_set_field_binds_to_the_document_root() {
    let mut collection = annotated_dataset();
    collection.declare_field("doubled", FieldType::Float);
    let view = View::new().add_stage(Stage::set_field(
        "doubled",
        field("uniqueness") * 2.0,
    ));

    let docs = run(view, &collection);
    let doubled: Vec<f64> = docs
        .iter()
        .map(|doc| doc["doubled"].as_f64().unwrap())
        .collect();
    assert_eq!(doubled, vec![1.8, 0.4, 1.0]);
}

/// Test: assignments past a list boundary rebuild each element, with
/// references bound to the element.
#[test]
fn test_set_field_descends_into_label_lists() {
    let collection = annotated_dataset();
    let view = View::new().add_stage(Stage::set_field(
        "ground_truth.detections.high_conf",
        field("confidence").gt(0.5),
    ));

    let docs = run(view, &collection);
    assert_eq!(
        docs[0]["ground_truth"]["detections"][0]["high_conf"],
        json!(true)
    );
    assert_eq!(
        docs[0]["ground_truth"]["detections"][1]["high_conf"],
        json!(false)
    );
    assert_eq!(
        docs[1]["ground_truth"]["detections"][0]["high_conf"],
        json!(true)
    );
    // Existing attributes survive the rebuild.
    assert_eq!(
        docs[0]["ground_truth"]["detections"][0]["label"],
        json!("cat")
    );
}

// =========================================================================
// LimitLabels
// =========================================================================

/// Test: label lists truncate to the limit, in order; negative limits
/// clamp to empty.
#[test]
fn test_limit_labels_truncates_in_order() {
    let collection = annotated_dataset();

    let docs = run(
        View::new().add_stage(Stage::limit_labels("ground_truth", 1)),
        &collection,
    );
    assert_eq!(
        docs[0]["ground_truth"]["detections"],
        json!([{"label": "cat", "confidence": 0.9}])
    );
    assert_eq!(
        docs[1]["ground_truth"]["detections"]
            .as_array()
            .unwrap()
            .len(),
        1
    );

    let docs = run(
        View::new().add_stage(Stage::limit_labels("ground_truth", -3)),
        &collection,
    );
    assert_eq!(docs[0]["ground_truth"]["detections"], json!([]));
}

// =========================================================================
// Expression sorts
// =========================================================================

/// Test: sorting by a computed expression orders documents and leaves
/// no scratch fields behind.
#[test]
fn test_sort_by_expression() {
    let collection = annotated_dataset();
    let view = View::new().add_stage(Stage::sort_by_expr(
        field("ground_truth.detections").length(),
        true,
    ));

    let docs = run(view, &collection);
    let counts: Vec<usize> = docs
        .iter()
        .map(|doc| {
            doc["ground_truth"]["detections"]
                .as_array()
                .map_or(0, Vec::len)
        })
        .collect();
    assert_eq!(counts, vec![2, 1, 0]);
    for doc in &docs {
        assert!(!doc.as_object().unwrap().contains_key("_sort_field"));
    }
}

/// Test: exists partitions samples on field presence in both polarities.
#[test]
fn test_exists_partitions_on_presence() {
    let collection = annotated_dataset();

    let present = run(
        View::new().add_stage(Stage::exists("weather", true)),
        &collection,
    );
    let absent = run(
        View::new().add_stage(Stage::exists("weather", false)),
        &collection,
    );

    assert_eq!(present.len(), 2);
    assert_eq!(absent.len(), 1);
    assert_eq!(absent[0]["filepath"], json!("/data/c.png"));
}
