//! Field path resolution
//!
//! Paths are dotted strings, optionally frame-scoped via the `frames.`
//! prefix on video collections, optionally carrying explicit `[]` list
//! markers on segments. Resolution walks declared types only; it never
//! inspects documents.

use crate::collection::SampleCollection;
use crate::schema::defaults::FRAMES_PREFIX;
use crate::schema::{FieldSchema, FieldType, LabelKind, MediaType, SchemaError, SchemaResult};

/// Resolved type information for a field path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub field_type: FieldType,
    pub is_frame_field: bool,
}

impl FieldInfo {
    /// The labels-list attribute if the resolved type is a container kind
    pub fn list_attribute(&self) -> Option<&'static str> {
        self.field_type.list_attribute()
    }
}

/// A label field resolved to its filterable path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelsPath {
    /// The filterable path: `<field>.<list_attribute>` for containers, the
    /// field itself for singular labels. Keeps the `frames.` prefix.
    pub path: String,
    pub kind: LabelKind,
    pub is_list: bool,
    pub is_frame: bool,
}

/// One segment of a resolved path, with its list-ness
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    pub name: String,
    pub is_list: bool,
}

/// Strips the frame prefix from a path on video collections
///
/// Returns the (possibly stripped) path and whether it was frame-scoped.
/// On image collections the prefix is not reserved.
pub fn handle_frame_field(collection: &dyn SampleCollection, path: &str) -> (String, bool) {
    if collection.media_type() == MediaType::Video {
        if let Some(stripped) = path.strip_prefix(FRAMES_PREFIX) {
            return (stripped.to_string(), true);
        }
    }

    (path.to_string(), false)
}

/// Whether a path addresses frame scope on the given collection
pub fn is_frame_field(collection: &dyn SampleCollection, path: &str) -> bool {
    collection.media_type() == MediaType::Video && path.starts_with(FRAMES_PREFIX)
}

/// Resolves a path to its declared type and frame-ness
pub fn field_info(collection: &dyn SampleCollection, path: &str) -> SchemaResult<FieldInfo> {
    let (name, is_frame) = handle_frame_field(collection, path);
    let schema = schema_for(collection, is_frame);

    let field_type = lookup_path(schema, &name).ok_or_else(|| missing(path, is_frame))?;

    Ok(FieldInfo {
        field_type,
        is_frame_field: is_frame,
    })
}

/// Resolves a label field to its filterable path
///
/// Container kinds filter at `<field>.<list_attribute>`; singular kinds
/// filter at the field itself. Any other type is an error.
pub fn labels_path(collection: &dyn SampleCollection, field: &str) -> SchemaResult<LabelsPath> {
    let info = field_info(collection, field)?;

    match info.field_type {
        FieldType::Label { kind } => match kind.list_attribute() {
            Some(attr) => Ok(LabelsPath {
                path: format!("{}.{}", field, attr),
                kind,
                is_list: true,
                is_frame: info.is_frame_field,
            }),
            None => Ok(LabelsPath {
                path: field.to_string(),
                kind,
                is_list: false,
                is_frame: info.is_frame_field,
            }),
        },
        other => Err(SchemaError::NotALabelField {
            field: field.to_string(),
            found: other.type_name().to_string(),
        }),
    }
}

/// Resolves a labels-list container to its inner list path
pub fn labels_list_path(collection: &dyn SampleCollection, field: &str) -> SchemaResult<LabelsPath> {
    let resolved = labels_path(collection, field)?;

    if !resolved.is_list {
        return Err(SchemaError::NotALabelsListField {
            field: field.to_string(),
            found: resolved.kind.type_name().to_string(),
        });
    }

    Ok(resolved)
}

/// Checks that the root segment of every path exists in its schema
///
/// Nested tails under an existing root are permitted; embedded attributes
/// are open-ended.
pub fn validate_fields_exist<S: AsRef<str>>(
    collection: &dyn SampleCollection,
    paths: &[S],
) -> SchemaResult<()> {
    for path in paths {
        let path = path.as_ref();
        let (name, is_frame) = handle_frame_field(collection, path);
        let schema = schema_for(collection, is_frame);

        let root = root_segment(&name);
        if !schema.contains_key(root) {
            return Err(missing(path, is_frame));
        }
    }

    Ok(())
}

/// Splits a (frame-stripped) path into segments annotated with list-ness
///
/// A segment is a list boundary when its declared type is a list, when it is
/// the list attribute of a container, or when it carries an explicit `[]`
/// marker. Segments that cannot be resolved are treated as scalars.
pub fn list_segments(
    collection: &dyn SampleCollection,
    path: &str,
    frames: bool,
) -> Vec<PathSegment> {
    let schema = schema_for(collection, frames);

    let mut segments = Vec::new();
    let mut current: Option<FieldType> = None;

    for (i, raw) in path.split('.').enumerate() {
        let forced = raw.ends_with("[]");
        let name = raw.trim_end_matches("[]").to_string();

        current = if i == 0 {
            schema.get(&name).cloned()
        } else {
            current.as_ref().and_then(|t| descend(t, &name))
        };

        let is_list = forced || matches!(current, Some(FieldType::List { .. }));
        segments.push(PathSegment { name, is_list });
    }

    segments
}

fn schema_for(collection: &dyn SampleCollection, frames: bool) -> &FieldSchema {
    if frames {
        collection.frame_field_schema()
    } else {
        collection.field_schema()
    }
}

fn root_segment(path: &str) -> &str {
    path.split('.').next().unwrap_or(path).trim_end_matches("[]")
}

fn lookup_path(schema: &FieldSchema, path: &str) -> Option<FieldType> {
    let mut segments = path.split('.').map(|s| s.trim_end_matches("[]"));
    let mut current = schema.get(segments.next()?)?.clone();

    for segment in segments {
        current = descend(&current, segment)?;
    }

    Some(current)
}

fn descend(field_type: &FieldType, segment: &str) -> Option<FieldType> {
    match field_type {
        FieldType::Object { fields } => fields.get(segment).cloned(),
        FieldType::List { element_type } => descend(element_type, segment),
        FieldType::Label { kind } => kind.attribute(segment),
        _ => None,
    }
}

fn missing(path: &str, is_frame: bool) -> SchemaError {
    if is_frame {
        SchemaError::FrameFieldNotFound(path.to_string())
    } else {
        SchemaError::FieldNotFound(path.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::MemoryCollection;

    fn image_collection() -> MemoryCollection {
        let mut collection = MemoryCollection::image();
        collection.declare_field("ground_truth", FieldType::label(LabelKind::Detections));
        collection.declare_field("weather", FieldType::label(LabelKind::Classification));
        collection.declare_field("uniqueness", FieldType::Float);
        collection.declare_field("scores", FieldType::list_of(FieldType::Float));
        collection
    }

    fn video_collection() -> MemoryCollection {
        let mut collection = MemoryCollection::video();
        collection.declare_frame_field("objects", FieldType::label(LabelKind::Detections));
        collection.declare_frame_field("quality", FieldType::Float);
        collection
    }

    #[test]
    fn test_frame_prefix_stripped_on_video_only() {
        let video = video_collection();
        let (name, is_frame) = handle_frame_field(&video, "frames.objects");
        assert_eq!(name, "objects");
        assert!(is_frame);

        let image = image_collection();
        let (name, is_frame) = handle_frame_field(&image, "frames.objects");
        assert_eq!(name, "frames.objects");
        assert!(!is_frame);
    }

    #[test]
    fn test_field_info_nested_paths() {
        let collection = image_collection();

        let info = field_info(&collection, "ground_truth.detections.label").unwrap();
        assert_eq!(info.field_type, FieldType::String);
        assert!(!info.is_frame_field);

        let info = field_info(&collection, "ground_truth.detections").unwrap();
        assert_eq!(
            info.field_type,
            FieldType::list_of(FieldType::label(LabelKind::Detection))
        );
    }

    #[test]
    fn test_field_info_frame_scope() {
        let collection = video_collection();

        let info = field_info(&collection, "frames.quality").unwrap();
        assert_eq!(info.field_type, FieldType::Float);
        assert!(info.is_frame_field);

        let err = field_info(&collection, "frames.nope").unwrap_err();
        assert_eq!(err, SchemaError::FrameFieldNotFound("frames.nope".into()));
    }

    #[test]
    fn test_labels_path_container_vs_singular() {
        let collection = image_collection();

        let resolved = labels_path(&collection, "ground_truth").unwrap();
        assert_eq!(resolved.path, "ground_truth.detections");
        assert!(resolved.is_list);

        let resolved = labels_path(&collection, "weather").unwrap();
        assert_eq!(resolved.path, "weather");
        assert!(!resolved.is_list);

        let err = labels_path(&collection, "uniqueness").unwrap_err();
        assert_eq!(
            err,
            SchemaError::NotALabelField {
                field: "uniqueness".into(),
                found: "float".into(),
            }
        );
    }

    #[test]
    fn test_labels_list_path_rejects_singular() {
        let collection = image_collection();

        let err = labels_list_path(&collection, "weather").unwrap_err();
        assert_eq!(
            err,
            SchemaError::NotALabelsListField {
                field: "weather".into(),
                found: "Classification".into(),
            }
        );
    }

    #[test]
    fn test_validate_fields_exist_checks_roots() {
        let collection = image_collection();

        assert!(validate_fields_exist(&collection, &["ground_truth.num_objects"]).is_ok());
        assert!(validate_fields_exist(&collection, &["filepath", "uniqueness"]).is_ok());

        let err = validate_fields_exist(&collection, &["missing.label"]).unwrap_err();
        assert_eq!(err, SchemaError::FieldNotFound("missing.label".into()));
    }

    #[test]
    fn test_list_segments_boundaries() {
        let collection = image_collection();

        let segments = list_segments(&collection, "ground_truth.detections.label", false);
        let lists: Vec<bool> = segments.iter().map(|s| s.is_list).collect();
        assert_eq!(lists, vec![false, true, false]);

        let segments = list_segments(&collection, "scores", false);
        assert!(segments[0].is_list);

        // explicit markers force a boundary even without a declared type
        let segments = list_segments(&collection, "ground_truth.extra[].name", false);
        assert_eq!(segments[1].name, "extra");
        assert!(segments[1].is_list);
    }
}
