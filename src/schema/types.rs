//! Field type definitions
//!
//! Supported declared types:
//! - string, int, bool, float: scalars
//! - object: nested document with its own field map
//! - list: homogeneous list with an element type
//! - label: one of the closed label-family kinds

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Media type of a sample collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The closed set of label families
///
/// Singular kinds hold one label document; list kinds are containers wrapping
/// a homogeneous list of singular labels under a declared attribute name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelKind {
    Classification,
    Classifications,
    Detection,
    Detections,
    Polyline,
    Polylines,
    Keypoint,
    Keypoints,
}

impl LabelKind {
    /// The inner list attribute for container kinds, `None` for singular kinds
    pub fn list_attribute(&self) -> Option<&'static str> {
        match self {
            LabelKind::Classifications => Some("classifications"),
            LabelKind::Detections => Some("detections"),
            LabelKind::Polylines => Some("polylines"),
            LabelKind::Keypoints => Some("keypoints"),
            _ => None,
        }
    }

    /// Whether this kind is a labels-list container
    pub fn is_list(&self) -> bool {
        self.list_attribute().is_some()
    }

    /// The element kind of a container; singular kinds return themselves
    pub fn element_kind(&self) -> LabelKind {
        match self {
            LabelKind::Classifications => LabelKind::Classification,
            LabelKind::Detections => LabelKind::Detection,
            LabelKind::Polylines => LabelKind::Polyline,
            LabelKind::Keypoints => LabelKind::Keypoint,
            kind => *kind,
        }
    }

    /// The declared type of a built-in attribute of this kind, if any
    ///
    /// Container kinds expose only their list attribute; singular kinds
    /// expose the label document attributes.
    pub fn attribute(&self, name: &str) -> Option<FieldType> {
        if let Some(attr) = self.list_attribute() {
            if name == attr {
                return Some(FieldType::List {
                    element_type: Box::new(FieldType::Label {
                        kind: self.element_kind(),
                    }),
                });
            }
            return None;
        }

        let common = match name {
            "_id" | "label" => Some(FieldType::String),
            "confidence" => Some(FieldType::Float),
            "tags" => Some(FieldType::List {
                element_type: Box::new(FieldType::String),
            }),
            _ => None,
        };
        if common.is_some() {
            return common;
        }

        match (self, name) {
            (LabelKind::Detection, "bounding_box") => Some(FieldType::List {
                element_type: Box::new(FieldType::Float),
            }),
            (LabelKind::Detection, "index") | (LabelKind::Keypoint, "index") => {
                Some(FieldType::Int)
            }
            (LabelKind::Polyline, "points") | (LabelKind::Keypoint, "points") => {
                Some(FieldType::List {
                    element_type: Box::new(FieldType::List {
                        element_type: Box::new(FieldType::Float),
                    }),
                })
            }
            (LabelKind::Polyline, "closed") | (LabelKind::Polyline, "filled") => {
                Some(FieldType::Bool)
            }
            _ => None,
        }
    }

    /// Returns the kind name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            LabelKind::Classification => "Classification",
            LabelKind::Classifications => "Classifications",
            LabelKind::Detection => "Detection",
            LabelKind::Detections => "Detections",
            LabelKind::Polyline => "Polyline",
            LabelKind::Polylines => "Polylines",
            LabelKind::Keypoint => "Keypoint",
            LabelKind::Keypoints => "Keypoints",
        }
    }
}

impl fmt::Display for LabelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Declared type of a collection field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldType {
    /// UTF-8 string
    String,
    /// 64-bit signed integer
    Int,
    /// Boolean
    Bool,
    /// 64-bit floating point
    Float,
    /// Nested document with its own field map
    Object {
        /// Nested field definitions
        fields: BTreeMap<String, FieldType>,
    },
    /// Homogeneous list with a single element type
    List {
        /// Element type (boxed to allow recursive types)
        element_type: Box<FieldType>,
    },
    /// A label-family document
    Label {
        /// The label family
        kind: LabelKind,
    },
}

impl FieldType {
    /// Returns the type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Int => "int",
            FieldType::Bool => "bool",
            FieldType::Float => "float",
            FieldType::Object { .. } => "object",
            FieldType::List { .. } => "list",
            FieldType::Label { kind } => kind.type_name(),
        }
    }

    /// Shorthand for a list of the given element type
    pub fn list_of(element_type: FieldType) -> Self {
        FieldType::List {
            element_type: Box::new(element_type),
        }
    }

    /// Shorthand for a label field of the given kind
    pub fn label(kind: LabelKind) -> Self {
        FieldType::Label { kind }
    }

    /// The labels-list attribute if this type is a container kind
    pub fn list_attribute(&self) -> Option<&'static str> {
        match self {
            FieldType::Label { kind } => kind.list_attribute(),
            _ => None,
        }
    }
}

/// A flat map from top-level field name to declared type
pub type FieldSchema = BTreeMap<String, FieldType>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_attributes() {
        assert_eq!(LabelKind::Detections.list_attribute(), Some("detections"));
        assert_eq!(LabelKind::Keypoints.list_attribute(), Some("keypoints"));
        assert_eq!(LabelKind::Classification.list_attribute(), None);
        assert!(LabelKind::Polylines.is_list());
        assert!(!LabelKind::Polyline.is_list());
    }

    #[test]
    fn test_element_kinds() {
        assert_eq!(LabelKind::Detections.element_kind(), LabelKind::Detection);
        assert_eq!(
            LabelKind::Classifications.element_kind(),
            LabelKind::Classification
        );
        assert_eq!(LabelKind::Detection.element_kind(), LabelKind::Detection);
    }

    #[test]
    fn test_container_attribute_resolution() {
        let inner = LabelKind::Detections.attribute("detections").unwrap();
        assert_eq!(
            inner,
            FieldType::list_of(FieldType::label(LabelKind::Detection))
        );
        assert_eq!(LabelKind::Detections.attribute("label"), None);
    }

    #[test]
    fn test_singular_attribute_resolution() {
        assert_eq!(
            LabelKind::Classification.attribute("label"),
            Some(FieldType::String)
        );
        assert_eq!(
            LabelKind::Detection.attribute("bounding_box"),
            Some(FieldType::list_of(FieldType::Float))
        );
        assert_eq!(LabelKind::Classification.attribute("bounding_box"), None);
    }

    #[test]
    fn test_field_type_serde_shape() {
        let t = FieldType::list_of(FieldType::Float);
        let v = serde_json::to_value(&t).unwrap();
        assert_eq!(v["type"], "list");
        assert_eq!(v["element_type"]["type"], "float");

        let back: FieldType = serde_json::from_value(v).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn test_type_names() {
        assert_eq!(FieldType::String.type_name(), "string");
        assert_eq!(
            FieldType::label(LabelKind::Polylines).type_name(),
            "Polylines"
        );
    }
}
