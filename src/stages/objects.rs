//! Object-level selection: keeping or dropping individual labels
//! referenced by id.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::collection::SampleCollection;
use crate::expr::field;
use crate::observability::Logger;
use crate::schema::SchemaError;

use super::errors::{StageError, StageResult};
use super::fields::select_fields_pipeline;
use super::filter::filter_labels_pipeline;

/// A reference to one label object within one sample's field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub sample_id: String,
    pub field: String,
    pub object_id: String,
}

impl ObjectRef {
    pub fn new(
        sample_id: impl Into<String>,
        field: impl Into<String>,
        object_id: impl Into<String>,
    ) -> ObjectRef {
        ObjectRef {
            sample_id: sample_id.into(),
            field: field.into(),
            object_id: object_id.into(),
        }
    }
}

/// Object references regrouped for compilation: the distinct samples
/// they live in, and the object ids per field, both sorted.
#[derive(Debug, Clone, Default)]
pub(crate) struct GroupedObjects {
    pub(crate) sample_ids: Vec<String>,
    pub(crate) fields: BTreeMap<String, Vec<String>>,
}

pub(crate) fn group_objects(objects: &[ObjectRef]) -> StageResult<GroupedObjects> {
    let mut sample_ids = BTreeSet::new();
    let mut fields: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for object in objects {
        validate_id(&object.sample_id)?;
        validate_id(&object.object_id)?;
        sample_ids.insert(object.sample_id.clone());
        fields
            .entry(object.field.clone())
            .or_default()
            .insert(object.object_id.clone());
    }

    Ok(GroupedObjects {
        sample_ids: sample_ids.into_iter().collect(),
        fields: fields
            .into_iter()
            .map(|(name, ids)| (name, ids.into_iter().collect()))
            .collect(),
    })
}

pub(crate) fn validate_id(id: &str) -> StageResult<()> {
    Uuid::parse_str(id).map_err(|_| StageError::InvalidId(id.to_string()))?;
    Ok(())
}

/// Restricts the view to exactly the referenced objects: their samples,
/// their fields, and within each field only the listed ids.
pub(crate) fn select_objects_pipeline(
    collection: &dyn SampleCollection,
    objects: &[ObjectRef],
) -> StageResult<Vec<Value>> {
    let grouped = group_objects(objects)?;
    let field_names: Vec<String> = grouped.fields.keys().cloned().collect();

    let mut ops = vec![json!({"$match": {"_id": {"$in": grouped.sample_ids}}})];
    ops.extend(select_fields_pipeline(collection, &field_names)?);
    for (name, ids) in &grouped.fields {
        ops.extend(label_id_filter(collection, name, ids, true)?);
    }
    Ok(ops)
}

/// Drops the referenced objects from their fields, leaving everything
/// else in the view untouched.
pub(crate) fn exclude_objects_pipeline(
    collection: &dyn SampleCollection,
    objects: &[ObjectRef],
) -> StageResult<Vec<Value>> {
    let grouped = group_objects(objects)?;

    let mut ops = Vec::new();
    for (name, ids) in &grouped.fields {
        ops.extend(label_id_filter(collection, name, ids, false)?);
    }
    Ok(ops)
}

/// Filters a label field down to (or out of) the given object ids.
/// Fields that do not hold labels are logged and skipped rather than
/// failing the whole stage.
fn label_id_filter(
    collection: &dyn SampleCollection,
    name: &str,
    ids: &[String],
    keep: bool,
) -> StageResult<Vec<Value>> {
    let membership = field("_id").is_in(ids.iter().map(String::as_str));
    let filter = if keep { membership } else { !membership };

    match filter_labels_pipeline(collection, name, &filter, false) {
        Ok(ops) => Ok(ops),
        Err(StageError::Schema(SchemaError::NotALabelField { .. })) => {
            Logger::warn("UNSUPPORTED_LABEL_FIELD", &[("field", name)]);
            Ok(Vec::new())
        }
        Err(err) => Err(err),
    }
}
