//! Views: ordered stage lists with stable identities and a serialized
//! form.

use serde_json::{json, Value};
use uuid::Uuid;

use crate::collection::SampleCollection;
use crate::stages::{Stage, StageRegistry};

use super::composer::{compile_view, Plan};
use super::errors::{PlanError, PlanResult};

/// One stage in a view, together with its serialization identity.
///
/// The uuid is generated lazily on first serialization and preserved
/// across round trips, so front-end tooling can reference a specific
/// stage of a stored view.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewStage {
    stage: Stage,
    uuid: Option<String>,
}

impl ViewStage {
    fn new(stage: Stage) -> ViewStage {
        ViewStage { stage, uuid: None }
    }

    fn restore(stage: Stage, uuid: Option<String>) -> ViewStage {
        ViewStage { stage, uuid }
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    /// The stage's identity, once one has been assigned.
    pub fn uuid(&self) -> Option<&str> {
        self.uuid.as_deref()
    }

    fn to_json(&mut self) -> Value {
        let uuid = self
            .uuid
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();
        let params: Vec<Value> = self
            .stage
            .params()
            .into_iter()
            .map(|(name, value)| json!([name, value]))
            .collect();
        json!({"kind": self.stage.kind(), "uuid": uuid, "params": params})
    }
}

/// An ordered, composable list of view stages.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct View {
    stages: Vec<ViewStage>,
}

impl View {
    pub fn new() -> View {
        View { stages: Vec::new() }
    }

    /// Appends a stage, returning the view for chaining.
    pub fn add_stage(mut self, stage: Stage) -> View {
        self.stages.push(ViewStage::new(stage));
        self
    }

    pub fn stages(&self) -> &[ViewStage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Removes the stage with the given uuid, returning it if present.
    /// Stages that were never serialized have no uuid yet.
    pub fn remove_stage(&mut self, uuid: &str) -> Option<Stage> {
        let position = self
            .stages
            .iter()
            .position(|entry| entry.uuid() == Some(uuid))?;
        Some(self.stages.remove(position).stage)
    }

    /// Serializes the view, assigning uuids to stages that lack one.
    pub fn to_json(&mut self) -> Value {
        let stages: Vec<Value> = self.stages.iter_mut().map(ViewStage::to_json).collect();
        json!({ "stages": stages })
    }

    /// Rebuilds a view from its serialized form via the registry,
    /// preserving stage uuids.
    pub fn from_json(value: &Value, registry: &StageRegistry) -> PlanResult<View> {
        let doc = value
            .as_object()
            .ok_or_else(|| PlanError::MalformedView("expected a JSON object".to_string()))?;
        let docs = doc
            .get("stages")
            .and_then(Value::as_array)
            .ok_or_else(|| PlanError::MalformedView("missing 'stages' array".to_string()))?;

        let mut stages = Vec::with_capacity(docs.len());
        for (index, stage_doc) in docs.iter().enumerate() {
            let (stage, uuid) = registry
                .decode(stage_doc)
                .map_err(|source| PlanError::Decode { index, source })?;
            stages.push(ViewStage::restore(stage, uuid));
        }
        Ok(View { stages })
    }

    /// Compiles the view against a collection into an executable plan.
    pub fn compile(&self, collection: &dyn SampleCollection) -> PlanResult<Plan> {
        compile_view(self, collection)
    }
}
