//! In-memory sample store
//!
//! Samples and frames are plain JSON documents. Insertion assigns each
//! sample its `_id` (uuid v4 when absent) and its persistent `_rand` value,
//! which the sampling stages key on.

use crate::collection::{CollectionError, CollectionResult, SampleCollection};
use crate::engine::DocumentSource;
use crate::observability::Logger;
use crate::schema::{FieldSchema, FieldType, MediaType};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// An in-memory sample collection
pub struct MemoryCollection {
    media_type: MediaType,
    fields: FieldSchema,
    frame_fields: FieldSchema,
    samples: Vec<Value>,
    frames: BTreeMap<String, Vec<Value>>,
    indexes: RefCell<BTreeSet<String>>,
    rng: StdRng,
}

impl MemoryCollection {
    /// Creates an empty image collection with the default sample fields
    pub fn image() -> Self {
        Self::new(MediaType::Image)
    }

    /// Creates an empty video collection with the default sample and frame
    /// fields
    pub fn video() -> Self {
        Self::new(MediaType::Video)
    }

    fn new(media_type: MediaType) -> Self {
        let mut fields = FieldSchema::new();
        fields.insert("_id".into(), FieldType::String);
        fields.insert("filepath".into(), FieldType::String);
        fields.insert("tags".into(), FieldType::list_of(FieldType::String));
        fields.insert(
            "metadata".into(),
            FieldType::Object {
                fields: [
                    ("size_bytes".to_string(), FieldType::Int),
                    ("mime_type".to_string(), FieldType::String),
                ]
                .into_iter()
                .collect(),
            },
        );
        fields.insert("_rand".into(), FieldType::Float);

        let mut frame_fields = FieldSchema::new();
        if media_type == MediaType::Video {
            frame_fields.insert("_id".into(), FieldType::String);
            frame_fields.insert("frame_number".into(), FieldType::Int);
        }

        Self {
            media_type,
            fields,
            frame_fields,
            samples: Vec::new(),
            frames: BTreeMap::new(),
            indexes: RefCell::new(BTreeSet::new()),
            rng: StdRng::from_entropy(),
        }
    }

    /// Seeds the `_rand` generator, making insertion order reproducible
    pub fn with_rand_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Declares a sample-level field
    pub fn declare_field(&mut self, name: &str, field_type: FieldType) {
        self.fields.insert(name.to_string(), field_type);
    }

    /// Declares a frame-level field
    pub fn declare_frame_field(&mut self, name: &str, field_type: FieldType) {
        self.frame_fields.insert(name.to_string(), field_type);
    }

    /// Inserts a sample document, returning its id
    ///
    /// Assigns `_id`, `tags`, and `_rand` when absent. `filepath` is
    /// required.
    pub fn add_sample(&mut self, doc: Value) -> CollectionResult<String> {
        let mut doc = match doc {
            Value::Object(map) => map,
            _ => return Err(CollectionError::NotADocument),
        };

        if !doc.get("filepath").map_or(false, Value::is_string) {
            return Err(CollectionError::MissingFilepath);
        }

        let id = match doc.get("_id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                let id = Uuid::new_v4().to_string();
                doc.insert("_id".into(), Value::String(id.clone()));
                id
            }
        };

        if !doc.contains_key("tags") {
            doc.insert("tags".into(), Value::Array(Vec::new()));
        }

        if !doc.contains_key("_rand") {
            let rand: f64 = self.rng.gen();
            doc.insert("_rand".into(), rand.into());
        }

        self.samples.push(Value::Object(doc));
        Ok(id)
    }

    /// Inserts a frame document for the given sample, returning the frame id
    pub fn add_frame(&mut self, sample_id: &str, doc: Value) -> CollectionResult<String> {
        if self.media_type != MediaType::Video {
            return Err(CollectionError::NotAVideoCollection);
        }

        if !self.sample_ids().iter().any(|id| id == sample_id) {
            return Err(CollectionError::UnknownSampleId(sample_id.to_string()));
        }

        let mut doc = match doc {
            Value::Object(map) => map,
            _ => return Err(CollectionError::NotADocument),
        };

        if !doc.get("frame_number").map_or(false, Value::is_i64) {
            return Err(CollectionError::MissingFrameNumber);
        }

        let id = match doc.get("_id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                let id = Uuid::new_v4().to_string();
                doc.insert("_id".into(), Value::String(id.clone()));
                id
            }
        };

        self.frames
            .entry(sample_id.to_string())
            .or_default()
            .push(Value::Object(doc));

        Ok(id)
    }

    /// The number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Insertion-ordered sample ids
    pub fn sample_ids(&self) -> Vec<String> {
        self.samples
            .iter()
            .filter_map(|s| s.get("_id").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }

    /// The paths an index has been created on
    pub fn index_paths(&self) -> BTreeSet<String> {
        self.indexes.borrow().clone()
    }
}

impl SampleCollection for MemoryCollection {
    fn media_type(&self) -> MediaType {
        self.media_type
    }

    fn field_schema(&self) -> &FieldSchema {
        &self.fields
    }

    fn frame_field_schema(&self) -> &FieldSchema {
        &self.frame_fields
    }

    fn create_index(&self, path: &str) {
        let created = self.indexes.borrow_mut().insert(path.to_string());
        if created {
            Logger::info("INDEX_CREATED", &[("path", path)]);
        }
    }
}

impl DocumentSource for MemoryCollection {
    fn documents(&self, attach_frames: bool) -> Vec<Value> {
        let mut docs = self.samples.clone();

        if attach_frames {
            for doc in &mut docs {
                let id = doc.get("_id").and_then(Value::as_str).unwrap_or_default();
                let mut frames = self.frames.get(id).cloned().unwrap_or_default();
                frames.sort_by_key(|f| f.get("frame_number").and_then(Value::as_i64).unwrap_or(0));
                doc["frames"] = Value::Array(frames);
            }
        }

        docs
    }
}
