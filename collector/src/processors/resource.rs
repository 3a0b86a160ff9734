//! Resource processor: edits resource attributes.

use super::BatchProcessor;
use shared::config::{AttributeAction, AttributeEdit, ResourceConfig};
use shared::models::{AttributeValue, Batch, Resource};
use std::sync::Arc;

/// Applies an ordered list of attribute edits to every resource in a batch.
#[derive(Debug, Clone)]
pub struct ResourceProcessor {
    edits: Vec<AttributeEdit>,
}

impl ResourceProcessor {
    /// Creates the processor from its settings.
    #[must_use]
    pub fn new(config: &ResourceConfig) -> Self {
        Self {
            edits: config.attributes.clone(),
        }
    }

    /// Returns `resource` with the edits applied.
    #[must_use]
    pub fn apply(&self, resource: &Resource) -> Resource {
        let mut edited = resource.clone();
        for edit in &self.edits {
            let value = edit.value.as_ref().map(AttributeValue::from);
            let present = edited.attributes.contains_key(&edit.key);
            match (edit.action, value) {
                (AttributeAction::Delete, _) => {
                    edited.attributes.remove(&edit.key);
                }
                (AttributeAction::Insert, Some(value)) if !present => {
                    edited.attributes.insert(edit.key.clone(), value);
                }
                (AttributeAction::Update, Some(value)) if present => {
                    edited.attributes.insert(edit.key.clone(), value);
                }
                (AttributeAction::Upsert, Some(value)) => {
                    edited.attributes.insert(edit.key.clone(), value);
                }
                _ => {}
            }
        }
        edited
    }
}

impl BatchProcessor for ResourceProcessor {
    fn process(&self, mut batch: Batch) -> Batch {
        batch.map_resources(|resource| Arc::new(self.apply(resource)));
        batch
    }
}
