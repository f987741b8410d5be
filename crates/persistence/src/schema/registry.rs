//! Field access schema registry.
//!
//! Holds one [`FieldAccessSchema`] per entity type, registered at startup
//! and shared by every repository instance afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::access::FieldAccessSchema;
use crate::error::{SchemaError, SchemaResult};

/// Registry of schemas keyed by entity type.
#[derive(Default)]
pub struct SchemaRegistry {
    schemas: RwLock<HashMap<String, Arc<FieldAccessSchema>>>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of registered schemas.
    pub fn len(&self) -> usize {
        self.schemas.read().len()
    }

    /// Returns true if no schema is registered.
    pub fn is_empty(&self) -> bool {
        self.schemas.read().is_empty()
    }

    /// Registers a schema under its entity type.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::AlreadyRegistered`] if the entity type already
    /// has a schema.
    pub fn register(&self, schema: FieldAccessSchema) -> SchemaResult<Arc<FieldAccessSchema>> {
        let mut schemas = self.schemas.write();
        let entity_type = schema.entity_type().to_string();
        if schemas.contains_key(&entity_type) {
            return Err(SchemaError::AlreadyRegistered { entity_type });
        }
        let schema = Arc::new(schema);
        schemas.insert(entity_type.clone(), Arc::clone(&schema));
        debug!(entity_type = %entity_type, "registered field access schema");
        Ok(schema)
    }

    /// Returns the schema of an entity type, if registered.
    pub fn get(&self, entity_type: &str) -> Option<Arc<FieldAccessSchema>> {
        self.schemas.read().get(entity_type).cloned()
    }

    /// Returns the schema of an entity type.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::NotRegistered`] if no schema was registered.
    pub fn require(&self, entity_type: &str) -> SchemaResult<Arc<FieldAccessSchema>> {
        self.get(entity_type).ok_or_else(|| SchemaError::NotRegistered {
            entity_type: entity_type.to_string(),
        })
    }

    /// Returns the registered entity types, sorted.
    pub fn entity_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.schemas.read().keys().cloned().collect();
        types.sort();
        types
    }
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("entity_types", &self.entity_types())
            .finish()
    }
}
