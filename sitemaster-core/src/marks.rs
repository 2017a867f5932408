use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::error::StoreError;

/// A catalog entry naming one category of finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mark {
    pub id: i64,
    pub machine_name: String,
    pub name: String,
    pub description: String,
}

/// What a plugin declares about a mark it may emit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkDefinition {
    pub machine_name: String,
    pub name: String,
    pub description: String,
}

impl MarkDefinition {
    pub fn new(machine_name: &str, name: &str, description: &str) -> Self {
        Self {
            machine_name: machine_name.to_string(),
            name: name.to_string(),
            description: description.to_string(),
        }
    }
}

/// Process-wide mark lookup shared by all passes.
pub trait MarkCatalog: Send + Sync {
    /// Look up a mark by machine name, creating a bare entry if absent.
    fn mark(&self, machine_name: &str) -> Result<Mark, StoreError>;

    /// Insert a mark or refresh its display name and description.
    fn define(&self, definition: &MarkDefinition) -> Result<Mark, StoreError>;
}

#[derive(Default)]
pub struct InMemoryMarkCatalog {
    marks: RwLock<HashMap<String, Mark>>,
}

impl InMemoryMarkCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.marks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn upsert(&self, definition: &MarkDefinition, overwrite: bool) -> Mark {
        let mut marks = self.marks.write().unwrap_or_else(PoisonError::into_inner);
        let next_id = marks.len() as i64 + 1;

        let mark = marks
            .entry(definition.machine_name.clone())
            .or_insert_with(|| Mark {
                id: next_id,
                machine_name: definition.machine_name.clone(),
                name: definition.name.clone(),
                description: definition.description.clone(),
            });

        if overwrite {
            mark.name = definition.name.clone();
            mark.description = definition.description.clone();
        }
        mark.clone()
    }
}

impl MarkCatalog for InMemoryMarkCatalog {
    fn mark(&self, machine_name: &str) -> Result<Mark, StoreError> {
        if let Some(mark) = self
            .marks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(machine_name)
        {
            return Ok(mark.clone());
        }

        Ok(self.upsert(&MarkDefinition::new(machine_name, machine_name, ""), false))
    }

    fn define(&self, definition: &MarkDefinition) -> Result<Mark, StoreError> {
        Ok(self.upsert(definition, true))
    }
}
