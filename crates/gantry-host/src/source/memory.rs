use std::collections::BTreeMap;

use gantry_api::{DefinitionKind, ModuleDefinition, ModuleId};
use parking_lot::RwLock;

use super::ModuleSource;

/// In-memory module source
///
/// Definitions can be replaced at any time; the next load of a module picks up
/// whatever is stored then.
#[derive(Debug, Default)]
pub struct MemorySource {
    definitions: RwLock<BTreeMap<ModuleId, ModuleDefinition>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, definition: ModuleDefinition) {
        self.definitions
            .write()
            .insert(definition.id.clone(), definition);
    }

    /// Store a JSON module under `id`
    pub fn insert_json(&self, id: impl Into<ModuleId>, source: impl Into<String>) {
        self.insert(ModuleDefinition::new(id, DefinitionKind::Json, source));
    }

    pub fn remove(&self, id: &str) -> Option<ModuleDefinition> {
        self.definitions.write().remove(id)
    }
}

impl ModuleSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    fn identifiers(&self) -> Vec<ModuleId> {
        self.definitions.read().keys().cloned().collect()
    }

    fn contains(&self, id: &str) -> bool {
        self.definitions.read().contains_key(id)
    }

    fn definition(&self, id: &ModuleId) -> std::io::Result<Option<ModuleDefinition>> {
        Ok(self.definitions.read().get(id).cloned())
    }
}
