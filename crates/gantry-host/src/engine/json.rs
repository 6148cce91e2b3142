use gantry_api::{Exports, ModuleDescriptor, ModuleError, ModuleScope, Result};

use super::ScriptEngine;

/// Engine for JSON modules: the parsed document becomes the static exports
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonEngine;

impl ScriptEngine for JsonEngine {
    fn evaluate(&self, scope: ModuleScope) -> Result<ModuleDescriptor> {
        let definition = scope.definition();
        let value: serde_json::Value = serde_json::from_str(&definition.source)
            .map_err(|e| ModuleError::load(scope.id().clone(), e))?;
        Ok(ModuleDescriptor::new().with_exports(Exports::json(value)))
    }
}
