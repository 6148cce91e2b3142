use std::collections::HashMap;
use std::sync::Arc;

use gantry_api::{DefinitionKind, ModuleDescriptor, ModuleError, ModuleScope, Result};

use super::ScriptEngine;

/// Dispatches evaluation to the engine registered for a definition's kind
#[derive(Default, Clone)]
pub struct EngineRouter {
    engines: HashMap<DefinitionKind, Arc<dyn ScriptEngine>>,
}

impl EngineRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_engine(mut self, kind: DefinitionKind, engine: Arc<dyn ScriptEngine>) -> Self {
        self.engines.insert(kind, engine);
        self
    }

    pub fn handles(&self, kind: DefinitionKind) -> bool {
        self.engines.contains_key(&kind)
    }
}

impl ScriptEngine for EngineRouter {
    fn evaluate(&self, scope: ModuleScope) -> Result<ModuleDescriptor> {
        let kind = scope.definition().kind;
        match self.engines.get(&kind) {
            Some(engine) => engine.evaluate(scope),
            None => Err(ModuleError::load(
                scope.id().clone(),
                anyhow::anyhow!("no engine for {:?} modules", kind),
            )),
        }
    }
}

impl std::fmt::Debug for EngineRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.engines.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::JsonEngine;
    use gantry_api::{Exports, FailureKind, ModuleDefinition, ModuleId, Require, RequireContext};
    use std::sync::Weak;

    struct Nothing;

    impl RequireContext for Nothing {
        fn require(
            &self,
            _requester: &ModuleId,
            _origin: Option<&std::path::Path>,
            target: &str,
        ) -> Result<Exports> {
            Err(ModuleError::not_found(target))
        }
    }

    fn scope(kind: DefinitionKind, source: &str) -> ModuleScope {
        let context: Weak<dyn RequireContext> = Weak::<Nothing>::new();
        let definition = ModuleDefinition::new("m", kind, source);
        ModuleScope::new(definition, Require::new(context, "m".into()))
    }

    #[test]
    fn test_dispatch_by_kind() {
        let router = EngineRouter::new().with_engine(DefinitionKind::Json, Arc::new(JsonEngine));
        assert!(router.handles(DefinitionKind::Json));

        let descriptor = router.evaluate(scope(DefinitionKind::Json, "[1, 2]")).unwrap();
        assert_eq!(descriptor.exports().unwrap().as_json().unwrap()[1], 2);
    }

    #[test]
    fn test_missing_engine() {
        let router = EngineRouter::new();
        let err = router.evaluate(scope(DefinitionKind::Script, "")).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Load);
        assert!(format!("{:#}", anyhow::Error::new(err)).contains("no engine for Script"));
    }
}
