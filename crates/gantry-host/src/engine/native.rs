use std::collections::BTreeMap;
use std::sync::Arc;

use gantry_api::{
    DefinitionKind, ExecutionPhase, ModuleDefinition, ModuleDescriptor, ModuleError, ModuleId,
    ModuleScope, Result,
};
use parking_lot::RwLock;
use tracing::debug;

use super::ScriptEngine;
use crate::source::ModuleSource;

/// Factory for a module implemented in Rust
///
/// Called once per load attempt with the module's scope; it plays the role of
/// the module's top-level code and returns a fresh descriptor.
pub type NativeModule = Arc<dyn Fn(&ModuleScope) -> anyhow::Result<ModuleDescriptor> + Send + Sync>;

/// Registry of modules implemented in Rust
///
/// Serves as both a [`ModuleSource`] (every registered id is loadable, with
/// kind [`DefinitionKind::Native`]) and the engine that evaluates them.
#[derive(Default)]
pub struct NativeEngine {
    modules: RwLock<BTreeMap<ModuleId, NativeModule>>,
}

impl NativeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module, replacing any previous factory for the same id
    ///
    /// A replaced factory only takes effect the next time the module loads.
    pub fn register<F>(&self, id: impl Into<ModuleId>, factory: F)
    where
        F: Fn(&ModuleScope) -> anyhow::Result<ModuleDescriptor> + Send + Sync + 'static,
    {
        let id = id.into();
        debug!(target: "modules", "Registered native module {}", id);
        self.modules.write().insert(id, Arc::new(factory));
    }

    pub fn unregister(&self, id: &str) -> bool {
        self.modules.write().remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.modules.read().contains_key(id)
    }
}

impl ModuleSource for NativeEngine {
    fn name(&self) -> &str {
        "native"
    }

    fn identifiers(&self) -> Vec<ModuleId> {
        self.modules.read().keys().cloned().collect()
    }

    fn contains(&self, id: &str) -> bool {
        self.modules.read().contains_key(id)
    }

    fn definition(&self, id: &ModuleId) -> std::io::Result<Option<ModuleDefinition>> {
        Ok(self
            .modules
            .read()
            .contains_key(id)
            .then(|| ModuleDefinition::new(id.clone(), DefinitionKind::Native, String::new())))
    }
}

impl ScriptEngine for NativeEngine {
    fn evaluate(&self, scope: ModuleScope) -> Result<ModuleDescriptor> {
        // Clone the factory out so the registry lock is not held while it runs
        let factory = self.modules.read().get(scope.id()).cloned().ok_or_else(|| {
            ModuleError::load(
                scope.id().clone(),
                anyhow::anyhow!("no native module registered as '{}'", scope.id()),
            )
        })?;

        factory(&scope).map_err(|e| match e.downcast::<ModuleError>() {
            Ok(module_error) => module_error,
            Err(e) => ModuleError::execution(scope.id().clone(), ExecutionPhase::Evaluate, e),
        })
    }
}

impl std::fmt::Debug for NativeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.modules.read().keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_api::{Exports, FailureKind, Require, RequireContext};
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

    fn scope(id: &str) -> ModuleScope {
        let context: Weak<dyn RequireContext> = Weak::<Nothing>::new();
        let definition = ModuleDefinition::new(id, DefinitionKind::Native, "");
        ModuleScope::new(definition, Require::new(context, id.into()))
    }

    #[test]
    fn test_source_view() {
        let engine = NativeEngine::new();
        engine.register("two", |_| Ok(ModuleDescriptor::new()));
        engine.register("one", |_| Ok(ModuleDescriptor::new()));

        assert_eq!(engine.identifiers(), vec![ModuleId::new("one"), ModuleId::new("two")]);
        let definition = engine.definition(&"one".into()).unwrap().unwrap();
        assert_eq!(definition.kind, DefinitionKind::Native);
        assert!(engine.definition(&"three".into()).unwrap().is_none());

        assert!(engine.unregister("one"));
        assert!(!engine.contains("one"));
    }

    #[test]
    fn test_evaluate_runs_factory() {
        let engine = NativeEngine::new();
        engine.register("answer", |_| {
            Ok(ModuleDescriptor::new().with_exports(Exports::new(42u32)))
        });

        let descriptor = engine.evaluate(scope("answer")).unwrap();
        assert_eq!(descriptor.exports().unwrap().downcast_ref::<u32>(), Some(&42));
    }

    #[test]
    fn test_factory_error_is_evaluation_failure() {
        let engine = NativeEngine::new();
        engine.register("broken", |_| anyhow::bail!("syntax error on line 1"));

        let err = engine.evaluate(scope("broken")).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Execution);
        assert_eq!(err.phase(), Some(ExecutionPhase::Evaluate));
    }

    #[test]
    fn test_factory_module_error_passes_through() {
        let engine = NativeEngine::new();
        engine.register("needy", |scope| {
            scope.require().require("missing")?;
            Ok(ModuleDescriptor::new())
        });

        let err = engine.evaluate(scope("needy")).unwrap_err();
        assert_eq!(err.kind(), FailureKind::ManagerUnavailable);
    }

    #[test]
    fn test_unregistered_is_load_failure() {
        let engine = NativeEngine::new();
        let err = engine.evaluate(scope("ghost")).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Load);
    }
}
