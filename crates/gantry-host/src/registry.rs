use std::sync::Arc;

use gantry_api::DefinitionKind;
use tracing::debug;

use crate::config::ModulesConfig;
use crate::engine::{EngineRouter, JsonEngine, NativeEngine, ScriptEngine};
use crate::manager::DependencyManager;
use crate::resolver::ModuleResolver;
use crate::source::DirectorySource;

/// Create a dependency manager from config
///
/// Modules come from the configured module directory first and from `natives`
/// second. JSON and native modules are handled by built-in engines; script
/// modules need `script_engine`, without which they fail to load.
pub fn create_manager_from_config(
    config: &ModulesConfig,
    natives: Arc<NativeEngine>,
    script_engine: Option<Arc<dyn ScriptEngine>>,
) -> Arc<DependencyManager> {
    let module_dir = config.module_dir();
    debug!(target: "modules", "Loading modules from: {}", module_dir.display());

    let resolver = ModuleResolver::new()
        .with_source(Arc::new(DirectorySource::new(module_dir)))
        .with_source(natives.clone());

    let mut router = EngineRouter::new()
        .with_engine(DefinitionKind::Json, Arc::new(JsonEngine))
        .with_engine(DefinitionKind::Native, natives);
    if let Some(script_engine) = script_engine {
        router = router.with_engine(DefinitionKind::Script, script_engine);
    } else {
        debug!(target: "modules", "No script engine configured; script modules will fail to load");
    }

    DependencyManager::new(resolver, Arc::new(router))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_api::{Exports, FailureKind, ModuleDescriptor};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_manager_from_config() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("settings.json"), r#"{"motd": "hello"}"#).unwrap();
        fs::write(temp_dir.path().join("script.js"), "module.exports = 1").unwrap();

        let natives = Arc::new(NativeEngine::new());
        natives.register("greeter", |scope| {
            let settings = scope.require().require("settings")?;
            let motd = settings.as_json().and_then(|v| v["motd"].as_str()).unwrap_or_default();
            Ok(ModuleDescriptor::new().with_exports(Exports::new(format!("{}, world", motd))))
        });

        let config = ModulesConfig {
            module_dir: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        };
        let manager = create_manager_from_config(&config, natives, None);

        let ids: Vec<String> = manager.loadable_modules().iter().map(|id| id.to_string()).collect();
        assert_eq!(ids, vec!["greeter", "script", "settings"]);

        let greeter = manager.load("greeter").unwrap();
        assert_eq!(
            greeter.exports().downcast_ref::<String>().map(String::as_str),
            Some("hello, world")
        );

        let err = manager.load("script").unwrap_err();
        assert_eq!(err.kind(), FailureKind::Load);

        manager.shutdown();
    }
}
