//! Enumeration and lookup of loadable modules across sources

use std::collections::BTreeSet;
use std::sync::Arc;

use gantry_api::{ModuleDefinition, ModuleError, ModuleId, Result};
use tracing::debug;

use crate::source::ModuleSource;

/// Ordered list of module sources
///
/// The resolver never evaluates module code: a module whose definition is
/// present but fails to evaluate is still loadable.
#[derive(Default, Clone)]
pub struct ModuleResolver {
    sources: Vec<Arc<dyn ModuleSource>>,
}

impl ModuleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a source; earlier sources win when two provide the same identifier
    pub fn with_source(mut self, source: Arc<dyn ModuleSource>) -> Self {
        self.add_source(source);
        self
    }

    pub fn add_source(&mut self, source: Arc<dyn ModuleSource>) {
        debug!(target: "modules", "Adding module source: {}", source.name());
        self.sources.push(source);
    }

    /// Sorted, de-duplicated identifiers of every loadable module
    pub fn loadable_modules(&self) -> Vec<ModuleId> {
        self.sources
            .iter()
            .flat_map(|source| source.identifiers())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Whether any source provides `id`; asks each source about `id` alone
    pub fn contains(&self, id: &str) -> bool {
        self.sources.iter().any(|source| source.contains(id))
    }

    /// Read the definition of `id` from the first source that has it
    pub fn resolve(&self, id: &ModuleId) -> Result<Option<ModuleDefinition>> {
        for source in &self.sources {
            match source.definition(id) {
                Ok(Some(definition)) => {
                    debug!(
                        target: "modules",
                        "Resolved module {} from {} source",
                        id,
                        source.name()
                    );
                    return Ok(Some(definition));
                }
                Ok(None) => continue,
                Err(e) => return Err(ModuleError::load(id.clone(), e)),
            }
        }
        Ok(None)
    }
}

impl std::fmt::Debug for ModuleResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.sources.iter().map(|source| source.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use gantry_api::{DefinitionKind, FailureKind};

    struct BrokenSource;

    impl ModuleSource for BrokenSource {
        fn name(&self) -> &str {
            "broken"
        }

        fn identifiers(&self) -> Vec<ModuleId> {
            vec!["broken".into()]
        }

        fn definition(&self, _id: &ModuleId) -> std::io::Result<Option<ModuleDefinition>> {
            Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "bad bytes"))
        }
    }

    /// Answers lookups for one id but cannot list its modules
    struct UnlistableSource;

    impl ModuleSource for UnlistableSource {
        fn name(&self) -> &str {
            "unlistable"
        }

        fn identifiers(&self) -> Vec<ModuleId> {
            panic!("identifiers() called on a single-id lookup");
        }

        fn contains(&self, id: &str) -> bool {
            id == "only"
        }

        fn definition(&self, id: &ModuleId) -> std::io::Result<Option<ModuleDefinition>> {
            Ok((id == "only")
                .then(|| ModuleDefinition::new(id.clone(), DefinitionKind::Json, "1")))
        }
    }

    #[test]
    fn test_contains_does_not_enumerate() {
        let memory = Arc::new(MemorySource::new());
        memory.insert_json("a", "1");

        let resolver = ModuleResolver::new()
            .with_source(memory)
            .with_source(Arc::new(UnlistableSource));
        assert!(resolver.contains("a"));
        assert!(resolver.contains("only"));
        assert!(!resolver.contains("other"));
    }

    #[test]
    fn test_union_is_sorted_and_unique() {
        let first = Arc::new(MemorySource::new());
        first.insert_json("b", "1");
        first.insert_json("a", "1");
        let second = Arc::new(MemorySource::new());
        second.insert_json("b", "2");
        second.insert_json("c", "2");

        let resolver = ModuleResolver::new().with_source(first).with_source(second);
        let ids: Vec<String> = resolver.loadable_modules().iter().map(|id| id.to_string()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_first_source_wins() {
        let first = Arc::new(MemorySource::new());
        first.insert_json("b", "1");
        let second = Arc::new(MemorySource::new());
        second.insert_json("b", "2");

        let resolver = ModuleResolver::new().with_source(first).with_source(second);
        let definition = resolver.resolve(&"b".into()).unwrap().unwrap();
        assert_eq!(definition.source, "1");
        assert_eq!(definition.kind, DefinitionKind::Json);
    }

    #[test]
    fn test_source_error_is_load_failure() {
        let resolver = ModuleResolver::new().with_source(Arc::new(BrokenSource));
        let err = resolver.resolve(&"broken".into()).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Load);
        assert!(resolver.contains("broken"));
        assert!(!resolver.contains("other"));
    }
}
