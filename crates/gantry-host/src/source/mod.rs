//! Providers of raw module definitions

mod directory;
mod memory;

pub(crate) use directory::{is_relative_target, module_entries, resolve_relative};
pub use directory::DirectorySource;
pub use memory::MemorySource;

use gantry_api::{ModuleDefinition, ModuleId};

/// A provider of identifier -> raw module definition
///
/// Sources only read definitions; they never evaluate module code.
pub trait ModuleSource: Send + Sync {
    /// Short name used in log messages
    fn name(&self) -> &str;

    /// Identifiers of every module this source can currently provide
    fn identifiers(&self) -> Vec<ModuleId>;

    /// Whether this source can provide `id`, without listing everything
    fn contains(&self, id: &str) -> bool {
        self.identifiers().iter().any(|candidate| candidate.as_str() == id)
    }

    /// Read the definition for `id`, or `None` when this source does not have it
    fn definition(&self, id: &ModuleId) -> std::io::Result<Option<ModuleDefinition>>;
}
