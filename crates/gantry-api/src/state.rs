use std::fmt;

/// Lifecycle state of a module identifier
///
/// `Failed` is transient: it is published while a failed load or a failed
/// teardown is being reported and always resolves to `Unloaded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleState {
    Unloaded,
    Loading,
    Loaded,
    Unloading,
    Failed,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModuleState::Unloaded => "unloaded",
            ModuleState::Loading => "loading",
            ModuleState::Loaded => "loaded",
            ModuleState::Unloading => "unloading",
            ModuleState::Failed => "failed",
        };
        f.write_str(name)
    }
}
