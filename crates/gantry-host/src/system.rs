//! Host-provided modules with static exports
//!
//! System modules can be `require`d like any other module but are never loaded
//! or unloaded through the manager. The host registers them up front and may
//! replace them later through `DependencyManager::set_system_module`, which
//! reloads every module that required the old value.

use std::collections::BTreeMap;

use gantry_api::{Exports, ModuleError, ModuleId, Result};
use parking_lot::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
pub struct SystemModules {
    modules: RwLock<BTreeMap<ModuleId, Exports>>,
}

/// Labels are lowercase ascii letters, digits, `-` and `_`
pub fn is_valid_label(label: &str) -> bool {
    !label.is_empty()
        && label
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '-' | '_'))
}

fn check_label(label: &str) -> Result<ModuleId> {
    if is_valid_label(label) {
        Ok(ModuleId::new(label))
    } else {
        Err(ModuleError::InvalidName {
            name: label.to_string(),
        })
    }
}

impl SystemModules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new system module; fails if the label is taken
    pub fn add(&self, label: &str, exports: Exports) -> Result<()> {
        let id = check_label(label)?;
        let mut modules = self.modules.write();
        if modules.contains_key(&id) {
            return Err(ModuleError::AlreadyRegistered { id });
        }
        debug!(target: "modules", "Registered system module {}", id);
        modules.insert(id, exports);
        Ok(())
    }

    /// Register or replace a system module, returning the previous exports
    ///
    /// Does not touch dependents; use `DependencyManager::set_system_module`
    /// to also reload them.
    pub fn set(&self, label: &str, exports: Exports) -> Result<Option<Exports>> {
        let id = check_label(label)?;
        debug!(target: "modules", "Set system module {}", id);
        Ok(self.modules.write().insert(id, exports))
    }

    pub fn has(&self, label: &str) -> bool {
        self.modules.read().contains_key(label)
    }

    pub fn get(&self, label: &str) -> Option<Exports> {
        self.modules.read().get(label).cloned()
    }

    pub fn labels(&self) -> Vec<ModuleId> {
        self.modules.read().keys().cloned().collect()
    }
}
