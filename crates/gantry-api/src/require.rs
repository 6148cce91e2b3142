use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Weak;

use crate::descriptor::ModuleDefinition;
use crate::error::{ModuleError, Result};
use crate::exports::Exports;
use crate::id::ModuleId;

/// Something that can satisfy `require` calls on behalf of a module
///
/// Implemented by the host's dependency manager.
pub trait RequireContext: Send + Sync {
    /// Resolve `target` for `requester`, loading it first if needed, and record
    /// `requester` as a dependent of it
    ///
    /// `origin` is the file the requiring code was read from. Targets starting
    /// with `./`, `../` or `/` name files relative to it rather than modules.
    fn require(
        &self,
        requester: &ModuleId,
        origin: Option<&Path>,
        target: &str,
    ) -> Result<Exports>;
}

/// The `require` capability handed to module code
///
/// Cheap to clone, so generators and other hooks can capture it. Holds only a
/// weak reference to the manager; requiring after the manager is gone fails with
/// [`ModuleError::ManagerUnavailable`].
#[derive(Clone)]
pub struct Require {
    context: Weak<dyn RequireContext>,
    requester: ModuleId,
    origin: Option<PathBuf>,
}

impl Require {
    pub fn new(context: Weak<dyn RequireContext>, requester: ModuleId) -> Self {
        Self {
            context,
            requester,
            origin: None,
        }
    }

    /// Resolve relative targets against `origin`
    pub fn with_origin(mut self, origin: impl Into<PathBuf>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn require(&self, target: &str) -> Result<Exports> {
        let context = self
            .context
            .upgrade()
            .ok_or(ModuleError::ManagerUnavailable)?;
        context.require(&self.requester, self.origin.as_deref(), target)
    }

    /// The module on whose behalf this handle requires
    pub fn requester(&self) -> &ModuleId {
        &self.requester
    }

    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }
}

impl fmt::Debug for Require {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Require")
            .field("requester", &self.requester)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// Everything an engine adapter gets to evaluate one module
#[derive(Debug, Clone)]
pub struct ModuleScope {
    definition: ModuleDefinition,
    require: Require,
}

impl ModuleScope {
    pub fn new(definition: ModuleDefinition, require: Require) -> Self {
        Self {
            definition,
            require,
        }
    }

    pub fn id(&self) -> &ModuleId {
        &self.definition.id
    }

    pub fn definition(&self) -> &ModuleDefinition {
        &self.definition
    }

    pub fn require(&self) -> &Require {
        &self.require
    }
}
