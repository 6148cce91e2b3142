use std::fmt;
use std::path::PathBuf;

use crate::error::ModuleError;
use crate::exports::Exports;
use crate::id::ModuleId;

/// Factory producing the per-activation state of a module
pub type Generator = Box<dyn FnOnce() -> anyhow::Result<Activation> + Send>;

/// Hook invoked before a module is unloaded
pub type DisableHook = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

/// Teardown callback captured from an [`Activation`]
pub type CloseHook = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

/// Terminal sink for failures of a module's own code
pub type ErrorHook = Box<dyn FnOnce(&ModuleError) -> anyhow::Result<()> + Send>;

/// How the source of a module definition should be interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefinitionKind {
    /// Script source handed to a scripting engine adapter
    Script,
    /// A JSON document exported as-is
    Json,
    /// A module implemented in Rust and registered with the host
    Native,
}

/// Raw, unevaluated definition of a module as provided by a module source
#[derive(Debug, Clone)]
pub struct ModuleDefinition {
    pub id: ModuleId,
    pub kind: DefinitionKind,
    pub source: String,
    /// Where the definition was read from, when it came from disk
    pub origin: Option<PathBuf>,
}

impl ModuleDefinition {
    pub fn new(id: impl Into<ModuleId>, kind: DefinitionKind, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            source: source.into(),
            origin: None,
        }
    }

    pub fn with_origin(mut self, origin: impl Into<PathBuf>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

/// The live instance produced by a module's generator
pub struct Activation {
    /// Supersedes the descriptor's static exports for this load
    pub exports: Exports,
    pub close: Option<CloseHook>,
}

impl Activation {
    pub fn new(exports: Exports) -> Self {
        Self {
            exports,
            close: None,
        }
    }

    pub fn with_close<F>(mut self, close: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.close = Some(Box::new(close));
        self
    }
}

impl fmt::Debug for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Activation")
            .field("exports", &self.exports)
            .field("close", &self.close.is_some())
            .finish()
    }
}

/// Parsed, not-yet-activated representation of one module
///
/// Every hook is optional; an absent hook is a distinct state, not a no-op.
/// A descriptor is produced fresh for every load attempt and consumed by it.
#[derive(Default)]
pub struct ModuleDescriptor {
    exports: Option<Exports>,
    generator: Option<Generator>,
    disable: Option<DisableHook>,
    on_error: Option<ErrorHook>,
    logger_name: Option<String>,
}

impl ModuleDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exports(mut self, exports: Exports) -> Self {
        self.exports = Some(exports);
        self
    }

    pub fn with_generator<F>(mut self, generator: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<Activation> + Send + 'static,
    {
        self.generator = Some(Box::new(generator));
        self
    }

    pub fn with_disable<F>(mut self, disable: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.disable = Some(Box::new(disable));
        self
    }

    pub fn with_on_error<F>(mut self, on_error: F) -> Self
    where
        F: FnOnce(&ModuleError) -> anyhow::Result<()> + Send + 'static,
    {
        self.on_error = Some(Box::new(on_error));
        self
    }

    /// Name of the logger unhandled failures of this module are attributed to
    pub fn with_logger_name(mut self, name: impl Into<String>) -> Self {
        self.logger_name = Some(name.into());
        self
    }

    pub fn exports(&self) -> Option<&Exports> {
        self.exports.as_ref()
    }

    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    pub fn has_disable(&self) -> bool {
        self.disable.is_some()
    }

    pub fn has_on_error(&self) -> bool {
        self.on_error.is_some()
    }

    pub fn logger_name(&self) -> Option<&str> {
        self.logger_name.as_deref()
    }

    /// Split the descriptor into its parts for activation
    pub fn into_parts(self) -> DescriptorParts {
        DescriptorParts {
            exports: self.exports,
            generator: self.generator,
            disable: self.disable,
            on_error: self.on_error,
            logger_name: self.logger_name,
        }
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("exports", &self.exports)
            .field("generator", &self.generator.is_some())
            .field("disable", &self.disable.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("logger_name", &self.logger_name)
            .finish()
    }
}

/// Owned pieces of a consumed [`ModuleDescriptor`]
pub struct DescriptorParts {
    pub exports: Option<Exports>,
    pub generator: Option<Generator>,
    pub disable: Option<DisableHook>,
    pub on_error: Option<ErrorHook>,
    pub logger_name: Option<String>,
}
