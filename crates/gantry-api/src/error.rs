use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::id::ModuleId;
use crate::state::ModuleState;

/// Result type for module operations
pub type Result<T> = std::result::Result<T, ModuleError>;

/// The underlying failure wrapped by a [`ModuleError`]
///
/// Shared so that errors can be cloned onto the lifecycle event bus.
#[derive(Clone)]
pub struct Cause(Arc<anyhow::Error>);

impl Cause {
    pub fn new(error: impl Into<anyhow::Error>) -> Self {
        Self(Arc::new(error.into()))
    }

    pub fn msg(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Self(Arc::new(anyhow::Error::msg(message)))
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }

    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl fmt::Debug for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl std::error::Error for Cause {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

/// Which piece of module code was running when it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionPhase {
    /// Top-level module code run by the engine adapter
    Evaluate,
    /// `generator()`
    Generator,
    /// `disable()`
    Disable,
    /// The activation's `close()`
    Close,
    /// A failure the host reported while the module was loaded
    Runtime,
}

impl fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionPhase::Evaluate => "evaluation",
            ExecutionPhase::Generator => "generator",
            ExecutionPhase::Disable => "disable",
            ExecutionPhase::Close => "close",
            ExecutionPhase::Runtime => "runtime",
        };
        f.write_str(name)
    }
}

/// Discriminant of [`ModuleError`], for matching without destructuring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    NotFound,
    NotLoaded,
    Load,
    Execution,
    CyclicDependency,
    Busy,
    InUse,
    AlreadyRegistered,
    InvalidName,
    ManagerUnavailable,
}

/// Errors produced by the module system
#[derive(Debug, Clone, Error)]
pub enum ModuleError {
    /// Unknown identifier passed to `load` or `require`
    #[error("Module with identifier '{id}' could not be found")]
    NotFound { id: ModuleId },

    /// `unload` of something that is not the live record for its identifier
    #[error("Module '{id}' is not loaded")]
    NotLoaded { id: ModuleId },

    /// The module definition could not be read or parsed
    #[error("Failed to load module '{id}'")]
    Load {
        id: ModuleId,
        #[source]
        cause: Cause,
    },

    /// Module code failed
    #[error("Module '{id}' failed during {phase}")]
    Execution {
        id: ModuleId,
        phase: ExecutionPhase,
        #[source]
        cause: Cause,
    },

    /// A load re-entered a load of a module that is still loading
    #[error("Cyclic dependency detected: {}", format_ids(.cycle, " -> "))]
    CyclicDependency { cycle: Vec<ModuleId> },

    /// The identifier is mid-transition on another call path
    #[error("Module '{id}' is busy ({state})")]
    Busy { id: ModuleId, state: ModuleState },

    /// Non-cascading unload of a module that still has dependents
    #[error("Module '{id}' is still required by {}", format_ids(.dependents, ", "))]
    InUse {
        id: ModuleId,
        dependents: Vec<ModuleId>,
    },

    /// A system module label was registered twice
    #[error("System module '{id}' is already registered")]
    AlreadyRegistered { id: ModuleId },

    /// A label that does not follow the module naming rules
    #[error("'{name}' is not a valid module name")]
    InvalidName { name: String },

    /// `require` through a handle whose manager no longer exists
    #[error("The dependency manager is no longer available")]
    ManagerUnavailable,
}

fn format_ids(ids: &[ModuleId], separator: &str) -> String {
    ids.iter()
        .map(ModuleId::as_str)
        .collect::<Vec<_>>()
        .join(separator)
}

impl ModuleError {
    pub fn not_found(id: impl Into<ModuleId>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn not_loaded(id: impl Into<ModuleId>) -> Self {
        Self::NotLoaded { id: id.into() }
    }

    pub fn load(id: impl Into<ModuleId>, cause: impl Into<anyhow::Error>) -> Self {
        Self::Load {
            id: id.into(),
            cause: Cause::new(cause),
        }
    }

    pub fn execution(
        id: impl Into<ModuleId>,
        phase: ExecutionPhase,
        cause: impl Into<anyhow::Error>,
    ) -> Self {
        Self::Execution {
            id: id.into(),
            phase,
            cause: Cause::new(cause),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ModuleError::NotFound { .. } => FailureKind::NotFound,
            ModuleError::NotLoaded { .. } => FailureKind::NotLoaded,
            ModuleError::Load { .. } => FailureKind::Load,
            ModuleError::Execution { .. } => FailureKind::Execution,
            ModuleError::CyclicDependency { .. } => FailureKind::CyclicDependency,
            ModuleError::Busy { .. } => FailureKind::Busy,
            ModuleError::InUse { .. } => FailureKind::InUse,
            ModuleError::AlreadyRegistered { .. } => FailureKind::AlreadyRegistered,
            ModuleError::InvalidName { .. } => FailureKind::InvalidName,
            ModuleError::ManagerUnavailable => FailureKind::ManagerUnavailable,
        }
    }

    /// The module this error is about, if any
    pub fn id(&self) -> Option<&ModuleId> {
        match self {
            ModuleError::NotFound { id }
            | ModuleError::NotLoaded { id }
            | ModuleError::Load { id, .. }
            | ModuleError::Execution { id, .. }
            | ModuleError::Busy { id, .. }
            | ModuleError::InUse { id, .. }
            | ModuleError::AlreadyRegistered { id } => Some(id),
            ModuleError::CyclicDependency { cycle } => cycle.first(),
            ModuleError::InvalidName { .. } | ModuleError::ManagerUnavailable => None,
        }
    }

    pub fn phase(&self) -> Option<ExecutionPhase> {
        match self {
            ModuleError::Execution { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    pub fn cause(&self) -> Option<&Cause> {
        match self {
            ModuleError::Load { cause, .. } | ModuleError::Execution { cause, .. } => Some(cause),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display() {
        let err = ModuleError::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Cyclic dependency detected: a -> b -> a");
        assert_eq!(err.kind(), FailureKind::CyclicDependency);
        assert_eq!(err.id().map(ModuleId::as_str), Some("a"));
    }

    #[test]
    fn test_execution_keeps_cause_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let err = ModuleError::execution("logger", ExecutionPhase::Close, io);
        assert_eq!(err.to_string(), "Module 'logger' failed during close");
        assert_eq!(err.phase(), Some(ExecutionPhase::Close));

        let chained = format!("{:#}", anyhow::Error::new(err.clone()));
        assert!(chained.contains("disk on fire"), "{}", chained);
        assert!(err.cause().unwrap().downcast_ref::<std::io::Error>().is_some());
    }

    #[test]
    fn test_nested_module_error_is_downcastable() {
        let inner = ModuleError::not_found("missing");
        let outer = ModuleError::execution("a", ExecutionPhase::Generator, inner);
        let cause = outer.cause().unwrap();
        assert_eq!(
            cause.downcast_ref::<ModuleError>().map(ModuleError::kind),
            Some(FailureKind::NotFound)
        );
    }

    #[test]
    fn test_in_use_display() {
        let err = ModuleError::InUse {
            id: "b".into(),
            dependents: vec!["a".into(), "c".into()],
        };
        assert_eq!(err.to_string(), "Module 'b' is still required by a, c");
    }
}
