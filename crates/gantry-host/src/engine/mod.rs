//! Engine adapters turn module definitions into descriptors

mod json;
mod native;
mod router;

pub use json::JsonEngine;
pub use native::{NativeEngine, NativeModule};
pub use router::EngineRouter;

use gantry_api::{ModuleDescriptor, ModuleScope, Result};

/// Executes a module's defining code and returns the populated descriptor
///
/// Parse errors should be reported as `ModuleError::Load`; anything the module
/// code itself throws may be returned as a plain `Execution` error or any other
/// `ModuleError`, which the manager attributes to the evaluation phase.
pub trait ScriptEngine: Send + Sync {
    fn evaluate(&self, scope: ModuleScope) -> Result<ModuleDescriptor>;
}
