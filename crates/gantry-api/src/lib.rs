//! Module API for gantry
//!
//! This crate provides the types a module (and the engine adapter that runs it)
//! sees: identifiers, exports, descriptors with their optional lifecycle hooks,
//! the `require` capability and the failure taxonomy.
//! Modules and engines should depend on this crate, not on gantry-host.

pub mod descriptor;
pub mod error;
pub mod exports;
pub mod id;
pub mod require;
pub mod state;

pub use descriptor::{
    Activation, CloseHook, DefinitionKind, DescriptorParts, DisableHook, ErrorHook, Generator,
    ModuleDefinition, ModuleDescriptor,
};
pub use error::{Cause, ExecutionPhase, FailureKind, ModuleError, Result};
pub use exports::Exports;
pub use id::ModuleId;
pub use require::{ModuleScope, Require, RequireContext};
pub use state::ModuleState;
