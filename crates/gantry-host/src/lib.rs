//! Module host for gantry
//!
//! Resolves which modules exist, loads them through engine adapters, tracks
//! the `require` edges between them and drives every module through its
//! lifecycle with at-most-once error reporting.

pub mod config;
pub mod engine;
pub mod events;
pub mod manager;
pub mod module_scanner;
pub mod policy;
pub mod record;
pub mod registry;
pub mod reload;
pub mod resolver;
pub mod source;
pub mod system;

pub use config::{ConfigLoadError, GantryConfig, ModulesConfig};
pub use engine::{EngineRouter, JsonEngine, NativeEngine, NativeModule, ScriptEngine};
pub use events::{LifecycleEvents, ModuleEvent, ModuleEventKind};
pub use manager::DependencyManager;
pub use module_scanner::{apply_scan, ModuleScanner, ScanResult};
pub use policy::{AutoLoadPolicy, PolicyError};
pub use record::ActivationRecord;
pub use registry::create_manager_from_config;
pub use reload::{reload_all, setup_reload_signal, ReloadSignal};
pub use resolver::ModuleResolver;
pub use source::{DirectorySource, MemorySource, ModuleSource};
pub use system::SystemModules;

// Re-export the module API so hosts need a single dependency
pub use gantry_api;
