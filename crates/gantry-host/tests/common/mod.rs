//! Shared fixtures for the integration tests
//!
//! Modules are registered with a `NativeEngine` and record every hook call
//! into a shared `CallLog` so tests can assert on ordering.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use gantry_host::gantry_api::{Activation, Exports, ModuleDescriptor};
use gantry_host::{DependencyManager, ModuleResolver, NativeEngine};

#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == entry).count()
    }

    /// Position of the first occurrence of `entry`
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().unwrap().iter().position(|e| e == entry)
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

/// A manager whose only source and engine is `natives`
pub fn manager(natives: &Arc<NativeEngine>) -> Arc<DependencyManager> {
    let resolver = ModuleResolver::new().with_source(natives.clone());
    DependencyManager::new(resolver, natives.clone())
}

/// Register a module that requires `requires` from its generator and records
/// `<id>:generator`, `<id>:close` and `<id>:disable`
///
/// Its exports are the module id as a `String`.
pub fn register_recording(natives: &NativeEngine, id: &str, requires: &[&str], log: &CallLog) {
    let id = id.to_string();
    let requires: Vec<String> = requires.iter().map(|r| r.to_string()).collect();
    let log = log.clone();

    natives.register(id.clone(), move |scope| {
        let require = scope.require().clone();
        let requires = requires.clone();
        let id = id.clone();
        let generator_log = log.clone();
        let disable_log = log.clone();
        let disable_id = id.clone();

        Ok(ModuleDescriptor::new()
            .with_generator(move || {
                for target in &requires {
                    require.require(target)?;
                }
                generator_log.push(format!("{}:generator", id));
                let close_log = generator_log.clone();
                let close_id = id.clone();
                Ok(Activation::new(Exports::new(id.clone())).with_close(move || {
                    close_log.push(format!("{}:close", close_id));
                    Ok(())
                }))
            })
            .with_disable(move || {
                disable_log.push(format!("{}:disable", disable_id));
                Ok(())
            }))
    });
}
