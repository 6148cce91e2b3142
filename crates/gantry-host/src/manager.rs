//! The dependency manager
//!
//! Owns the table of module slots and the `require` edges between modules,
//! drives every module through its lifecycle and routes failures of module
//! code to the module's error sink.
//!
//! All table mutations happen under one lock that is never held while module
//! code (engine evaluation, generators, hooks) runs. A request for an
//! identifier that is mid-transition on another call path fails fast with
//! `Busy`; a request that re-enters the load of one of its own requesters fails
//! with `CyclicDependency`.
//!
//! Relative `require` targets (`./`, `../`, `/`) name files private to the
//! requiring module. They are evaluated once per activation, add no dependency
//! edges and are torn down together with their module.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use gantry_api::descriptor::DescriptorParts;
use gantry_api::{
    CloseHook, DisableHook, ErrorHook, ExecutionPhase, Exports, ModuleDefinition, ModuleError,
    ModuleId, ModuleScope, ModuleState, Require, RequireContext, Result,
};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::engine::ScriptEngine;
use crate::events::{LifecycleEvents, ModuleEvent, ModuleEventKind};
use crate::policy::AutoLoadPolicy;
use crate::record::ActivationRecord;
use crate::resolver::ModuleResolver;
use crate::source::{is_relative_target, resolve_relative};
use crate::system::SystemModules;

enum Slot {
    /// `requester` is the module whose `require` triggered this load, if any
    Loading { requester: Option<ModuleId> },
    Loaded(Arc<ActivationRecord>),
    Unloading(Arc<ActivationRecord>),
}

impl Slot {
    fn state(&self) -> ModuleState {
        match self {
            Slot::Loading { .. } => ModuleState::Loading,
            Slot::Loaded(_) => ModuleState::Loaded,
            Slot::Unloading(_) => ModuleState::Unloading,
        }
    }
}

/// Files a module pulled in through relative `require`
#[derive(Default)]
struct InternalFiles {
    /// Evaluated files by canonical path
    exports: HashMap<PathBuf, Exports>,
    /// Files being evaluated and the thread evaluating each, in require order
    loading: Vec<(PathBuf, ThreadId)>,
    /// Teardown hooks of evaluated files, oldest first
    hooks: Vec<FileHooks>,
}

impl InternalFiles {
    /// Track a module whose entry file is being evaluated on this thread
    fn evaluating(entry: PathBuf) -> Self {
        Self {
            loading: vec![(entry, thread::current().id())],
            ..Self::default()
        }
    }
}

struct FileHooks {
    file: PathBuf,
    close: Option<CloseHook>,
    disable: Option<DisableHook>,
}

#[derive(Default)]
struct Table {
    slots: HashMap<ModuleId, Slot>,
    /// target -> modules that required it, oldest first
    dependents: HashMap<ModuleId, Vec<ModuleId>>,
    /// requester -> modules (or system labels) it required
    dependencies: HashMap<ModuleId, Vec<ModuleId>>,
    /// Loaded modules in the order their loads completed
    order: Vec<ModuleId>,
    /// module -> files it required relatively
    internals: HashMap<ModuleId, InternalFiles>,
    next_generation: u64,
}

impl Table {
    /// Answer a load request from the current slot, if one exists
    fn existing(
        &self,
        requester: Option<&ModuleId>,
        id: &ModuleId,
    ) -> Result<Option<Arc<ActivationRecord>>> {
        match self.slots.get(id) {
            None => Ok(None),
            Some(Slot::Loaded(record)) => Ok(Some(record.clone())),
            Some(Slot::Unloading(_)) => Err(ModuleError::Busy {
                id: id.clone(),
                state: ModuleState::Unloading,
            }),
            Some(Slot::Loading { .. }) => match self.find_cycle(requester, id) {
                Some(cycle) => Err(ModuleError::CyclicDependency { cycle }),
                None => Err(ModuleError::Busy {
                    id: id.clone(),
                    state: ModuleState::Loading,
                }),
            },
        }
    }

    /// Walk the chain of loading requesters looking for `id`
    ///
    /// Returns the cycle from `id` back to `id` when the request re-enters one
    /// of the loads that led to it.
    fn find_cycle(&self, requester: Option<&ModuleId>, id: &ModuleId) -> Option<Vec<ModuleId>> {
        let mut chain: Vec<ModuleId> = Vec::new();
        let mut current = requester.cloned();

        while let Some(module) = current {
            if chain.contains(&module) {
                return None;
            }
            let next = match self.slots.get(&module) {
                Some(Slot::Loading { requester }) => requester.clone(),
                _ => None,
            };
            let found = &module == id;
            chain.push(module);
            if found {
                chain.reverse();
                chain.push(id.clone());
                return Some(chain);
            }
            current = next;
        }
        None
    }

    fn is_live(&self, id: &ModuleId) -> bool {
        matches!(
            self.slots.get(id),
            Some(Slot::Loading { .. }) | Some(Slot::Loaded(_))
        )
    }

    /// The live record for `record`'s identifier, checked by generation
    fn check_live(&self, record: &ActivationRecord) -> Result<()> {
        let id = record.identifier();
        match self.slots.get(id) {
            Some(Slot::Loaded(live)) if live.generation() == record.generation() => Ok(()),
            Some(Slot::Unloading(live)) if live.generation() == record.generation() => {
                Err(ModuleError::Busy {
                    id: id.clone(),
                    state: ModuleState::Unloading,
                })
            }
            _ => Err(ModuleError::not_loaded(id.clone())),
        }
    }

    /// Whether `record` is the Loaded or Unloading record for its identifier
    fn is_current(&self, record: &ActivationRecord) -> bool {
        match self.slots.get(record.identifier()) {
            Some(Slot::Loaded(live)) | Some(Slot::Unloading(live)) => {
                live.generation() == record.generation()
            }
            _ => false,
        }
    }

    fn add_edge(&mut self, requester: &ModuleId, target: &ModuleId) {
        let dependents = self.dependents.entry(target.clone()).or_default();
        if !dependents.contains(requester) {
            dependents.push(requester.clone());
            self.dependencies
                .entry(requester.clone())
                .or_default()
                .push(target.clone());
            debug!(target: "modules", "Module {} now depends on {}", requester, target);
        }
    }

    /// Forget every edge where `id` is the requester
    fn remove_dependency_edges(&mut self, id: &ModuleId) {
        for target in self.dependencies.remove(id).unwrap_or_default() {
            if let Some(dependents) = self.dependents.get_mut(&target) {
                dependents.retain(|dependent| dependent != id);
                if dependents.is_empty() {
                    self.dependents.remove(&target);
                }
            }
        }
    }

    /// `root` and everything that transitively depends on it, dependents first
    fn teardown_order(&self, root: &ModuleId) -> Vec<ModuleId> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        self.visit_dependents(root, &mut visited, &mut order);
        order
    }

    fn visit_dependents(
        &self,
        id: &ModuleId,
        visited: &mut HashSet<ModuleId>,
        order: &mut Vec<ModuleId>,
    ) {
        if !visited.insert(id.clone()) {
            return;
        }
        if let Some(dependents) = self.dependents.get(id) {
            // newest dependent first
            for dependent in dependents.iter().rev() {
                self.visit_dependents(dependent, visited, order);
            }
        }
        order.push(id.clone());
    }

    fn forget(&mut self, id: &ModuleId) {
        self.slots.remove(id);
        self.internals.remove(id);
        self.remove_dependency_edges(id);
        self.order.retain(|loaded| loaded != id);
    }
}

/// Result of a reload: the fresh record plus every module that was re-loaded with it
struct Reloaded {
    record: Arc<ActivationRecord>,
    modules: Vec<ModuleId>,
}

/// Orchestrates loading, unloading and error reporting for a set of modules
pub struct DependencyManager {
    resolver: ModuleResolver,
    engine: Arc<dyn ScriptEngine>,
    system: SystemModules,
    events: LifecycleEvents,
    table: Mutex<Table>,
    self_ref: Weak<DependencyManager>,
}

impl DependencyManager {
    pub fn new(resolver: ModuleResolver, engine: Arc<dyn ScriptEngine>) -> Arc<Self> {
        Self::with_system_modules(resolver, engine, SystemModules::new())
    }

    pub fn with_system_modules(
        resolver: ModuleResolver,
        engine: Arc<dyn ScriptEngine>,
        system: SystemModules,
    ) -> Arc<Self> {
        debug!(target: "modules", "Creating dependency manager with sources {:?}", resolver);
        Arc::new_cyclic(|self_ref| Self {
            resolver,
            engine,
            system,
            events: LifecycleEvents::default(),
            table: Mutex::new(Table {
                next_generation: 1,
                ..Table::default()
            }),
            self_ref: self_ref.clone(),
        })
    }

    /// Load `id`, or return the existing record if it is already loaded
    pub fn load(&self, id: &str) -> Result<Arc<ActivationRecord>> {
        self.load_from(None, &ModuleId::new(id))
    }

    fn load_from(
        &self,
        requester: Option<&ModuleId>,
        id: &ModuleId,
    ) -> Result<Arc<ActivationRecord>> {
        if let Some(record) = self.table.lock().existing(requester, id)? {
            return Ok(record);
        }

        let definition = self
            .resolver
            .resolve(id)?
            .ok_or_else(|| ModuleError::not_found(id.clone()))?;
        let entry = definition.origin.as_deref().map(file_key);

        {
            let mut table = self.table.lock();
            // another call path may have claimed the slot while we resolved
            if let Some(record) = table.existing(requester, id)? {
                return Ok(record);
            }
            table.slots.insert(
                id.clone(),
                Slot::Loading {
                    requester: requester.cloned(),
                },
            );
            if let Some(entry) = entry {
                table
                    .internals
                    .insert(id.clone(), InternalFiles::evaluating(entry));
            }
        }
        self.events
            .transition(id, ModuleState::Unloaded, ModuleState::Loading);

        match self.activate(definition) {
            Ok(parts) => Ok(self.register(id, parts)),
            Err(err) => {
                let files = {
                    let mut table = self.table.lock();
                    let files = table.internals.remove(id);
                    table.forget(id);
                    files
                };
                warn!(
                    target: "modules",
                    "Failed to load module {}: {}",
                    id,
                    describe(&err)
                );
                self.close_files(id, files.map(|files| files.hooks), None);
                self.events.publish(
                    id,
                    ModuleEventKind::LoadFailed { error: err.clone() },
                );
                self.events
                    .transition(id, ModuleState::Loading, ModuleState::Failed);
                self.events
                    .transition(id, ModuleState::Failed, ModuleState::Unloaded);
                Err(err)
            }
        }
    }

    /// Evaluate a definition and run its generator; no table lock is held here
    fn activate(&self, definition: ModuleDefinition) -> Result<Activated> {
        let id = definition.id.clone();
        let mut require = Require::new(self.require_context(), id.clone());
        if let Some(origin) = &definition.origin {
            require = require.with_origin(origin.clone());
        }
        let scope = ModuleScope::new(definition, require);

        let descriptor = match catch_panic(|| self.engine.evaluate(scope)) {
            Ok(Ok(descriptor)) => descriptor,
            Ok(Err(err)) => return Err(attribute(&id, ExecutionPhase::Evaluate, err)),
            Err(panic) => {
                return Err(ModuleError::execution(id, ExecutionPhase::Evaluate, panic))
            }
        };

        let DescriptorParts {
            exports,
            generator,
            disable,
            on_error,
            logger_name,
        } = descriptor.into_parts();

        let (exports, close) = match generator {
            Some(generator) => match catch_panic(generator) {
                Ok(Ok(activation)) => (activation.exports, activation.close),
                Ok(Err(err)) => return Err(attribute_anyhow(&id, ExecutionPhase::Generator, err)),
                Err(panic) => {
                    return Err(ModuleError::execution(id, ExecutionPhase::Generator, panic))
                }
            },
            None => (exports.unwrap_or_else(Exports::empty), None),
        };

        Ok(Activated {
            exports,
            close,
            disable,
            on_error,
            logger_name,
        })
    }

    fn register(&self, id: &ModuleId, activated: Activated) -> Arc<ActivationRecord> {
        let record = {
            let mut table = self.table.lock();
            let generation = table.next_generation;
            table.next_generation += 1;

            let record = Arc::new(ActivationRecord::new(
                id.clone(),
                activated.exports,
                generation,
                activated.close,
                activated.disable,
                activated.on_error,
                activated.logger_name,
            ));
            table.slots.insert(id.clone(), Slot::Loaded(record.clone()));
            table.order.push(id.clone());
            // the entry file now resolves to the module's own exports
            if let Some(files) = table.internals.get_mut(id) {
                for (entry, _) in files.loading.drain(..) {
                    files.exports.insert(entry, record.exports().clone());
                }
            }
            record
        };

        self.events
            .transition(id, ModuleState::Loading, ModuleState::Loaded);
        info!(
            target: "modules",
            "Loaded module {} (generation {})",
            id,
            record.generation()
        );
        record
    }

    fn require_context(&self) -> Weak<dyn RequireContext> {
        self.self_ref.clone()
    }

    fn require_from(
        &self,
        requester: &ModuleId,
        origin: Option<&Path>,
        target: &str,
    ) -> Result<Exports> {
        if is_relative_target(target) {
            return self.require_file(requester, origin, target);
        }

        let target_id = ModuleId::new(target);
        if requester == &target_id {
            return Err(ModuleError::CyclicDependency {
                cycle: vec![target_id.clone(), target_id],
            });
        }
        if !self.table.lock().is_live(requester) {
            return Err(ModuleError::not_loaded(requester.clone()));
        }

        let has_slot = self.table.lock().slots.contains_key(&target_id);
        if has_slot || self.resolver.contains(target) {
            let record = self.load_from(Some(requester), &target_id)?;

            let mut table = self.table.lock();
            if !table.is_live(requester) {
                return Err(ModuleError::not_loaded(requester.clone()));
            }
            match table.slots.get(&target_id) {
                Some(Slot::Loaded(live)) if Arc::ptr_eq(live, &record) => {}
                Some(slot) => {
                    return Err(ModuleError::Busy {
                        id: target_id,
                        state: slot.state(),
                    })
                }
                None => return Err(ModuleError::not_loaded(target_id)),
            }
            table.add_edge(requester, &target_id);
            return Ok(record.exports().clone());
        }

        if let Some(exports) = self.system.get(target) {
            self.table.lock().add_edge(requester, &target_id);
            return Ok(exports);
        }

        Err(ModuleError::not_found(target_id))
    }

    /// Evaluate a file of `owner` named relative to `origin`, once per activation
    fn require_file(
        &self,
        owner: &ModuleId,
        origin: Option<&Path>,
        target: &str,
    ) -> Result<Exports> {
        if !self.table.lock().is_live(owner) {
            return Err(ModuleError::not_loaded(owner.clone()));
        }
        // modules that did not come from disk have nothing to be relative to
        let origin = origin.ok_or_else(|| ModuleError::not_found(target))?;
        let (file, kind) = resolve_relative(origin, target)
            .map_err(|e| ModuleError::load(owner.clone(), e))?
            .ok_or_else(|| ModuleError::not_found(target))?;
        let file = file_key(&file);
        let thread = thread::current().id();

        {
            let mut table = self.table.lock();
            if !table.is_live(owner) {
                return Err(ModuleError::not_loaded(owner.clone()));
            }
            let files = table.internals.entry(owner.clone()).or_default();
            if let Some(exports) = files.exports.get(&file) {
                return Ok(exports.clone());
            }
            if let Some(start) = files
                .loading
                .iter()
                .position(|(loading, by)| loading == &file && *by == thread)
            {
                let mut cycle: Vec<ModuleId> = files.loading[start..]
                    .iter()
                    .filter(|(_, by)| *by == thread)
                    .map(|(loading, _)| file_label(loading))
                    .collect();
                cycle.push(file_label(&file));
                return Err(ModuleError::CyclicDependency { cycle });
            }
            if files.loading.iter().any(|(loading, _)| loading == &file) {
                return Err(ModuleError::Busy {
                    id: file_label(&file),
                    state: ModuleState::Loading,
                });
            }
            files.loading.push((file.clone(), thread));
        }

        debug!(target: "modules", "Module {} requires file {}", owner, file.display());
        let activated = fs::read_to_string(&file)
            .map_err(|e| ModuleError::load(owner.clone(), e))
            .and_then(|source| {
                let definition =
                    ModuleDefinition::new(owner.clone(), kind, source).with_origin(file.clone());
                self.activate(definition)
            });

        let mut table = self.table.lock();
        if let Some(files) = table.internals.get_mut(owner) {
            files
                .loading
                .retain(|(loading, by)| !(loading == &file && *by == thread));
        }

        let activated = activated?;
        if !table.is_live(owner) || !table.internals.contains_key(owner) {
            // the module went away while the file was evaluating
            drop(table);
            self.close_files(owner, Some(vec![FileHooks::of(file, activated)]), None);
            return Err(ModuleError::not_loaded(owner.clone()));
        }

        let files = table.internals.entry(owner.clone()).or_default();

        let exports = activated.exports.clone();
        files.exports.insert(file.clone(), exports.clone());
        files.hooks.push(FileHooks::of(file, activated));
        Ok(exports)
    }

    /// Run the teardown hooks of a module's files, newest first
    ///
    /// Failures go to `record`'s error sink when there is one. Returns whether
    /// any hook failed.
    fn close_files(
        &self,
        id: &ModuleId,
        files: Option<Vec<FileHooks>>,
        record: Option<&ActivationRecord>,
    ) -> bool {
        let mut failed = false;

        for hooks in files.unwrap_or_default().into_iter().rev() {
            let phases = [
                (ExecutionPhase::Close, hooks.close),
                (ExecutionPhase::Disable, hooks.disable),
            ];
            for (phase, hook) in phases {
                let Some(hook) = hook else {
                    continue;
                };
                let Err(err) = run_hook(hook) else {
                    continue;
                };
                failed = true;

                let err = ModuleError::execution(
                    id.clone(),
                    phase,
                    err.context(format!("in {}", hooks.file.display())),
                );
                match record {
                    Some(record) => self.deliver(record, err),
                    None => warn!(
                        target: "modules",
                        "Teardown of {} for module {} failed: {}",
                        hooks.file.display(),
                        id,
                        describe(&err)
                    ),
                }
            }
        }
        failed
    }

    /// Unload `record` after unloading everything that depends on it
    ///
    /// Teardown failures go to the modules' error sinks; this only fails when
    /// `record` is not the live record for its identifier or part of the
    /// dependent closure is mid-transition.
    pub fn unload(&self, record: &ActivationRecord) -> Result<()> {
        self.unload_closure(record, true).map(|_| ())
    }

    /// Unload `record` only if nothing depends on it
    pub fn try_unload(&self, record: &ActivationRecord) -> Result<()> {
        self.unload_closure(record, false).map(|_| ())
    }

    /// Returns the identifiers torn down, in teardown order
    fn unload_closure(&self, record: &ActivationRecord, cascade: bool) -> Result<Vec<ModuleId>> {
        let id = record.identifier();
        let closure = {
            let mut table = self.table.lock();
            table.check_live(record)?;

            if !cascade {
                if let Some(dependents) = table.dependents.get(id) {
                    if !dependents.is_empty() {
                        return Err(ModuleError::InUse {
                            id: id.clone(),
                            dependents: dependents.clone(),
                        });
                    }
                }
            }

            let order = table.teardown_order(id);
            for module in &order {
                match table.slots.get(module) {
                    Some(Slot::Loaded(_)) => {}
                    Some(slot) => {
                        return Err(ModuleError::Busy {
                            id: module.clone(),
                            state: slot.state(),
                        })
                    }
                    None => return Err(ModuleError::not_loaded(module.clone())),
                }
            }

            let mut closure = Vec::with_capacity(order.len());
            for module in order {
                if let Some(slot) = table.slots.get_mut(&module) {
                    if let Slot::Loaded(live) = slot {
                        let live = live.clone();
                        *slot = Slot::Unloading(live.clone());
                        closure.push(live);
                    }
                }
            }
            closure
        };

        if closure.len() > 1 {
            info!(
                target: "modules",
                "Unloading module {} and {} dependent(s)",
                id,
                closure.len() - 1
            );
        }
        for record in &closure {
            self.events.transition(
                record.identifier(),
                ModuleState::Loaded,
                ModuleState::Unloading,
            );
        }

        let mut torn_down = Vec::with_capacity(closure.len());
        for record in closure {
            self.teardown(&record);
            torn_down.push(record.identifier().clone());
        }
        Ok(torn_down)
    }

    fn teardown(&self, record: &ActivationRecord) {
        let id = record.identifier();
        let mut failed = false;

        if let Some(close) = record.take_close() {
            if let Err(err) = run_hook(close) {
                failed = true;
                self.deliver(
                    record,
                    ModuleError::execution(id.clone(), ExecutionPhase::Close, err),
                );
            }
        }

        if let Some(disable) = record.take_disable() {
            if let Err(err) = run_hook(disable) {
                failed = true;
                self.deliver(
                    record,
                    ModuleError::execution(id.clone(), ExecutionPhase::Disable, err),
                );
            }
        }

        let files = self.table.lock().internals.remove(id);
        if self.close_files(id, files.map(|files| files.hooks), Some(record)) {
            failed = true;
        }

        {
            let mut table = self.table.lock();
            table.forget(id);
            table.dependents.remove(id);
        }

        if failed {
            self.events
                .transition(id, ModuleState::Unloading, ModuleState::Failed);
            self.events
                .transition(id, ModuleState::Failed, ModuleState::Unloaded);
        } else {
            self.events
                .transition(id, ModuleState::Unloading, ModuleState::Unloaded);
        }
        info!(target: "modules", "Unloaded module {}", id);
    }

    /// Route a failure of `record`'s own code to its error sink, at most once
    fn deliver(&self, record: &ActivationRecord, err: ModuleError) {
        if record.claim_error_report() {
            self.dispatch(record, err);
        } else {
            self.swallow(record, err, "error already reported");
        }
    }

    fn swallow(&self, record: &ActivationRecord, err: ModuleError, reason: &str) {
        let id = record.identifier();
        error!(
            target: "modules",
            logger = record.logger_name(),
            "Swallowed failure of module {} ({}): {}",
            id,
            reason,
            describe(&err)
        );
        self.events
            .publish(id, ModuleEventKind::ErrorSwallowed { error: err });
    }

    /// Hand a claimed failure to the error hook, or log it when there is none
    fn dispatch(&self, record: &ActivationRecord, err: ModuleError) {
        let id = record.identifier();
        self.events.publish(
            id,
            ModuleEventKind::ErrorReported { error: err.clone() },
        );

        let Some(on_error) = record.take_on_error() else {
            error!(
                target: "modules",
                logger = record.logger_name(),
                "Unhandled failure in module {}: {}",
                id,
                describe(&err)
            );
            return;
        };

        match catch_panic(|| on_error(&err)) {
            Ok(Ok(())) => {
                debug!(target: "modules", "Delivered failure to error hook of module {}", id);
            }
            Ok(Err(hook_err)) => {
                error!(
                    target: "modules",
                    logger = record.logger_name(),
                    "Error hook of module {} failed while handling '{}': {:#}",
                    id,
                    describe(&err),
                    hook_err
                );
            }
            Err(panic) => {
                error!(
                    target: "modules",
                    logger = record.logger_name(),
                    "Error hook of module {} {} while handling '{}'",
                    id,
                    panic,
                    describe(&err)
                );
            }
        }
    }

    /// Report a runtime failure of a loaded module
    ///
    /// Goes through the same at-most-once discipline as teardown failures. A
    /// record that is no longer the loaded (or unloading) generation of its
    /// module only gets the failure logged; its error hook never runs.
    pub fn report(&self, record: &ActivationRecord, err: impl Into<anyhow::Error>) {
        let err = ModuleError::execution(record.identifier().clone(), ExecutionPhase::Runtime, err);

        // claimed under the lock so teardown cannot forget the record in between
        let claimed = {
            let table = self.table.lock();
            table
                .is_current(record)
                .then(|| record.claim_error_report())
        };
        match claimed {
            Some(true) => self.dispatch(record, err),
            Some(false) => self.swallow(record, err, "error already reported"),
            None => self.swallow(record, err, "module is no longer loaded"),
        }
    }

    /// Unload `id` with its dependents, then load them all again
    ///
    /// Dependents are re-loaded in their previous load order; one that fails is
    /// logged and left unloaded. Fails only if `id` is not loaded or cannot be
    /// loaded again.
    pub fn reload(&self, id: &str) -> Result<Arc<ActivationRecord>> {
        self.reload_closure(id).map(|reloaded| reloaded.record)
    }

    fn reload_closure(&self, id: &str) -> Result<Reloaded> {
        let record = self.get(id).ok_or_else(|| ModuleError::not_loaded(id))?;
        let previous_order = self.table.lock().order.clone();

        let torn_down: HashSet<ModuleId> = self.unload_closure(&record, true)?.into_iter().collect();
        info!(target: "modules", "Reloading module {}", id);

        let fresh = self.load(id)?;
        let mut modules = vec![fresh.identifier().clone()];

        for dependent in previous_order
            .iter()
            .filter(|module| module.as_str() != id && torn_down.contains(*module))
        {
            if self.is_loaded(dependent.as_str()) {
                modules.push(dependent.clone());
                continue;
            }
            match self.load(dependent.as_str()) {
                Ok(_) => modules.push(dependent.clone()),
                Err(err) => warn!(
                    target: "modules",
                    "Dependent {} of {} failed to reload: {}",
                    dependent,
                    id,
                    describe(&err)
                ),
            }
        }

        Ok(Reloaded {
            record: fresh,
            modules,
        })
    }

    /// Unload every loaded module, dependents first and newest first
    ///
    /// Returns the number of modules torn down. Dropping the manager does not
    /// run module hooks; hosts call this at shutdown.
    pub fn shutdown(&self) -> usize {
        let order = self.table.lock().order.clone();
        info!(target: "modules", "Shutting down {} module(s)", order.len());

        let mut count = 0;
        for id in order.iter().rev() {
            let Some(record) = self.get(id.as_str()) else {
                continue;
            };
            match self.unload_closure(&record, true) {
                Ok(torn_down) => count += torn_down.len(),
                Err(err) => warn!(
                    target: "modules",
                    "Failed to unload module {} during shutdown: {}",
                    id,
                    describe(&err)
                ),
            }
        }
        count
    }

    /// Load every module the policy allows that is not already loaded
    ///
    /// Failures are logged and collected; one module failing does not stop the rest.
    pub fn load_eligible(&self, policy: &AutoLoadPolicy) -> Vec<(ModuleId, ModuleError)> {
        let mut failures = Vec::new();

        for id in self.loadable_modules() {
            if !policy.eligible(&id) {
                info!(target: "modules", "Skipping module {} (not eligible for auto-load)", id);
                continue;
            }
            if self.is_loaded(id.as_str()) {
                continue;
            }
            if let Err(err) = self.load(id.as_str()) {
                failures.push((id, err));
            }
        }

        if failures.is_empty() {
            info!(target: "modules", "Loaded {} module(s)", self.loaded_count());
        } else {
            warn!(
                target: "modules",
                "Loaded {} module(s), {} failed",
                self.loaded_count(),
                failures.len()
            );
        }
        failures
    }

    /// Register or replace a system module and reload everything that required it
    pub fn set_system_module(&self, label: &str, exports: Exports) -> Result<()> {
        self.system.set(label, exports)?;

        let dependents = self
            .table
            .lock()
            .dependents
            .get(label)
            .cloned()
            .unwrap_or_default();

        let mut reloaded: HashSet<ModuleId> = HashSet::new();
        for dependent in dependents {
            if reloaded.contains(&dependent) || !self.is_loaded(dependent.as_str()) {
                continue;
            }
            match self.reload_closure(dependent.as_str()) {
                Ok(result) => reloaded.extend(result.modules),
                Err(err) => warn!(
                    target: "modules",
                    "Failed to reload {} after system module {} changed: {}",
                    dependent,
                    label,
                    describe(&err)
                ),
            }
        }
        Ok(())
    }

    pub fn system_modules(&self) -> &SystemModules {
        &self.system
    }

    pub fn resolver(&self) -> &ModuleResolver {
        &self.resolver
    }

    /// Loaded records in load order
    pub fn loaded_modules(&self) -> Vec<Arc<ActivationRecord>> {
        let table = self.table.lock();
        table
            .order
            .iter()
            .filter_map(|id| match table.slots.get(id) {
                Some(Slot::Loaded(record)) => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    fn loaded_count(&self) -> usize {
        let table = self.table.lock();
        table
            .slots
            .values()
            .filter(|slot| matches!(slot, Slot::Loaded(_)))
            .count()
    }

    pub fn loadable_modules(&self) -> Vec<ModuleId> {
        self.resolver.loadable_modules()
    }

    pub fn get(&self, id: &str) -> Option<Arc<ActivationRecord>> {
        match self.table.lock().slots.get(id) {
            Some(Slot::Loaded(record)) => Some(record.clone()),
            _ => None,
        }
    }

    pub fn is_loaded(&self, id: &str) -> bool {
        matches!(self.table.lock().slots.get(id), Some(Slot::Loaded(_)))
    }

    pub fn state(&self, id: &str) -> ModuleState {
        self.table
            .lock()
            .slots
            .get(id)
            .map_or(ModuleState::Unloaded, Slot::state)
    }

    /// Modules that required `record`'s module, oldest first
    pub fn dependents(&self, record: &ActivationRecord) -> Vec<ModuleId> {
        self.table
            .lock()
            .dependents
            .get(record.identifier())
            .cloned()
            .unwrap_or_default()
    }

    /// Modules and system labels `record`'s module required
    pub fn dependencies(&self, record: &ActivationRecord) -> Vec<ModuleId> {
        self.table
            .lock()
            .dependencies
            .get(record.identifier())
            .cloned()
            .unwrap_or_default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModuleEvent> {
        self.events.subscribe()
    }
}

impl RequireContext for DependencyManager {
    fn require(
        &self,
        requester: &ModuleId,
        origin: Option<&Path>,
        target: &str,
    ) -> Result<Exports> {
        self.require_from(requester, origin, target)
    }
}

impl Drop for DependencyManager {
    fn drop(&mut self) {
        let loaded = self.table.get_mut().order.len();
        if loaded > 0 {
            warn!(
                target: "modules",
                "Dependency manager dropped with {} module(s) still loaded; their hooks will not run",
                loaded
            );
        }
    }
}

impl std::fmt::Debug for DependencyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyManager")
            .field("resolver", &self.resolver)
            .field("loaded", &self.table.lock().order)
            .finish_non_exhaustive()
    }
}

/// Everything a successful activation hands over to its record
struct Activated {
    exports: Exports,
    close: Option<CloseHook>,
    disable: Option<DisableHook>,
    on_error: Option<ErrorHook>,
    logger_name: Option<String>,
}

/// Keep errors that already name the module (or a cycle); wrap everything else
fn attribute(id: &ModuleId, phase: ExecutionPhase, err: ModuleError) -> ModuleError {
    let keep = matches!(err, ModuleError::CyclicDependency { .. }) || err.id() == Some(id);
    if keep {
        err
    } else {
        ModuleError::execution(id.clone(), phase, err)
    }
}

fn attribute_anyhow(id: &ModuleId, phase: ExecutionPhase, err: anyhow::Error) -> ModuleError {
    match err.downcast::<ModuleError>() {
        Ok(module_error) => attribute(id, phase, module_error),
        Err(err) => ModuleError::execution(id.clone(), phase, err),
    }
}

impl FileHooks {
    fn of(file: PathBuf, activated: Activated) -> Self {
        Self {
            file,
            close: activated.close,
            disable: activated.disable,
        }
    }
}

/// Canonical form of a module file, so every spelling of a path maps to one entry
fn file_key(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn file_label(path: &Path) -> ModuleId {
    ModuleId::new(path.display().to_string())
}

fn run_hook(hook: CloseHook) -> anyhow::Result<()> {
    catch_panic(hook)?
}

fn catch_panic<T>(f: impl FnOnce() -> T) -> anyhow::Result<T> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .map_err(|payload| anyhow::anyhow!("panicked: {}", panic_message(payload.as_ref())))
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}

/// An error followed by its chain of causes
pub(crate) fn describe(err: &ModuleError) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
