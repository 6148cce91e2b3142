//! Module change detection for hot reloading
//!
//! This module detects when modules in the module root have been modified,
//! added, or removed, and applies those changes to a running manager.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use gantry_api::ModuleId;
use tracing::{debug, info, warn};

use crate::manager::{describe, DependencyManager};
use crate::source::module_entries;

/// Default scan interval (1000ms = 1Hz)
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(1000);

/// Result of scanning for module changes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// Modules whose definition changed on disk
    pub changed: Vec<ModuleId>,
    /// Modules that appeared in the module root
    pub added: Vec<ModuleId>,
    /// Modules that disappeared from the module root
    pub removed: Vec<ModuleId>,
}

impl ScanResult {
    /// Returns true if there are any changes detected
    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty() || !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// Scanner for detecting module changes
#[derive(Debug)]
pub struct ModuleScanner {
    module_dir: PathBuf,
    scan_interval: Duration,
    last_scan: Option<Instant>,
    /// Cached state from last scan: module -> newest modification time
    cached_state: HashMap<ModuleId, SystemTime>,
}

impl ModuleScanner {
    pub fn new(module_dir: PathBuf) -> Self {
        Self::with_interval(module_dir, DEFAULT_SCAN_INTERVAL)
    }

    pub fn with_interval(module_dir: PathBuf, scan_interval: Duration) -> Self {
        // Pre-populate the cache so modules already present are not reported as added
        let cached_state = modules_in_dir(&module_dir);

        Self {
            module_dir,
            scan_interval,
            last_scan: None,
            cached_state,
        }
    }

    /// Check if enough time has elapsed since the last scan
    pub fn should_scan(&self) -> bool {
        match self.last_scan {
            Some(last) => last.elapsed() >= self.scan_interval,
            None => true,
        }
    }

    /// Scan the module directory and update the cache
    ///
    /// Each returned list is sorted by module id.
    pub fn scan_changes(&mut self) -> ScanResult {
        self.last_scan = Some(Instant::now());

        debug!(
            target: "modules",
            "Scanning module directory for changes: {}",
            self.module_dir.display()
        );

        let current_state = modules_in_dir(&self.module_dir);
        let mut result = ScanResult::default();

        for (id, modified) in &current_state {
            match self.cached_state.get(id) {
                Some(cached) if cached != modified => {
                    debug!(target: "modules", "Module changed: {}", id);
                    result.changed.push(id.clone());
                }
                Some(_) => {}
                None => {
                    debug!(target: "modules", "Module added: {}", id);
                    result.added.push(id.clone());
                }
            }
        }

        for id in self.cached_state.keys() {
            if !current_state.contains_key(id) {
                debug!(target: "modules", "Module removed: {}", id);
                result.removed.push(id.clone());
            }
        }

        result.changed.sort();
        result.added.sort();
        result.removed.sort();

        self.cached_state = current_state;
        result
    }

    pub fn module_dir(&self) -> &Path {
        &self.module_dir
    }

    pub fn scan_interval(&self) -> Duration {
        self.scan_interval
    }

    pub fn set_scan_interval(&mut self, interval: Duration) {
        self.scan_interval = interval;
    }

    pub fn tracked(&self) -> usize {
        self.cached_state.len()
    }
}

/// Apply a scan to a running manager
///
/// Changed modules that are loaded are reloaded, removed modules that are
/// loaded are unloaded, and added modules are only logged. Returns the number
/// of modules acted on.
pub fn apply_scan(manager: &DependencyManager, scan: &ScanResult) -> usize {
    let mut applied = 0;

    for id in &scan.changed {
        if !manager.is_loaded(id.as_str()) {
            debug!(target: "modules", "Ignoring change to unloaded module {}", id);
            continue;
        }
        info!(target: "modules", "Module {} changed on disk, reloading", id);
        match manager.reload(id.as_str()) {
            Ok(_) => applied += 1,
            Err(err) => warn!(
                target: "modules",
                "Failed to reload module {}: {}",
                id,
                describe(&err)
            ),
        }
    }

    for id in &scan.removed {
        let Some(record) = manager.get(id.as_str()) else {
            continue;
        };
        info!(target: "modules", "Module {} removed from disk, unloading", id);
        match manager.unload(&record) {
            Ok(()) => applied += 1,
            Err(err) => warn!(
                target: "modules",
                "Failed to unload module {}: {}",
                id,
                describe(&err)
            ),
        }
    }

    for id in &scan.added {
        info!(target: "modules", "New module available: {}", id);
    }

    applied
}

/// Current modules in the directory and their newest modification times
fn modules_in_dir(module_dir: &Path) -> HashMap<ModuleId, SystemTime> {
    module_entries(module_dir)
        .into_iter()
        .filter_map(|(id, path)| newest_modification(&path).map(|modified| (id, modified)))
        .collect()
}

/// For files their own mtime; for directory modules the newest of the
/// directory and its direct children
fn newest_modification(path: &Path) -> Option<SystemTime> {
    let modified = match fs::metadata(path).and_then(|metadata| metadata.modified()) {
        Ok(modified) => modified,
        Err(e) => {
            warn!(
                target: "modules",
                "Failed to get modification time for {}: {}",
                path.display(),
                e
            );
            return None;
        }
    };

    if !path.is_dir() {
        return Some(modified);
    }

    let newest_child = fs::read_dir(path)
        .into_iter()
        .flatten()
        .flatten()
        .filter_map(|entry| entry.metadata().and_then(|m| m.modified()).ok())
        .max();

    Some(newest_child.map_or(modified, |child| child.max(modified)))
}
