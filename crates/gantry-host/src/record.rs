use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use gantry_api::{CloseHook, DisableHook, ErrorHook, Exports, ModuleId};
use parking_lot::Mutex;

/// Live state of one loaded module
///
/// Created by the manager when a load succeeds and handed out as
/// `Arc<ActivationRecord>`. Module code never mutates it. Teardown hooks and
/// the error sink are stored behind their own locks and can each be taken
/// exactly once.
pub struct ActivationRecord {
    identifier: ModuleId,
    exports: Exports,
    generation: u64,
    loaded_at: Instant,
    logger_name: String,
    has_close_handle: bool,
    close: Mutex<Option<CloseHook>>,
    disable: Mutex<Option<DisableHook>>,
    on_error: Mutex<Option<ErrorHook>>,
    error_reported: AtomicBool,
}

impl ActivationRecord {
    pub(crate) fn new(
        identifier: ModuleId,
        exports: Exports,
        generation: u64,
        close: Option<CloseHook>,
        disable: Option<DisableHook>,
        on_error: Option<ErrorHook>,
        logger_name: Option<String>,
    ) -> Self {
        let logger_name = logger_name.unwrap_or_else(|| identifier.to_string());
        Self {
            has_close_handle: close.is_some(),
            identifier,
            exports,
            generation,
            loaded_at: Instant::now(),
            logger_name,
            close: Mutex::new(close),
            disable: Mutex::new(disable),
            on_error: Mutex::new(on_error),
            error_reported: AtomicBool::new(false),
        }
    }

    pub fn identifier(&self) -> &ModuleId {
        &self.identifier
    }

    /// The value dependents observe through `require`
    pub fn exports(&self) -> &Exports {
        &self.exports
    }

    /// Whether the activation came from a generator that supplied a teardown callback
    pub fn has_close_handle(&self) -> bool {
        self.has_close_handle
    }

    pub fn error_reported(&self) -> bool {
        self.error_reported.load(Ordering::SeqCst)
    }

    pub fn loaded_at(&self) -> Instant {
        self.loaded_at
    }

    /// Monotonic per manager; a reloaded module gets a new generation
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Logger unhandled failures of this module are attributed to
    pub fn logger_name(&self) -> &str {
        &self.logger_name
    }

    pub(crate) fn take_close(&self) -> Option<CloseHook> {
        self.close.lock().take()
    }

    pub(crate) fn take_disable(&self) -> Option<DisableHook> {
        self.disable.lock().take()
    }

    pub(crate) fn take_on_error(&self) -> Option<ErrorHook> {
        self.on_error.lock().take()
    }

    /// Claim the right to report an error; true only for the first caller
    pub(crate) fn claim_error_report(&self) -> bool {
        !self.error_reported.swap(true, Ordering::SeqCst)
    }
}

impl fmt::Debug for ActivationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivationRecord")
            .field("identifier", &self.identifier)
            .field("generation", &self.generation)
            .field("exports", &self.exports)
            .field("has_close_handle", &self.has_close_handle)
            .field("error_reported", &self.error_reported())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(close: Option<CloseHook>) -> ActivationRecord {
        ActivationRecord::new(
            ModuleId::new("a"),
            Exports::empty(),
            1,
            close,
            None,
            Some(Box::new(|_| Ok(()))),
            None,
        )
    }

    #[test]
    fn test_error_report_claimed_once() {
        let record = record(None);
        assert!(!record.error_reported());
        assert!(record.claim_error_report());
        assert!(!record.claim_error_report());
        assert!(record.error_reported());
    }

    #[test]
    fn test_hooks_taken_once() {
        let record = record(Some(Box::new(|| Ok(()))));
        assert!(record.has_close_handle());
        assert!(record.take_close().is_some());
        assert!(record.take_close().is_none());
        assert!(record.has_close_handle());

        assert!(record.take_disable().is_none());
        assert!(record.take_on_error().is_some());
        assert!(record.take_on_error().is_none());
    }

    #[test]
    fn test_logger_name_defaults_to_identifier() {
        assert_eq!(record(None).logger_name(), "a");
    }
}
