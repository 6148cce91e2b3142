//! Lifecycle event bus
//!
//! Every state transition the manager performs is published here, together
//! with error delivery notifications. Publishing never blocks; events sent
//! while nobody is subscribed are dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use gantry_api::{ModuleError, ModuleId, ModuleState};
use tokio::sync::broadcast;

/// Default capacity of the lifecycle broadcast channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// What happened to a module
#[derive(Debug, Clone)]
pub enum ModuleEventKind {
    /// The module moved between lifecycle states
    Transition { from: ModuleState, to: ModuleState },
    /// A load attempt failed and was surfaced to the caller
    LoadFailed { error: ModuleError },
    /// A failure was delivered to the module's error sink
    ErrorReported { error: ModuleError },
    /// A failure arrived after the error sink had already fired and was only logged
    ErrorSwallowed { error: ModuleError },
}

#[derive(Debug, Clone)]
pub struct ModuleEvent {
    pub id: ModuleId,
    pub kind: ModuleEventKind,
    /// Position of this event in the manager's event stream
    pub sequence: u64,
    pub timestamp: Instant,
}

impl ModuleEvent {
    /// The `(from, to)` pair if this is a state transition
    pub fn transition(&self) -> Option<(ModuleState, ModuleState)> {
        match self.kind {
            ModuleEventKind::Transition { from, to } => Some((from, to)),
            _ => None,
        }
    }
}

/// Sender side of the lifecycle event stream
#[derive(Debug)]
pub struct LifecycleEvents {
    sender: broadcast::Sender<ModuleEvent>,
    sequence: AtomicU64,
}

impl LifecycleEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, id: &ModuleId, kind: ModuleEventKind) {
        let event = ModuleEvent {
            id: id.clone(),
            kind,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            timestamp: Instant::now(),
        };
        let _ = self.sender.send(event);
    }

    pub fn transition(&self, id: &ModuleId, from: ModuleState, to: ModuleState) {
        tracing::debug!(target: "modules", "Module {}: {} -> {}", id, from, to);
        self.publish(id, ModuleEventKind::Transition { from, to });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModuleEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LifecycleEvents {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let events = LifecycleEvents::default();
        assert_eq!(events.subscriber_count(), 0);
        events.transition(&"a".into(), ModuleState::Unloaded, ModuleState::Loading);
    }

    #[test]
    fn test_sequence_is_monotonic() {
        let events = LifecycleEvents::new(8);
        let mut rx = events.subscribe();

        events.transition(&"a".into(), ModuleState::Unloaded, ModuleState::Loading);
        events.transition(&"a".into(), ModuleState::Loading, ModuleState::Loaded);

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert!(first.sequence < second.sequence);
        assert_eq!(
            second.transition(),
            Some((ModuleState::Loading, ModuleState::Loaded))
        );
    }
}
