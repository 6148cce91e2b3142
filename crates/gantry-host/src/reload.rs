use tokio::sync::watch;
use tracing::info;

use crate::manager::{describe, DependencyManager};

/// Reload signal type (empty - just signals that a reload is requested)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadSignal;

/// Create a reload signal channel and spawn a SIGUSR2 handler
///
/// Returns a receiver that is notified when SIGUSR2 is received. Must be called
/// from within a tokio runtime.
#[cfg(unix)]
pub fn setup_reload_signal() -> watch::Receiver<Option<ReloadSignal>> {
    let (reload_tx, reload_rx) = watch::channel(None);

    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigusr2 = match signal(SignalKind::user_defined2()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(target: "modules", "Failed to register SIGUSR2 handler: {}", e);
                return;
            }
        };

        loop {
            tokio::select! {
                _ = reload_tx.closed() => {
                    info!(target: "modules", "Reload signal receiver dropped, shutting down SIGUSR2 handler");
                    break;
                }
                received = sigusr2.recv() => {
                    if received.is_none() {
                        break;
                    }
                }
            }

            info!(target: "modules", "Received SIGUSR2 - triggering module reload");
            if reload_tx.send(Some(ReloadSignal)).is_err() {
                tracing::error!(target: "modules", "Failed to send reload signal - receiver dropped");
                break;
            }
        }
    });

    reload_rx
}

/// Create a reload signal channel (non-Unix platforms don't support SIGUSR2)
#[cfg(not(unix))]
pub fn setup_reload_signal() -> watch::Receiver<Option<ReloadSignal>> {
    let (reload_tx, reload_rx) = watch::channel(None);
    tracing::warn!(target: "modules", "SIGUSR2 reload not supported on this platform");
    // Keep the sender alive but never send signals
    std::mem::forget(reload_tx);
    reload_rx
}

/// Reload every loaded module whose dependencies have not already reloaded it
///
/// Modules are visited in load order; reloading a module also reloads its
/// dependents, so those are skipped when their turn comes. Returns the number
/// of modules loaded afterwards.
pub fn reload_all(manager: &DependencyManager) -> usize {
    let before: Vec<_> = manager.loaded_modules();
    info!(target: "modules", "Reloading {} module(s)", before.len());

    for record in &before {
        let still_same = manager
            .get(record.identifier().as_str())
            .is_some_and(|live| live.generation() == record.generation());
        if !still_same {
            continue;
        }
        if let Err(err) = manager.reload(record.identifier().as_str()) {
            tracing::warn!(
                target: "modules",
                "Failed to reload module {}: {}",
                record.identifier(),
                describe(&err)
            );
        }
    }

    manager.loaded_modules().len()
}
