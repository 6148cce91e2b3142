use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use gantry_host::gantry_api::{Exports, ModuleError};
use gantry_host::{
    apply_scan, create_manager_from_config, reload_all, setup_reload_signal, AutoLoadPolicy,
    ConfigLoadError, DependencyManager, GantryConfig, ModuleScanner, ModulesConfig, NativeEngine,
};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

mod logging;

#[derive(Parser)]
#[command(name = "gantry", version = env!("VERSION_STRING"), about, long_about = None)]
pub struct Cli {
    /// Config file to use instead of the default location
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enables debug logging (repeat for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    debug: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List loadable modules; `*` marks modules loaded at startup
    List,
    /// Load modules, report the result and shut down
    Load {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Load modules, unload them again and report the result
    Unload {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Load startup modules and serve reloads until ctrl-c
    Run,
}

fn load_config(path: Option<&Path>) -> anyhow::Result<GantryConfig> {
    match path {
        Some(path) => GantryConfig::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => match GantryConfig::load_or_default() {
            Ok(config) => Ok(config),
            Err(ConfigLoadError::NoConfigDir) => Ok(GantryConfig::default()),
            Err(err) => Err(err).context("Failed to load config"),
        },
    }
}

/// A manager over the configured module directory, with a `gantry` system module
fn build_manager(config: &ModulesConfig) -> anyhow::Result<Arc<DependencyManager>> {
    let natives = Arc::new(NativeEngine::new());
    let manager = create_manager_from_config(config, natives, None);

    let host_info = serde_json::json!({ "version": env!("VERSION_STRING") });
    manager.set_system_module("gantry", Exports::json(host_info))?;

    Ok(manager)
}

fn report(err: ModuleError) -> String {
    format!("{:#}", anyhow::Error::new(err))
}

fn list(config: &ModulesConfig) -> anyhow::Result<bool> {
    let manager = build_manager(config)?;
    let policy = AutoLoadPolicy::from_config(config)?;

    let modules = manager.loadable_modules();
    if modules.is_empty() {
        println!("No modules found in {}", config.module_dir().display());
    }
    for id in modules {
        let marker = if policy.eligible(&id) { "*" } else { " " };
        println!("{} {}", marker, id);
    }
    Ok(true)
}

fn load(config: &ModulesConfig, ids: &[String]) -> anyhow::Result<bool> {
    let manager = build_manager(config)?;
    let mut ok = true;

    for id in ids {
        match manager.load(id) {
            Ok(record) => println!("loaded {} (generation {})", id, record.generation()),
            Err(err) => {
                ok = false;
                eprintln!("failed to load {}: {}", id, report(err));
            }
        }
    }

    for record in manager.loaded_modules() {
        let dependencies = manager.dependencies(&record);
        if !dependencies.is_empty() {
            let names: Vec<String> = dependencies.iter().map(ToString::to_string).collect();
            println!("  {} requires {}", record.identifier(), names.join(", "));
        }
    }

    manager.shutdown();
    Ok(ok)
}

fn unload(config: &ModulesConfig, ids: &[String]) -> anyhow::Result<bool> {
    let manager = build_manager(config)?;
    let mut ok = true;

    for id in ids {
        if let Err(err) = manager.load(id) {
            ok = false;
            eprintln!("failed to load {}: {}", id, report(err));
        }
    }

    for id in ids {
        // already gone if an earlier unload cascaded to it
        let Some(record) = manager.get(id) else {
            continue;
        };
        match manager.unload(&record) {
            Ok(()) => println!("unloaded {}", id),
            Err(err) => {
                ok = false;
                eprintln!("failed to unload {}: {}", id, report(err));
            }
        }
    }

    manager.shutdown();
    Ok(ok)
}

fn is_idle(maintenance: &Option<JoinHandle<()>>) -> bool {
    maintenance.as_ref().map_or(true, JoinHandle::is_finished)
}

/// Run `work` on the blocking pool unless earlier work is still running
///
/// Reloads run module hooks, which may block, so they stay off the runtime
/// threads. Returns whether `work` was started.
fn start_maintenance<F>(maintenance: &mut Option<JoinHandle<()>>, work: F) -> bool
where
    F: FnOnce() + Send + 'static,
{
    if !is_idle(maintenance) {
        return false;
    }
    *maintenance = Some(tokio::task::spawn_blocking(work));
    true
}

async fn run(config: &ModulesConfig) -> anyhow::Result<bool> {
    let manager = build_manager(config)?;
    let policy = AutoLoadPolicy::from_config(config)?;

    let failures = manager.load_eligible(&policy);
    for (id, err) in &failures {
        error!("Module {} failed to start: {:#}", id, anyhow::Error::new(err.clone()));
    }

    let mut reload_rx = setup_reload_signal();
    let mut reload_signal_open = true;

    let interval = Duration::from_millis(config.hot_reload_interval_ms.max(1));
    let mut scanner = config
        .hot_reload
        .then(|| ModuleScanner::with_interval(config.module_dir(), interval));
    let mut ticker = tokio::time::interval(interval);

    info!(
        "Running with {} module(s) loaded (hot reload {})",
        manager.loaded_modules().len(),
        if scanner.is_some() { "on" } else { "off" }
    );

    let mut maintenance: Option<JoinHandle<()>> = None;

    loop {
        let idle = is_idle(&maintenance);

        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("Failed to listen for ctrl-c: {}", e);
                }
                info!("Shutting down");
                break;
            }
            changed = reload_rx.changed(), if reload_signal_open => {
                match changed {
                    Ok(()) if idle => {
                        let manager = manager.clone();
                        start_maintenance(&mut maintenance, move || {
                            let loaded = reload_all(&manager);
                            info!("Reload complete, {} module(s) loaded", loaded);
                        });
                    }
                    Ok(()) => warn!("Reload requested while another reload is running; ignoring"),
                    Err(_) => {
                        warn!("Reload signal handler stopped");
                        reload_signal_open = false;
                    }
                }
            }
            _ = ticker.tick(), if scanner.is_some() && idle => {
                if let Some(scanner) = scanner.as_mut() {
                    let scan = scanner.scan_changes();
                    if scan.has_changes() {
                        let manager = manager.clone();
                        start_maintenance(&mut maintenance, move || {
                            apply_scan(&manager, &scan);
                        });
                    }
                }
            }
        }
    }

    if let Some(task) = maintenance.take() {
        if !task.is_finished() {
            info!("Waiting for the running reload to finish");
        }
        if let Err(e) = task.await {
            error!("Reload task failed: {}", e);
        }
    }

    let unloaded = manager.shutdown();
    info!("Unloaded {} module(s)", unloaded);
    Ok(failures.is_empty())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            return ExitCode::FAILURE;
        }
    };

    let level = match cli.debug {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let _guard = match logging::init_logging("cli", level, config.log_to_file) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: failed to initialize logging: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let result = match &cli.command {
        Command::List => list(&config.modules),
        Command::Load { ids } => load(&config.modules, ids),
        Command::Unload { ids } => unload(&config.modules, ids),
        Command::Run => run(&config.modules).await,
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}
