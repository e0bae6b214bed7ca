//! Brewloop Daemon (brewloopd)
//!
//! Runs every configured temperature controller: one control loop, one
//! time-proportioned output driver and a shared probe refresher per vessel.
//!
//! # Lifecycle
//! - **Startup**: load `controllers.json`, build a probe, controller and loop
//!   for each entry; entries without a heat GPIO are reported disabled and skipped
//! - **Run**: each loop polls once per second until a signal arrives
//! - **Shutdown**: on SIGINT/SIGTERM every loop is stopped, its outputs are
//!   released and its settings are saved
//!
//! # Hardware
//! - Outputs: sysfs GPIO (`/sys/class/gpio`)
//! - Probes: DS18B20 over 1-Wire (`/sys/bus/w1/devices`)

mod acquisition;
mod control_loop;
mod output;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use bl_core::constants::paths;
use bl_core::{
    share_probe, Controller, ControllerDeps, JsonSettingsStore, PersistedController,
    SharedMessageBoard, SharedProbe, SysfsGpio, W1Probe,
};
use bl_error::BrewloopError;

use crate::acquisition::ProbeRefresher;
use crate::control_loop::ControlLoop;
use crate::output::GpioOutputFactory;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log filter environment variable
const LOG_ENV: &str = "BREWLOOP_LOG";

/// Global shutdown flag for clean termination
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

// ============================================================================
// CLI
// ============================================================================

fn print_help() {
    eprintln!("brewloopd {} - Brewloop temperature control daemon", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    brewloopd [OPTIONS]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -c, --config DIR    Configuration directory (holds controllers.json)");
    eprintln!("    -v, --version       Print version");
    eprintln!("    -h, --help          Print this help");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    {}        Log level (trace, debug, info, warn, error)", LOG_ENV);
    eprintln!("    {} Configuration directory when -c is not given", paths::CONFIG_DIR_ENV);
}

fn print_version() {
    println!("brewloopd {}", VERSION);
}

// ============================================================================
// Logging
// ============================================================================

/// Install the tracing subscriber; returns true when logging to the journal
fn init_logging(log_level: &str) -> bool {
    // Try to use journald first (for systemd systems), fall back to stdout
    let use_journald = std::path::Path::new("/run/systemd/journal/socket").exists();

    if use_journald {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(log_level))
                    .init();
                return true;
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(log_level)
        .init();
    false
}

// ============================================================================
// Privileges
// ============================================================================

/// GPIO export and 1-Wire reads normally need root; warn rather than refuse
fn check_privileges() {
    // SAFETY: geteuid is always safe - it just returns the process's effective user ID.
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        warn!("Not running as root (euid={}); GPIO and probe access may fail", euid);
    } else {
        debug!("Running as root");
    }
}

// ============================================================================
// Controllers
// ============================================================================

/// Build and start the loop for one saved controller
///
/// Probes are shared between controllers naming the same device; a newly
/// seen probe is read once so the first tick has a value.
async fn start_controller(
    settings: &PersistedController,
    deps: &ControllerDeps,
    probes: &mut HashMap<String, SharedProbe>,
) -> bl_error::Result<Arc<ControlLoop>> {
    if settings.probe.trim().is_empty() {
        return Err(BrewloopError::invalid_config("probe", "no probe configured"));
    }

    let controller = Arc::new(Controller::from_persisted(settings, deps.clone())?);

    let probe = match probes.get(&settings.probe) {
        Some(probe) => Arc::clone(probe),
        None => {
            let probe = share_probe(W1Probe::new(settings.name.clone(), &settings.probe));
            let first = Arc::clone(&probe);
            match tokio::task::spawn_blocking(move || first.refresh()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(controller = %settings.name, "Initial probe read failed: {}", e),
                Err(e) => error!(controller = %settings.name, "Initial probe read panicked: {}", e),
            }
            probe
        }
    };

    let control_loop = Arc::new(ControlLoop::new(controller, Arc::clone(&probe)));
    if let Err(e) = control_loop.start() {
        // Outputs may be half attached; release whatever was opened
        if control_loop.controller().actuator().is_some() {
            if let Err(release) = control_loop.controller().shutdown() {
                warn!(controller = %settings.name, "Cleanup after failed start: {}", release);
            }
        }
        return Err(e);
    }

    probes.entry(settings.probe.clone()).or_insert(probe);
    Ok(control_loop)
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // PHASE 1: Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let mut config_dir: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                return Ok(());
            }
            "-v" | "--version" => {
                print_version();
                return Ok(());
            }
            "-c" | "--config" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --config requires a directory argument");
                    std::process::exit(1);
                }
                config_dir = Some(PathBuf::from(&args[i]));
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    // PHASE 2: Initialize logging
    let log_level = std::env::var(LOG_ENV).unwrap_or_else(|_| "info".to_string());
    let use_journald = init_logging(&log_level);

    info!("STARTUP: brewloopd {} starting", VERSION);
    info!("STARTUP: Logging to {}", if use_journald { "systemd journal" } else { "stdout" });
    info!("STARTUP: Log level: {}", log_level);

    // PHASE 3: Privilege check
    check_privileges();

    // PHASE 4: Load saved controllers
    let store = Arc::new(match config_dir {
        Some(dir) => JsonSettingsStore::in_dir(dir),
        None => JsonSettingsStore::default_location(),
    });
    let saved = store
        .load()
        .with_context(|| format!("Failed to load {}", store.path().display()))?;

    info!("STARTUP: {} controller(s) in {}", saved.len(), store.path().display());
    if saved.is_empty() {
        warn!("No controllers configured, nothing to do");
        return Ok(());
    }

    // PHASE 5: Setup signal handlers
    let shutdown = Arc::new(Notify::new());
    let shutdown_signal = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("SIGNAL: Received SIGINT/SIGTERM - initiating shutdown");
        SHUTDOWN.store(true, Ordering::SeqCst);
        shutdown_signal.notify_one();
    }) {
        warn!("Failed to set signal handler: {}. Shutdown via signals may not work cleanly.", e);
    }

    // PHASE 6: Start one control loop per controller
    let deps = ControllerDeps {
        outputs: Arc::new(GpioOutputFactory::new(SysfsGpio::default(), Handle::current())),
        store: store.clone(),
        messages: Arc::new(SharedMessageBoard::new()),
    };

    let mut probes: HashMap<String, SharedProbe> = HashMap::new();
    let mut loops: Vec<Arc<ControlLoop>> = Vec::new();

    for settings in saved.all() {
        match start_controller(settings, &deps, &mut probes).await {
            Ok(control_loop) => loops.push(control_loop),
            Err(BrewloopError::OutputNotConfigured(reason)) => {
                warn!(controller = %settings.name, "Controller disabled: {}", reason);
            }
            Err(e) => {
                error!(controller = %settings.name, "Failed to start controller: {}", e);
            }
        }
    }

    if loops.is_empty() {
        anyhow::bail!("No controller could be started");
    }

    // PHASE 7: Keep the probes fresh
    let refreshers: Vec<Arc<ProbeRefresher>> = probes
        .into_values()
        .map(|probe| Arc::new(ProbeRefresher::new(probe)))
        .collect();
    for refresher in &refreshers {
        refresher.start();
    }

    info!("STARTUP: {} control loop(s) running", loops.len());

    // PHASE 8: Run until signaled
    if !SHUTDOWN.load(Ordering::SeqCst) {
        shutdown.notified().await;
    }

    // PHASE 9: Orderly shutdown
    for control_loop in &loops {
        let controller = control_loop.controller();
        match serde_json::to_string(&controller.status_snapshot()) {
            Ok(status) => info!(controller = %controller.name(), "Final status: {}", status),
            Err(e) => debug!(controller = %controller.name(), "Could not encode status: {}", e),
        }

        if let Err(e) = control_loop.shutdown().await {
            warn!(controller = %controller.name(), "Failed to save settings on shutdown: {}", e);
        }
    }

    for refresher in &refreshers {
        refresher.stop().await;
    }

    info!("SHUTDOWN: brewloopd stopped");
    Ok(())
}
