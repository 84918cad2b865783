pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod logging;
pub mod process;
pub mod shell;
pub mod state;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::OnceLock;
use tracing::{error, info};

use cli::Cli;
use state::SharedRegistry;

// Registry the panic hook stops; set once the shell is about to start
static PANIC_CLEANUP: OnceLock<SharedRegistry> = OnceLock::new();

/// Stop every tracked model from inside a panic hook.
/// Does nothing before the registry exists.
pub fn cleanup_on_panic() {
    if let Some(state) = PANIC_CLEANUP.get() {
        stop_for_panic(state);
    }
}

fn stop_for_panic(state: &SharedRegistry) -> bool {
    // the panicking thread may be the one holding the lock
    match state.try_stop_all() {
        Some(summary) => {
            for failure in &summary.failed {
                eprintln!("Failed to stop model during panic cleanup: {}", failure);
            }
            true
        }
        None => {
            error!("Registry busy during panic cleanup; models may still be running");
            false
        }
    }
}

/// Parse arguments, build the registry and hand it to the shell.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_level)?;

    let config = cli.resolve_config();
    info!("Starting {} {}", app::APP_NAME, app::APP_VERSION);

    if cli.write_config {
        let path = cli.write_config(&config)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    if cli.list {
        let catalog = config.catalog();
        for name in catalog.names() {
            let script = catalog.resolve(name)?;
            println!("{:<12} {}", name, script.display());
        }
        return Ok(());
    }

    // tokio::process needs the runtime to exist before the registry spawns anything
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio runtime")?;

    let state = SharedRegistry::new(config.build_registry());
    let _ = PANIC_CLEANUP.set(state.clone());
    runtime.block_on(shell::run(state))
}
