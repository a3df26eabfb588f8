/**
 * ORCADASH - Operator console entry point
 *
 * ROLE : Load config (YAML + .env + flags), route tracing to a log file,
 * build the I/O runtime and the protocol coordinator, then hand the main
 * thread to the terminal UI until the operator quits.
 */

mod config;
mod console;
mod render;

use crate::config::{load_config, Cli, ConsoleConfig};
use crate::console::Console;
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use orcadash_core::{ProtocolCoordinator, Registry, StateStore};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(log_file: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("Failed to open log file {}", log_file.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("orcadash=info,orcadash_core=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {e}"))
}

fn build_coordinator(cfg: &ConsoleConfig, runtime: &tokio::runtime::Runtime) -> ProtocolCoordinator {
    let store = StateStore::new();
    let registry = Registry::standard();
    match cfg.replay.path {
        Some(_) => ProtocolCoordinator::replay(
            store,
            registry,
            cfg.replay_options(),
            runtime.handle().clone(),
        ),
        None => ProtocolCoordinator::live(store, registry, cfg.tcp_options(), runtime.handle().clone()),
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // fine without a .env
    let cli = Cli::parse();

    let mut cfg = load_config(cli.config.as_deref());
    cfg.apply_cli(&cli);
    init_tracing(&cfg.log_file)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("orcadash-io")
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let coordinator = build_coordinator(&cfg, &runtime);
    let endpoint = cfg.endpoint();
    info!(%endpoint, replay = coordinator.is_replay(), "OrcaDash starting");
    if !coordinator.connect(&endpoint) {
        // the reason is already in the store as a status line
        warn!(%endpoint, "initial connect rejected");
    }

    let result = Console::new(&coordinator, &cfg).run();

    runtime.block_on(coordinator.disconnect());
    info!(
        status = %coordinator.store().read(render::status_line),
        "OrcaDash stopped"
    );
    result
}
