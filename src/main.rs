mod app;
mod cli;
mod config;
mod limits;
mod reconcile;
mod refresh;
mod sources;
mod tui;

use anyhow::Result;
use clap::Parser;
use std::fs::OpenOptions;
use tracing_subscriber::EnvFilter;

const LOG_FILE: &str = "cerebras-monitor.log";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    init_tracing(cli.debug);

    let mut config = config::AppConfig::load(cli.config_path.as_deref())?;
    cli.apply_overrides(&mut config);
    tracing::debug!(
        model = %config.monitor.model,
        organization = ?config.monitor.organization(),
        refresh_secs = config.monitor.refresh_interval().as_secs(),
        "configuration loaded"
    );

    let app = app::App::new(config);
    app.run(cli.command()).await
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // Keep the TUI clean: write all tracing output to a file instead of the terminal.
    let writer = || {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(LOG_FILE)
            .expect("failed to open cerebras-monitor.log for tracing output")
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init();
}
