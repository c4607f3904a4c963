use crate::config::{AppConfig, Theme};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line interface for the rate-limit monitor.
#[derive(Debug, Parser)]
#[command(author, version, about = "Terminal dashboard for Cerebras API rate limits", long_about = None)]
pub struct Cli {
    /// Path to a TOML configuration file (defaults to ./cerebras-monitor.toml if present).
    #[arg(long, value_name = "FILE", global = true)]
    pub config_path: Option<PathBuf>,
    /// Organization ID for quota and usage queries.
    #[arg(long, value_name = "ID", global = true)]
    pub org_id: Option<String>,
    /// Model whose limits are tracked.
    #[arg(long, global = true)]
    pub model: Option<String>,
    /// Region to prefer when matching quota and usage rows.
    #[arg(long, value_name = "ID", global = true)]
    pub region_id: Option<String>,
    /// Seconds between automatic refreshes (5 to 3600).
    #[arg(long, value_name = "SECS", global = true)]
    pub refresh_rate: Option<u64>,
    #[arg(long, value_enum, global = true)]
    pub theme: Option<Theme>,
    /// Log at debug level.
    #[arg(long, global = true)]
    pub debug: bool,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the interactive dashboard (default).
    Dashboard,
    /// Fetch rate limits once and print them.
    Usage,
    /// Print the raw quota rows for the organization.
    Quotas,
    /// List organizations visible to the session token.
    Organizations,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Dashboard)
    }

    /// Flags win over file and environment values.
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(org) = &self.org_id {
            config.monitor.organization_id = Some(org.clone());
        }
        if let Some(model) = &self.model {
            config.monitor.model = model.clone();
        }
        if let Some(region) = &self.region_id {
            config.monitor.region_id = Some(region.clone());
        }
        if let Some(secs) = self.refresh_rate {
            config.monitor.refresh_interval_secs = secs;
        }
        if let Some(theme) = self.theme {
            config.display.theme = theme;
        }
    }
}
