use crate::{
    cli::Command,
    config::AppConfig,
    limits::{RateLimitSnapshot, Resource, Window},
    reconcile::{LiveReconciler, ReconcileError},
    sources::{GraphQlClient, Organization, QueryVariables, QuotaRow, QuotaTransport},
    tui::{
        self,
        view::{format_count, gauge_rows},
    },
};
use anyhow::{Context, Result, bail};
use std::{
    io::{self, Write},
    sync::Arc,
};

/// High-level application orchestrator.
pub struct App {
    config: Arc<AppConfig>,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub async fn run(self, command: Command) -> Result<()> {
        match command {
            Command::Dashboard => {
                // Configuration problems surface here, before the terminal is taken over.
                let reconciler = self.reconciler()?;
                tracing::info!(plan = ?reconciler.plan(), "launching interactive TUI");
                tui::run(self.config.clone(), reconciler).await
            }
            Command::Usage => self.print_usage().await,
            Command::Quotas => self.print_quotas().await,
            Command::Organizations => self.print_organizations().await,
        }
    }

    fn reconciler(&self) -> Result<LiveReconciler> {
        LiveReconciler::from_config(&self.config).context("invalid monitor configuration")
    }

    async fn print_usage(&self) -> Result<()> {
        let reconciler = self.reconciler()?;
        let timeout = self.config.monitor.refresh_deadline();
        let snapshot = tokio::time::timeout(timeout, reconciler.reconcile())
            .await
            .unwrap_or_else(|_| Err(ReconcileError::Timeout(timeout)))
            .context("failed to fetch rate limits")?;
        write_usage_report(&mut io::stdout().lock(), &snapshot)?;
        Ok(())
    }

    async fn print_quotas(&self) -> Result<()> {
        let client = self.graphql_client()?;
        let Some(organization_id) = self.config.monitor.organization() else {
            return Err(ReconcileError::MissingOrganization.into());
        };
        let variables = QueryVariables {
            organization_id: organization_id.to_string(),
            model_id: None,
            region_id: self.config.monitor.region().map(str::to_string),
        };
        let rows = client
            .list_quotas(&variables)
            .await
            .context("failed to list usage quotas")?;
        write_quota_rows(&mut io::stdout().lock(), &rows)?;
        Ok(())
    }

    async fn print_organizations(&self) -> Result<()> {
        let client = self.graphql_client()?;
        let organizations = client
            .list_organizations()
            .await
            .context("failed to list organizations")?;
        write_organizations(&mut io::stdout().lock(), &organizations)?;
        Ok(())
    }

    fn graphql_client(&self) -> Result<GraphQlClient> {
        let Some(token) = self.config.credentials().session_token else {
            bail!("a session token is required; set CEREBRAS_SESSION_TOKEN or [auth].session_token");
        };
        GraphQlClient::new(
            &self.config.endpoints.graphql_url,
            &token,
            self.config.monitor.request_timeout(),
        )
        .context("failed to build GraphQL client")
    }
}

fn write_usage_report(out: &mut impl Write, snapshot: &RateLimitSnapshot) -> io::Result<()> {
    writeln!(out, "Model:        {}", snapshot.model_id)?;
    if let Some(region) = &snapshot.region_id {
        writeln!(out, "Region:       {region}")?;
    }
    if let Some(org) = &snapshot.organization_id {
        writeln!(out, "Organization: {org}")?;
    }
    writeln!(out, "Sources:      {}", snapshot.sources)?;
    writeln!(out)?;
    writeln!(
        out,
        "{:<18} {:>12} {:>12} {:>12} {:>8} {:>10}",
        "Metric", "Used", "Remaining", "Limit", "Used %", "Resets In"
    )?;
    for row in gauge_rows(snapshot) {
        writeln!(
            out,
            "{:<18} {:>12} {:>12} {:>12} {:>8} {:>10}",
            row.label(),
            row.used_text(),
            row.remaining_text(),
            row.limit_text(),
            row.percent_text(),
            row.reset_text()
        )?;
    }
    for note in &snapshot.notes {
        writeln!(out, "note: {note}")?;
    }
    Ok(())
}

fn write_quota_rows(out: &mut impl Write, rows: &[QuotaRow]) -> io::Result<()> {
    if rows.is_empty() {
        return writeln!(out, "No quota rows returned.");
    }
    write!(out, "{:<28} {:<12}", "Model", "Region")?;
    for window in Window::ALL {
        for resource in Resource::ALL {
            write!(out, " {:>14}", format!("{}/{}", resource.header_suffix(), window.header_suffix()))?;
        }
    }
    writeln!(out)?;
    for row in rows {
        write!(
            out,
            "{:<28} {:<12}",
            row.model_id,
            row.region_id.as_deref().unwrap_or("-")
        )?;
        for window in Window::ALL {
            for resource in Resource::ALL {
                write!(out, " {:>14}", quota_cell(row.limit(window, resource)))?;
            }
        }
        writeln!(out)?;
    }
    Ok(())
}

fn quota_cell(value: Option<i64>) -> String {
    match value {
        None => "-".to_string(),
        Some(limit) if limit < 0 => "unlimited".to_string(),
        Some(limit) => format_count(limit as u64),
    }
}

fn write_organizations(out: &mut impl Write, organizations: &[Organization]) -> io::Result<()> {
    if organizations.is_empty() {
        return writeln!(out, "No organizations found.");
    }
    writeln!(out, "{:<28} {:<32} {:<12} {:<10}", "ID", "Name", "Type", "State")?;
    for org in organizations {
        writeln!(
            out,
            "{:<28} {:<32} {:<12} {:<10}",
            org.id,
            org.name,
            org.organization_type.as_deref().unwrap_or("-"),
            org.state.as_deref().unwrap_or("-")
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::{RawQuota, SourceReading};
    use chrono::Utc;

    fn render<F>(write: F) -> String
    where
        F: FnOnce(&mut Vec<u8>) -> io::Result<()>,
    {
        let mut out = Vec::new();
        write(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn usage_report_lists_every_window() {
        let mut reading = SourceReading::default();
        reading.sources.headers = true;
        *reading.quotas.get_mut(Window::Day, Resource::Requests) = RawQuota {
            limit: Some(28_800),
            used: None,
            remaining: Some(27_593),
            reset_in: Some(62_341),
        };
        reading.notes.push("usage counters unavailable".to_string());
        let snapshot = RateLimitSnapshot::from_reading(reading, "qwen-3-coder-480b", None, Utc::now());

        let text = render(|out| write_usage_report(out, &snapshot));
        assert!(text.contains("Model:        qwen-3-coder-480b"));
        assert!(text.contains("27,593"));
        assert!(text.contains("17h19m"));
        assert!(text.contains("Minute Tokens"));
        assert!(text.contains("Unknown"));
        assert!(text.contains("note: usage counters unavailable"));
        assert!(!text.contains("Organization:"));
    }

    #[test]
    fn quota_rows_show_unlimited_and_missing_limits() {
        let rows = vec![QuotaRow {
            model_id: "qwen-3-coder-480b".to_string(),
            region_id: Some("us".to_string()),
            requests_per_day: Some(28_800),
            tokens_per_day: Some(-1),
            ..QuotaRow::default()
        }];
        let text = render(|out| write_quota_rows(out, &rows));
        assert!(text.contains("requests/day"));
        assert!(text.contains("28,800"));
        assert!(text.contains("unlimited"));
        assert!(text.contains(" -"));
        assert_eq!(render(|out| write_quota_rows(out, &[])), "No quota rows returned.\n");
    }

    #[test]
    fn organizations_are_tabulated() {
        let orgs = vec![Organization {
            id: "org_123".to_string(),
            name: "Personal".to_string(),
            organization_type: Some("personal".to_string()),
            state: None,
        }];
        let text = render(|out| write_organizations(out, &orgs));
        assert!(text.contains("org_123"));
        assert!(text.contains("Personal"));
        assert!(text.lines().count() == 2);
    }
}
