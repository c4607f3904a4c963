use crate::{
    config::AppConfig,
    limits::{RateLimitSnapshot, SourceReading},
    sources::{
        GraphQlClient, HeaderTransport, ProbeClient, QueryVariables, QuotaTransport, SourceError,
        probe::reading_from_headers, quota::reading_from_rows,
    },
};
use chrono::Utc;
use std::{future::Future, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(
        "no authentication method configured; set CEREBRAS_API_KEY or CEREBRAS_SESSION_TOKEN"
    )]
    NoCredentials,
    #[error("organization ID is required when using session token authentication")]
    MissingOrganization,
    #[error("failed to initialise HTTP client: {0}")]
    Client(#[source] SourceError),
    #[error("{}", failure_summary(.quota, .headers))]
    SourcesFailed {
        quota: Option<SourceError>,
        headers: Option<SourceError>,
    },
    #[error("refresh timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

fn failure_summary(quota: &Option<SourceError>, headers: &Option<SourceError>) -> String {
    let mut parts = Vec::new();
    if let Some(err) = quota {
        parts.push(format!("quota/usage source failed: {err}"));
    }
    if let Some(err) = headers {
        parts.push(format!("response-header source failed: {err}"));
    }
    if parts.is_empty() {
        "no rate-limit source succeeded".to_string()
    } else {
        parts.join("; ")
    }
}

/// What the reconciler is tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub model: String,
    pub organization_id: Option<String>,
    pub region_id: Option<String>,
}

impl Target {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.monitor.model.clone(),
            organization_id: config.monitor.organization().map(str::to_string),
            region_id: config.monitor.region().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourcePlan {
    HeadersOnly,
    QuotaOnly,
    QuotaWithEnrichment,
}

struct QuotaSource<Q> {
    transport: Q,
    organization_id: String,
}

/// Produces one snapshot per call from whichever sources are usable.
pub struct Reconciler<Q, H> {
    quota: Option<QuotaSource<Q>>,
    headers: Option<H>,
    target: Target,
    source_timeout: Duration,
}

const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(30);

/// Bounds one remote call so a stalled source fails on its own instead of
/// holding up the other.
async fn within<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, SourceError>>,
) -> Result<T, SourceError> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or_else(|_| Err(SourceError::Timeout(limit)))
}

pub type LiveReconciler = Reconciler<GraphQlClient, ProbeClient>;

impl LiveReconciler {
    pub fn from_config(config: &AppConfig) -> Result<Self, ReconcileError> {
        let credentials = config.credentials();
        let timeout = config.monitor.request_timeout();

        let quota = credentials
            .session_token
            .as_deref()
            .map(|token| GraphQlClient::new(&config.endpoints.graphql_url, token, timeout))
            .transpose()
            .map_err(ReconcileError::Client)?;
        let headers = credentials
            .api_key
            .as_deref()
            .map(|key| ProbeClient::new(&config.endpoints.api_base_url, key, timeout))
            .transpose()
            .map_err(ReconcileError::Client)?;

        Ok(Reconciler::new(quota, headers, Target::from_config(config))?
            .with_source_timeout(config.monitor.fetch_timeout()))
    }
}

impl<Q, H> Reconciler<Q, H>
where
    Q: QuotaTransport,
    H: HeaderTransport,
{
    /// Applies the source-selection rules. A quota transport without an
    /// organization is a configuration error unless the header probe can
    /// stand in for it.
    pub fn new(quota: Option<Q>, headers: Option<H>, target: Target) -> Result<Self, ReconcileError> {
        let quota = match (quota, target.organization_id.clone()) {
            (Some(transport), Some(organization_id)) => Some(QuotaSource {
                transport,
                organization_id,
            }),
            (Some(_), None) if headers.is_some() => {
                tracing::info!("no organization configured; using response headers only");
                None
            }
            (Some(_), None) => return Err(ReconcileError::MissingOrganization),
            (None, _) => None,
        };
        if quota.is_none() && headers.is_none() {
            return Err(ReconcileError::NoCredentials);
        }
        Ok(Self {
            quota,
            headers,
            target,
            source_timeout: DEFAULT_SOURCE_TIMEOUT,
        })
    }

    pub fn with_source_timeout(mut self, limit: Duration) -> Self {
        self.source_timeout = limit;
        self
    }

    pub fn plan(&self) -> SourcePlan {
        match (self.quota.is_some(), self.headers.is_some()) {
            (true, true) => SourcePlan::QuotaWithEnrichment,
            (true, false) => SourcePlan::QuotaOnly,
            _ => SourcePlan::HeadersOnly,
        }
    }

    pub async fn reconcile(&self) -> Result<RateLimitSnapshot, ReconcileError> {
        let fetched_at = Utc::now();
        let reading = match (&self.quota, &self.headers) {
            (Some(quota), Some(headers)) => {
                let (quota_result, header_result) =
                    tokio::join!(self.fetch_quota(quota), self.fetch_headers(headers));
                combine(quota_result, header_result)?
            }
            (Some(quota), None) => {
                self.fetch_quota(quota)
                    .await
                    .map_err(|err| ReconcileError::SourcesFailed {
                        quota: Some(err),
                        headers: None,
                    })?
            }
            (None, Some(headers)) => {
                self.fetch_headers(headers)
                    .await
                    .map_err(|err| ReconcileError::SourcesFailed {
                        quota: None,
                        headers: Some(err),
                    })?
            }
            (None, None) => return Err(ReconcileError::NoCredentials),
        };

        Ok(RateLimitSnapshot::from_reading(
            reading,
            &self.target.model,
            self.quota
                .as_ref()
                .map(|quota| quota.organization_id.clone()),
            fetched_at,
        ))
    }

    async fn fetch_quota(&self, quota: &QuotaSource<Q>) -> Result<SourceReading, SourceError> {
        let variables = QueryVariables {
            organization_id: quota.organization_id.clone(),
            model_id: None,
            region_id: self.target.region_id.clone(),
        };
        let (quotas, usage) = tokio::join!(
            within(self.source_timeout, quota.transport.list_quotas(&variables)),
            within(self.source_timeout, quota.transport.list_usage(&variables))
        );
        let quotas = quotas?;
        let usage = match usage {
            Ok(rows) => Some(rows),
            Err(err) => {
                tracing::warn!(error = %err, "usage query failed; assuming full capacity");
                None
            }
        };

        let mut reading = reading_from_rows(&quotas, usage.as_deref(), &self.target.model);
        if usage.is_none() {
            reading
                .notes
                .push("usage counters unavailable; assuming full capacity".to_string());
        }
        Ok(reading)
    }

    async fn fetch_headers(&self, headers: &H) -> Result<SourceReading, SourceError> {
        let response = within(self.source_timeout, headers.probe(&self.target.model)).await?;
        let mut reading = reading_from_headers(&response, &self.target.model);
        if !reading.has_rate_data() {
            tracing::debug!(status = %response.status, "probe response carried no rate-limit headers");
            reading
                .notes
                .push("probe response carried no rate-limit headers".to_string());
        }
        Ok(reading)
    }
}

/// Merges the two source results. The quota reading is authoritative and the
/// header reading only plugs its gaps; a failed side degrades to the other.
pub fn combine(
    quota: Result<SourceReading, SourceError>,
    headers: Result<SourceReading, SourceError>,
) -> Result<SourceReading, ReconcileError> {
    match (quota, headers) {
        (Ok(mut reading), Ok(enrichment)) => {
            reading.enrich_from(&enrichment);
            Ok(reading)
        }
        (Ok(mut reading), Err(err)) => {
            tracing::warn!(error = %err, "response-header enrichment failed");
            reading
                .notes
                .push(format!("reset times unavailable: response-header probe failed ({err})"));
            Ok(reading)
        }
        (Err(err), Ok(mut fallback)) => {
            tracing::warn!(error = %err, "quota/usage source failed; falling back to response headers");
            fallback.notes.insert(
                0,
                format!("quota/usage source unavailable ({err}); showing response-header limits"),
            );
            Ok(fallback)
        }
        (Err(quota), Err(headers)) => Err(ReconcileError::SourcesFailed {
            quota: Some(quota),
            headers: Some(headers),
        }),
    }
}
