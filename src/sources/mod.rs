pub mod graphql;
pub mod probe;
pub mod quota;

use reqwest::{StatusCode, Url, header::HeaderMap};
use std::{future::Future, time::Duration};
use thiserror::Error;

pub use graphql::{GraphQlClient, Organization, QuotaRow, QueryVariables, UsageRow};
pub use probe::ProbeClient;

/// Failure of a single remote source. Always recoverable at the reconciler.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("graphql error: {0}")]
    GraphQl(String),
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid endpoint URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Parses a configured endpoint, keeping the offending text in the error.
fn parse_endpoint(url: &str) -> Result<Url, SourceError> {
    Url::parse(url).map_err(|err| SourceError::InvalidUrl {
        url: url.to_string(),
        reason: err.to_string(),
    })
}

/// Rich quota/usage interface keyed by organization.
pub trait QuotaTransport: Send + Sync {
    fn list_quotas(
        &self,
        variables: &QueryVariables,
    ) -> impl Future<Output = Result<Vec<QuotaRow>, SourceError>> + Send;

    fn list_usage(
        &self,
        variables: &QueryVariables,
    ) -> impl Future<Output = Result<Vec<UsageRow>, SourceError>> + Send;
}

/// Response metadata of a probe request.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// Shallow interface that reads limits echoed back on a minimal request.
pub trait HeaderTransport: Send + Sync {
    fn probe(&self, model: &str) -> impl Future<Output = Result<ProbeResponse, SourceError>> + Send;
}

fn truncate_body(body: &str) -> String {
    const MAX_BODY_CHARS: usize = 200;
    if body.chars().count() <= MAX_BODY_CHARS {
        return body.to_string();
    }
    let mut truncated: String = body.chars().take(MAX_BODY_CHARS - 1).collect();
    truncated.push('…');
    truncated
}
