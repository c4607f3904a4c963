use super::{HeaderTransport, ProbeResponse, SourceError, truncate_body};
use crate::{
    limits::{Resource, SourceReading, Window},
    sources::graphql::parse_count,
};
use reqwest::{
    Client,
    header::{AUTHORIZATION, HeaderMap},
};
use serde_json::json;
use std::time::Duration;

const USER_AGENT: &str = concat!("cerebras-monitor/", env!("CARGO_PKG_VERSION"));
const PROBE_PROMPT: &str = "hello";

/// API-key authenticated client that issues a one-token chat completion and
/// keeps only the response metadata.
#[derive(Clone)]
pub struct ProbeClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl ProbeClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, SourceError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/v1/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
        })
    }
}

impl HeaderTransport for ProbeClient {
    async fn probe(&self, model: &str) -> Result<ProbeResponse, SourceError> {
        let body = json!({
            "model": model,
            "messages": [{ "role": "user", "content": PROBE_PROMPT }],
            "max_completion_tokens": 1,
        });

        tracing::debug!(endpoint = %self.endpoint, model, "rate-limit probe");
        let response = self
            .client
            .post(&self.endpoint)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        if !status.is_success() && !carries_rate_limits(&headers) {
            let text = response.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                status,
                body: truncate_body(&text),
            });
        }
        Ok(ProbeResponse { status, headers })
    }
}

fn header_name(kind: &str, window: Window, resource: Resource) -> String {
    format!(
        "x-ratelimit-{kind}-{}-{}",
        resource.header_suffix(),
        window.header_suffix()
    )
}

fn header_count(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_count)
}

fn carries_rate_limits(headers: &HeaderMap) -> bool {
    headers
        .keys()
        .any(|name| name.as_str().starts_with("x-ratelimit-"))
}

/// Adapts probe response headers into the normalized reading. Windows the
/// service does not echo stay unknown.
pub fn reading_from_headers(response: &ProbeResponse, model: &str) -> SourceReading {
    let mut reading = SourceReading {
        model_id: Some(model.to_string()),
        ..SourceReading::default()
    };
    reading.sources.headers = true;

    for window in Window::ALL {
        for resource in Resource::ALL {
            let raw = reading.quotas.get_mut(window, resource);
            raw.limit = header_count(&response.headers, &header_name("limit", window, resource));
            raw.remaining =
                header_count(&response.headers, &header_name("remaining", window, resource));
            raw.reset_in = header_count(&response.headers, &header_name("reset", window, resource))
                .filter(|seconds| *seconds > 0)
                .map(|seconds| seconds as u64);
        }
    }

    if !response.status.is_success() {
        reading.notes.push(format!(
            "probe request returned {}; limits read from response headers",
            response.status
        ));
    }
    reading
}
