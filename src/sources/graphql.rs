use super::{QuotaTransport, SourceError, parse_endpoint, truncate_body};
use crate::limits::{Resource, Window};
use reqwest::{
    Client, Url,
    header::{ACCEPT, COOKIE, ORIGIN, REFERER},
};
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use std::time::Duration;

const USER_AGENT: &str = concat!("cerebras-monitor/", env!("CARGO_PKG_VERSION"));
const SESSION_COOKIE: &str = "authjs.session-token";

pub const LIST_QUOTAS_QUERY: &str = r#"query ListOrganizationUsageQuotas($organizationId: ID!, $modelId: ID, $regionId: ID) {
  ListOrganizationUsageQuotas(
    organizationId: $organizationId
    modelId: $modelId
    regionId: $regionId
  ) {
    modelId
    regionId
    organizationId
    requestsPerMinute
    tokensPerMinute
    requestsPerHour
    tokensPerHour
    requestsPerDay
    tokensPerDay
    maxSequenceLength
    maxCompletionTokens
    __typename
  }
}"#;

pub const LIST_USAGE_QUERY: &str = r#"query ListOrganizationUsage($organizationId: ID!) {
  ListOrganizationUsage(organizationId: $organizationId) {
    modelId
    regionId
    rpm
    tpm
    rph
    tph
    rpd
    tpd
    __typename
  }
}"#;

pub const LIST_ORGANIZATIONS_QUERY: &str = r#"query ListMyOrganizations {
  ListMyOrganizations {
    id
    name
    organizationType
    state
    __typename
  }
}"#;

/// Variable bag shared by the organization-scoped queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryVariables {
    pub organization_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region_id: Option<String>,
}

/// Configured limits for one model/region. Upstream sends numbers as strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaRow {
    #[serde(default)]
    pub model_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub region_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub organization_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub requests_per_minute: Option<i64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub tokens_per_minute: Option<i64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub requests_per_hour: Option<i64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub tokens_per_hour: Option<i64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub requests_per_day: Option<i64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub tokens_per_day: Option<i64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub max_sequence_length: Option<i64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub max_completion_tokens: Option<i64>,
}

impl QuotaRow {
    pub fn limit(&self, window: Window, resource: Resource) -> Option<i64> {
        match (window, resource) {
            (Window::Minute, Resource::Requests) => self.requests_per_minute,
            (Window::Minute, Resource::Tokens) => self.tokens_per_minute,
            (Window::Hour, Resource::Requests) => self.requests_per_hour,
            (Window::Hour, Resource::Tokens) => self.tokens_per_hour,
            (Window::Day, Resource::Requests) => self.requests_per_day,
            (Window::Day, Resource::Tokens) => self.tokens_per_day,
        }
    }
}

/// Current consumption counters for one model/region.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRow {
    #[serde(default)]
    pub model_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub region_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub rpm: Option<i64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub tpm: Option<i64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub rph: Option<i64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub tph: Option<i64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub rpd: Option<i64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub tpd: Option<i64>,
}

impl UsageRow {
    pub fn used(&self, window: Window, resource: Resource) -> Option<i64> {
        match (window, resource) {
            (Window::Minute, Resource::Requests) => self.rpm,
            (Window::Minute, Resource::Tokens) => self.tpm,
            (Window::Hour, Resource::Requests) => self.rph,
            (Window::Hour, Resource::Tokens) => self.tph,
            (Window::Day, Resource::Requests) => self.rpd,
            (Window::Day, Resource::Tokens) => self.tpd,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub organization_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub state: Option<String>,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Option<Vec<ErrorItem>>,
}

#[derive(Deserialize)]
struct ErrorItem {
    message: String,
}

#[derive(Deserialize)]
struct QuotasData {
    #[serde(rename = "ListOrganizationUsageQuotas")]
    rows: Option<Vec<QuotaRow>>,
}

#[derive(Deserialize)]
struct UsageData {
    #[serde(rename = "ListOrganizationUsage")]
    rows: Option<Vec<UsageRow>>,
}

#[derive(Deserialize)]
struct OrganizationsData {
    #[serde(rename = "ListMyOrganizations")]
    rows: Option<Vec<Organization>>,
}

/// Session-token authenticated client for the cloud GraphQL endpoint.
#[derive(Clone)]
pub struct GraphQlClient {
    client: Client,
    url: Url,
    origin: String,
    session_token: String,
}

impl GraphQlClient {
    pub fn new(url: &str, session_token: &str, timeout: Duration) -> Result<Self, SourceError> {
        let url = parse_endpoint(url)?;
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            origin: origin_of(&url),
            url,
            session_token: session_token.to_string(),
        })
    }

    pub async fn query<T: DeserializeOwned>(
        &self,
        operation: &str,
        query: &str,
        variables: Value,
    ) -> Result<T, SourceError> {
        let body = json!({
            "operationName": operation,
            "query": query,
            "variables": variables,
        });

        tracing::debug!(operation, url = %self.url, "graphql request");
        let response = self
            .client
            .post(self.url.clone())
            .header(COOKIE, format!("{SESSION_COOKIE}={}", self.session_token))
            .header(ACCEPT, "application/json")
            .header(ORIGIN, self.origin.as_str())
            .header(REFERER, format!("{}/platform", self.origin))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(SourceError::Status {
                status,
                body: truncate_body(&text),
            });
        }

        let envelope: Envelope<T> = serde_json::from_str(&text)?;
        if let Some(errors) = envelope.errors.filter(|errors| !errors.is_empty()) {
            let message = errors
                .into_iter()
                .map(|error| error.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(SourceError::GraphQl(message));
        }
        envelope
            .data
            .ok_or_else(|| SourceError::GraphQl(format!("{operation} returned no data")))
    }

    pub async fn list_organizations(&self) -> Result<Vec<Organization>, SourceError> {
        let data: OrganizationsData = self
            .query("ListMyOrganizations", LIST_ORGANIZATIONS_QUERY, json!({}))
            .await?;
        Ok(data.rows.unwrap_or_default())
    }
}

impl QuotaTransport for GraphQlClient {
    async fn list_quotas(&self, variables: &QueryVariables) -> Result<Vec<QuotaRow>, SourceError> {
        let data: QuotasData = self
            .query(
                "ListOrganizationUsageQuotas",
                LIST_QUOTAS_QUERY,
                serde_json::to_value(variables)?,
            )
            .await?;
        Ok(data.rows.unwrap_or_default())
    }

    async fn list_usage(&self, variables: &QueryVariables) -> Result<Vec<UsageRow>, SourceError> {
        let data: UsageData = self
            .query(
                "ListOrganizationUsage",
                LIST_USAGE_QUERY,
                json!({ "organizationId": variables.organization_id }),
            )
            .await?;
        Ok(data.rows.unwrap_or_default())
    }
}

/// Scheme, host and port only; credentials, path and query never leak into
/// the `Origin` header.
fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}

fn lenient_count<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64)),
        Some(Value::String(text)) => parse_count(&text),
        _ => None,
    })
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|text| !text.trim().is_empty()))
}

/// Integer or fractional count; anything else is unknown.
pub fn parse_count(text: &str) -> Option<i64> {
    let trimmed = text.trim();
    trimmed
        .parse::<i64>()
        .ok()
        .or_else(|| trimmed.parse::<f64>().ok().filter(|v| v.is_finite()).map(|v| v as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn variables() -> QueryVariables {
        QueryVariables {
            organization_id: "org_test".to_string(),
            model_id: None,
            region_id: None,
        }
    }

    #[test]
    fn quota_rows_accept_string_and_numeric_counts() {
        let row: QuotaRow = serde_json::from_value(json!({
            "modelId": "qwen-3-coder-480b",
            "regionId": "",
            "requestsPerMinute": "30",
            "tokensPerMinute": 275000,
            "requestsPerDay": "28800",
            "tokensPerDay": "-1",
            "maxSequenceLength": "131072",
            "maxCompletionTokens": null,
            "requestsPerHour": "n/a",
            "__typename": "UsageQuota"
        }))
        .unwrap();
        assert_eq!(row.region_id, None);
        assert_eq!(row.requests_per_minute, Some(30));
        assert_eq!(row.tokens_per_minute, Some(275_000));
        assert_eq!(row.limit(Window::Day, Resource::Requests), Some(28_800));
        assert_eq!(row.limit(Window::Day, Resource::Tokens), Some(-1));
        assert_eq!(row.limit(Window::Hour, Resource::Requests), None);
        assert_eq!(row.limit(Window::Hour, Resource::Tokens), None);
        assert_eq!(row.max_sequence_length, Some(131_072));
        assert_eq!(row.max_completion_tokens, None);
    }

    #[test]
    fn variables_skip_absent_dimensions() {
        let value = serde_json::to_value(variables()).unwrap();
        assert_eq!(value, json!({ "organizationId": "org_test" }));
    }

    fn origin(url: &str) -> String {
        origin_of(&Url::parse(url).unwrap())
    }

    #[test]
    fn origin_keeps_only_scheme_host_and_port() {
        assert_eq!(
            origin("https://cloud.cerebras.ai/api/graphql"),
            "https://cloud.cerebras.ai"
        );
        assert_eq!(origin("http://127.0.0.1:9000"), "http://127.0.0.1:9000");
        assert_eq!(origin("https://cloud.cerebras.ai?op=1"), "https://cloud.cerebras.ai");
        assert_eq!(
            origin("https://user:pw@cloud.cerebras.ai/api/graphql?op=1#frag"),
            "https://cloud.cerebras.ai"
        );
    }

    #[test]
    fn malformed_endpoint_is_rejected() {
        let err = GraphQlClient::new("cloud.cerebras.ai/api/graphql", "secret", Duration::from_secs(5))
            .err()
            .unwrap();
        assert!(
            matches!(err, SourceError::InvalidUrl { ref url, .. } if url == "cloud.cerebras.ai/api/graphql")
        );
    }

    #[tokio::test]
    async fn origin_and_referer_omit_credentials() {
        let server = MockServer::start_async().await;
        let origin = server.base_url();
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/graphql")
                    .header("origin", origin.as_str())
                    .header("referer", format!("{origin}/platform"));
                then.status(200)
                    .json_body(json!({ "data": { "ListMyOrganizations": [] } }));
            })
            .await;

        let url = server
            .url("/api/graphql?source=monitor")
            .replacen("://", "://user:pw@", 1);
        let client = GraphQlClient::new(&url, "secret", Duration::from_secs(5)).unwrap();
        let organizations = client.list_organizations().await.unwrap();
        mock.assert_async().await;
        assert!(organizations.is_empty());
    }

    #[tokio::test]
    async fn list_quotas_sends_cookie_and_parses_rows() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/graphql")
                    .header("cookie", "authjs.session-token=secret")
                    .body_contains("ListOrganizationUsageQuotas")
                    .body_contains("org_test");
                then.status(200).json_body(json!({
                    "data": {
                        "ListOrganizationUsageQuotas": [
                            { "modelId": "llama-3.3-70b", "regionId": "us", "requestsPerDay": "14400" },
                            { "modelId": "qwen-3-coder-480b", "regionId": "us", "requestsPerDay": "28800" }
                        ]
                    }
                }));
            })
            .await;

        let client = GraphQlClient::new(
            &server.url("/api/graphql"),
            "secret",
            Duration::from_secs(5),
        )
        .unwrap();
        let rows = client.list_quotas(&variables()).await.unwrap();
        mock.assert_async().await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].model_id, "qwen-3-coder-480b");
        assert_eq!(rows[1].requests_per_day, Some(28_800));
    }

    #[tokio::test]
    async fn graphql_errors_become_source_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/graphql");
                then.status(200).json_body(json!({
                    "data": null,
                    "errors": [{ "message": "Unauthorized" }]
                }));
            })
            .await;

        let client = GraphQlClient::new(
            &server.url("/api/graphql"),
            "expired",
            Duration::from_secs(5),
        )
        .unwrap();
        let err = client.list_usage(&variables()).await.unwrap_err();
        assert!(matches!(err, SourceError::GraphQl(ref message) if message == "Unauthorized"));
    }

    #[tokio::test]
    async fn non_success_status_is_reported() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/graphql");
                then.status(502).body("bad gateway");
            })
            .await;

        let client = GraphQlClient::new(
            &server.url("/api/graphql"),
            "secret",
            Duration::from_secs(5),
        )
        .unwrap();
        let err = client.list_organizations().await.unwrap_err();
        match err {
            SourceError::Status { status, body } => {
                assert_eq!(status.as_u16(), 502);
                assert_eq!(body, "bad gateway");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_body_is_a_decode_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/graphql");
                then.status(200).body("<html>login</html>");
            })
            .await;

        let client = GraphQlClient::new(
            &server.url("/api/graphql"),
            "secret",
            Duration::from_secs(5),
        )
        .unwrap();
        let err = client.list_quotas(&variables()).await.unwrap_err();
        assert!(matches!(err, SourceError::Decode(_)));
    }
}
