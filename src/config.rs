use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const APP_NAME: &str = "cerebras-monitor";
pub const MIN_REFRESH_INTERVAL_SECS: u64 = 5;
pub const MAX_REFRESH_INTERVAL_SECS: u64 = 3600;
pub const MIN_REFRESH_HZ: u64 = 1;
pub const MAX_REFRESH_HZ: u64 = 60;
const REFRESH_DEADLINE_MARGIN: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub endpoints: EndpointConfig,
    #[serde(default)]
    pub display: DisplayConfig,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_paths().into_iter().find(|path| path.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self =
            toml::from_str(&contents).with_context(|| "failed to parse configuration TOML")?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(key) = env_value("CEREBRAS_API_KEY") {
            self.auth.api_key = Some(key);
        }
        if let Some(token) = env_value("CEREBRAS_SESSION_TOKEN") {
            self.auth.session_token = Some(token);
        }
        if let Some(org) = env_value("CEREBRAS_ORG_ID") {
            self.monitor.organization_id = Some(org);
        }
        if let Some(model) = env_value("CEREBRAS_MODEL") {
            self.monitor.model = model;
        }
        if let Some(url) = env_value("CEREBRAS_API_BASE_URL") {
            self.endpoints.api_base_url = url;
        }
        if let Some(url) = env_value("CEREBRAS_GRAPHQL_URL") {
            self.endpoints.graphql_url = url;
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            api_key: non_empty(self.auth.api_key.as_deref()),
            session_token: non_empty(self.auth.session_token.as_deref()),
        }
    }
}

fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(format!("{APP_NAME}.toml"))];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join(APP_NAME).join("settings.toml"));
    }
    paths
}

fn env_value(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| non_empty(Some(&value)))
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Resolved credential set. Either, both or neither may be present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Bearer key for the inference API; unlocks the header probe.
    pub api_key: Option<String>,
    /// Browser session cookie; unlocks the quota/usage GraphQL queries.
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub region_id: Option<String>,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            organization_id: None,
            model: default_model(),
            region_id: None,
            refresh_interval_secs: default_refresh_interval(),
            request_timeout_secs: default_request_timeout(),
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

impl MonitorConfig {
    pub fn organization(&self) -> Option<&str> {
        self.organization_id
            .as_deref()
            .map(str::trim)
            .filter(|org| !org.is_empty())
    }

    pub fn region(&self) -> Option<&str> {
        self.region_id
            .as_deref()
            .map(str::trim)
            .filter(|region| !region.is_empty())
    }

    /// Timer interval, kept within bounds so the remote service is not hammered.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(
            self.refresh_interval_secs
                .clamp(MIN_REFRESH_INTERVAL_SECS, MAX_REFRESH_INTERVAL_SECS),
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(self.request_timeout_secs).max(1))
    }

    /// Outer bound on a whole refresh. Each source call already stops at
    /// `fetch_timeout`, so this only trips if reconciliation itself stalls.
    pub fn refresh_deadline(&self) -> Duration {
        self.fetch_timeout() + REFRESH_DEADLINE_MARGIN
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_graphql_url")]
    pub graphql_url: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            graphql_url: default_graphql_url(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisplayConfig {
    #[serde(default)]
    pub theme: Theme,
    #[serde(default = "default_refresh_hz")]
    pub refresh_hz: u64,
}

impl DisplayConfig {
    /// Redraw period, with `refresh_hz` held to 1..=60.
    pub fn tick_rate(&self) -> Duration {
        Duration::from_millis(1000 / self.refresh_hz.clamp(MIN_REFRESH_HZ, MAX_REFRESH_HZ))
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            theme: Theme::default(),
            refresh_hz: default_refresh_hz(),
        }
    }
}

fn default_model() -> String {
    "qwen-3-coder-480b".to_string()
}

fn default_refresh_interval() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    10
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_api_base_url() -> String {
    "https://api.cerebras.ai".to_string()
}

fn default_graphql_url() -> String {
    "https://cloud.cerebras.ai/api/graphql".to_string()
}

fn default_refresh_hz() -> u64 {
    10
}
