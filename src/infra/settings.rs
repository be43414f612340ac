//! Usage: Client configuration (identity provider endpoints, scopes, API endpoint list).
//!
//! Everything is externally supplied: no dynamic discovery is performed.

use crate::shared::error::{AppError, AppResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_PATH_ENV: &str = "AUTHFETCH_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "authfetch.toml";

const DEFAULT_REDIRECT_HOST: &str = "localhost";
const DEFAULT_CALLBACK_PATH: &str = "/callback";
const DEFAULT_CALLBACK_PORT: u16 = 8400;
const DEFAULT_REFRESH_LEAD_SECS: i64 = 300;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Identity provider authorization endpoint.
    pub authorize_url: String,
    /// Identity provider token endpoint.
    pub token_url: String,
    /// Identity provider end-session endpoint, if the provider exposes one.
    #[serde(default)]
    pub end_session_url: Option<String>,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Scope strings requested on every acquisition attempt.
    pub scopes: Vec<String>,
    #[serde(default = "default_redirect_host")]
    pub redirect_host: String,
    #[serde(default = "default_callback_path")]
    pub callback_path: String,
    /// Preferred loopback port; a dynamic port is used when it is taken.
    #[serde(default = "default_callback_port")]
    pub callback_port: u16,
    /// Refresh the access token this many seconds before its recorded expiry.
    #[serde(default = "default_refresh_lead_s")]
    pub refresh_lead_s: i64,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Protected endpoints fetched each cycle, in declaration order.
    pub endpoints: Vec<EndpointConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    pub url: String,
    /// A 2xx from this endpoint grants the elevated-access banner.
    #[serde(default)]
    pub signals_elevated: bool,
}

fn default_redirect_host() -> String {
    DEFAULT_REDIRECT_HOST.to_string()
}

fn default_callback_path() -> String {
    DEFAULT_CALLBACK_PATH.to_string()
}

fn default_callback_port() -> u16 {
    DEFAULT_CALLBACK_PORT
}

fn default_refresh_lead_s() -> i64 {
    DEFAULT_REFRESH_LEAD_SECS
}

fn default_http_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

impl AppConfig {
    /// Load from the explicit path, else `AUTHFETCH_CONFIG`, else `authfetch.toml`.
    pub fn load(path_override: Option<&Path>) -> AppResult<Self> {
        let path = match path_override {
            Some(p) => p.to_path_buf(),
            None => std::env::var(CONFIG_PATH_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE)),
        };
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            AppError::new(
                "CONFIG_INVALID",
                format!("cannot read config {}: {e}", path.display()),
            )
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| AppError::new("CONFIG_INVALID", format!("config parse failed: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AppResult<()> {
        if self.client_id.trim().is_empty() {
            return Err(AppError::new("CONFIG_INVALID", "client_id must not be empty"));
        }
        if self.scopes.iter().all(|s| s.trim().is_empty()) {
            return Err(AppError::new(
                "CONFIG_INVALID",
                "at least one non-empty scope is required",
            ));
        }
        if self.endpoints.is_empty() {
            return Err(AppError::new(
                "CONFIG_INVALID",
                "at least one endpoint is required",
            ));
        }
        for url in [&self.authorize_url, &self.token_url] {
            reqwest::Url::parse(url).map_err(|e| {
                AppError::new("CONFIG_INVALID", format!("invalid provider url {url}: {e}"))
            })?;
        }
        Ok(())
    }

    /// Redirect URI for the loopback listener actually bound on `port`.
    pub fn redirect_uri(&self, port: u16) -> String {
        format!("http://{}:{port}{}", self.redirect_host, self.callback_path)
    }
}
