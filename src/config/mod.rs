use serde::Deserialize;

use crate::error::{Result, SourceError};
use crate::oauth::provider::{GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL, GOOGLE_USERINFO_URL};
use crate::oauth::ProviderEndpoints;

/// Complete service configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct GeoSourceConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub oauth: OAuthSettings,
    #[serde(default)]
    pub providers: ProviderConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    /// Master encryption key. Only ever read from `GEOSOURCE_ENCRYPTION_KEY`.
    #[serde(skip)]
    pub encryption_key: Option<String>,
}

/// HTTP server and database
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_port() -> u16 {
    3000
}

fn default_database_path() -> String {
    "geosource.db".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            database_path: default_database_path(),
        }
    }
}

/// OAuth client registration and flow settings
#[derive(Clone, Deserialize)]
pub struct OAuthSettings {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    /// Where the callback sends the browser after a successful connection
    #[serde(default = "default_continuation_url")]
    pub continuation_url: String,
    #[serde(default = "default_state_ttl_minutes")]
    pub state_ttl_minutes: i64,
    #[serde(default = "default_state_cleanup_interval")]
    pub state_cleanup_interval_seconds: u64,
}

fn default_continuation_url() -> String {
    "/admin/setup".to_string()
}

fn default_state_ttl_minutes() -> i64 {
    15
}

fn default_state_cleanup_interval() -> u64 {
    300
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            redirect_uri: None,
            continuation_url: default_continuation_url(),
            state_ttl_minutes: default_state_ttl_minutes(),
            state_cleanup_interval_seconds: default_state_cleanup_interval(),
        }
    }
}

impl std::fmt::Debug for OAuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("redirect_uri", &self.redirect_uri)
            .field("continuation_url", &self.continuation_url)
            .field("state_ttl_minutes", &self.state_ttl_minutes)
            .finish()
    }
}

/// OAuth client values that must all be present before a flow can start.
#[derive(Clone)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl OAuthSettings {
    /// Returns the client registration, or `ConfigurationError` naming the
    /// first missing variable.
    pub fn require(&self) -> Result<OAuthClient> {
        fn present(value: &Option<String>, var: &str) -> Result<String> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| SourceError::Configuration(format!("{} is not set", var)))
        }

        Ok(OAuthClient {
            client_id: present(&self.client_id, "GEOSOURCE_OAUTH_CLIENT_ID")?,
            client_secret: present(&self.client_secret, "GEOSOURCE_OAUTH_CLIENT_SECRET")?,
            redirect_uri: present(&self.redirect_uri, "GEOSOURCE_OAUTH_REDIRECT_URI")?,
        })
    }
}

/// Upstream service URLs and HTTP timeouts
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_userinfo_url")]
    pub userinfo_url: String,
    #[serde(default = "default_sheets_base_url")]
    pub sheets_base_url: String,
    #[serde(default = "default_drive_base_url")]
    pub drive_base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

fn default_auth_url() -> String {
    GOOGLE_AUTH_URL.to_string()
}

fn default_token_url() -> String {
    GOOGLE_TOKEN_URL.to_string()
}

fn default_userinfo_url() -> String {
    GOOGLE_USERINFO_URL.to_string()
}

fn default_sheets_base_url() -> String {
    "https://sheets.googleapis.com".to_string()
}

fn default_drive_base_url() -> String {
    "https://www.googleapis.com".to_string()
}

fn default_request_timeout() -> u64 {
    15
}

fn default_connect_timeout() -> u64 {
    5
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            userinfo_url: default_userinfo_url(),
            sheets_base_url: default_sheets_base_url(),
            drive_base_url: default_drive_base_url(),
            request_timeout_seconds: default_request_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

impl ProviderConfig {
    pub fn endpoints(&self) -> ProviderEndpoints {
        ProviderEndpoints {
            auth_url: self.auth_url.clone(),
            token_url: self.token_url.clone(),
            userinfo_url: self.userinfo_url.clone(),
        }
    }

    /// HTTP client shared by every provider call. All requests are bounded
    /// by the configured timeouts.
    pub fn http_client(&self) -> anyhow::Result<reqwest::Client> {
        use anyhow::Context;

        reqwest::Client::builder()
            .user_agent("geosource/0.1")
            .connect_timeout(std::time::Duration::from_secs(self.connect_timeout_seconds))
            .timeout(std::time::Duration::from_secs(self.request_timeout_seconds))
            .build()
            .context("Failed to build HTTP client")
    }
}

/// Spreadsheet adapter cache and provider rate limit
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_record_ttl")]
    pub record_ttl_seconds: u64,
    #[serde(default = "default_rate_limit_requests")]
    pub rate_limit_requests: u64,
    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_seconds: u64,
}

fn default_record_ttl() -> u64 {
    30
}

fn default_rate_limit_requests() -> u64 {
    100
}

fn default_rate_limit_window() -> u64 {
    100
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            record_ttl_seconds: default_record_ttl(),
            rate_limit_requests: default_rate_limit_requests(),
            rate_limit_window_seconds: default_rate_limit_window(),
        }
    }
}

impl GeoSourceConfig {
    /// Parse a TOML document. Missing sections use defaults.
    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Load from `GEOSOURCE_CONFIG` (if set) and apply environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        use anyhow::Context;

        let mut config = match std::env::var("GEOSOURCE_CONFIG") {
            Ok(path) => {
                let contents = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file {}", path))?;
                Self::from_toml(&contents)
                    .with_context(|| format!("Failed to parse config file {}", path))?
            }
            Err(_) => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("GEOSOURCE_OAUTH_CLIENT_ID") {
            self.oauth.client_id = Some(v);
        }
        if let Some(v) = lookup("GEOSOURCE_OAUTH_CLIENT_SECRET") {
            self.oauth.client_secret = Some(v);
        }
        if let Some(v) = lookup("GEOSOURCE_OAUTH_REDIRECT_URI") {
            self.oauth.redirect_uri = Some(v);
        }
        if let Some(v) = lookup("GEOSOURCE_CONTINUATION_URL") {
            self.oauth.continuation_url = v;
        }
        if let Some(v) = lookup("GEOSOURCE_DB") {
            self.server.database_path = v;
        }
        if let Some(v) = lookup("GEOSOURCE_PORT") {
            match v.parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!(value = %v, "Ignoring invalid GEOSOURCE_PORT"),
            }
        }
        self.encryption_key = lookup("GEOSOURCE_ENCRYPTION_KEY").filter(|k| !k.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = GeoSourceConfig::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.oauth.state_ttl_minutes, 15);
        assert_eq!(config.cache.record_ttl_seconds, 30);
        assert_eq!(config.cache.rate_limit_requests, 100);
        assert_eq!(config.cache.rate_limit_window_seconds, 100);
        assert_eq!(config.providers.request_timeout_seconds, 15);
        assert!(config.encryption_key.is_none());
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [server]
            port = 8080
            database_path = "/var/lib/geosource.db"

            [oauth]
            client_id = "client.apps.googleusercontent.com"
            redirect_uri = "https://gis.example.com/api/oauth/callback"
            continuation_url = "https://gis.example.com/admin/sources"

            [providers]
            sheets_base_url = "http://localhost:9000"

            [cache]
            record_ttl_seconds = 10
        "#;

        let config = GeoSourceConfig::from_toml(toml).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.oauth.client_id.as_deref(), Some("client.apps.googleusercontent.com"));
        assert!(config.oauth.client_secret.is_none());
        assert_eq!(config.providers.sheets_base_url, "http://localhost:9000");
        assert_eq!(config.providers.token_url, GOOGLE_TOKEN_URL);
        assert_eq!(config.cache.record_ttl_seconds, 10);
        assert_eq!(config.cache.rate_limit_requests, 100); // Default
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("GEOSOURCE_OAUTH_CLIENT_ID", "env-client"),
            ("GEOSOURCE_OAUTH_CLIENT_SECRET", "env-secret"),
            ("GEOSOURCE_OAUTH_REDIRECT_URI", "https://env/cb"),
            ("GEOSOURCE_ENCRYPTION_KEY", "master"),
            ("GEOSOURCE_PORT", "not-a-port"),
        ]
        .into_iter()
        .collect();

        let mut config = GeoSourceConfig::default();
        config.apply_env(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.oauth.client_id.as_deref(), Some("env-client"));
        assert_eq!(config.encryption_key.as_deref(), Some("master"));
        assert_eq!(config.server.port, 3000);

        let client = config.oauth.require().unwrap();
        assert_eq!(client.redirect_uri, "https://env/cb");
    }

    #[test]
    fn test_require_reports_missing_variable() {
        let settings = OAuthSettings {
            client_id: Some("id".to_string()),
            client_secret: Some("  ".to_string()),
            ..Default::default()
        };

        match settings.require() {
            Err(SourceError::Configuration(msg)) => {
                assert!(msg.contains("GEOSOURCE_OAUTH_CLIENT_SECRET"))
            }
            _ => panic!("expected configuration error"),
        }
    }

    #[test]
    fn test_debug_redacts_secret() {
        let settings = OAuthSettings {
            client_secret: Some("shh-secret".to_string()),
            ..Default::default()
        };
        assert!(!format!("{:?}", settings).contains("shh-secret"));
    }
}
