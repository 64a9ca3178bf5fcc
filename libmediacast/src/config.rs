//! Configuration management for Mediacast

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::retry::RetryPolicy;
use crate::scheduler::{PollBackoff, PollPolicy};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub token: TokenConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub http: HttpConfig,
    pub meta: Option<MetaConfig>,
    pub youtube: Option<YouTubeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.local/share/mediacast/mediacast.db".to_string(),
        }
    }
}

/// Credential lifecycle thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Minimum remaining validity a handed-out token must have
    #[serde(with = "humantime_duration", default = "default_grace_window")]
    pub grace_window: Duration,
    /// Tokens older than this are introspected before a new job starts
    #[serde(with = "humantime_duration", default = "default_staleness")]
    pub staleness_threshold: Duration,
    /// In-flight polling re-validates the token once this much time has passed
    #[serde(with = "humantime_duration", default = "default_revalidate_after")]
    pub revalidate_after: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            grace_window: default_grace_window(),
            staleness_threshold: default_staleness(),
            revalidate_after: default_revalidate_after(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(with = "humantime_duration", default = "default_poll_interval")]
    pub interval: Duration,
    #[serde(default = "default_poll_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_kind")]
    pub backoff: BackoffKind,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(with = "humantime_duration", default = "default_max_poll_interval")]
    pub max_interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: default_poll_interval(),
            max_attempts: default_poll_attempts(),
            backoff: default_backoff_kind(),
            backoff_factor: default_backoff_factor(),
            max_interval: default_max_poll_interval(),
        }
    }
}

impl PollingConfig {
    pub fn policy(&self) -> PollPolicy {
        let backoff = match self.backoff {
            BackoffKind::Fixed => PollBackoff::Fixed,
            BackoffKind::Exponential => PollBackoff::Exponential {
                factor: self.backoff_factor,
                max_interval: self.max_interval,
            },
        };
        PollPolicy {
            interval: self.interval,
            max_attempts: self.max_attempts,
            backoff,
        }
    }
}

/// Retry of transient failures at create and finalize
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    #[serde(with = "humantime_duration", default = "default_base_delay")]
    pub base_delay: Duration,
    #[serde(with = "humantime_duration", default = "default_max_delay")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(with = "humantime_duration", default = "default_http_timeout")]
    pub timeout: Duration,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_http_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_graph_url")]
    pub graph_url: String,
    #[serde(default = "default_graph_version")]
    pub api_version: String,
    pub app_id: Option<String>,
    /// Environment variable holding the app secret
    #[serde(default = "default_meta_secret_env")]
    pub app_secret_env: String,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            graph_url: default_graph_url(),
            api_version: default_graph_version(),
            app_id: None,
            app_secret_env: default_meta_secret_env(),
        }
    }
}

impl MetaConfig {
    pub fn app_secret(&self) -> Option<SecretString> {
        read_secret_env(&self.app_secret_env)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YouTubeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_google_api_url")]
    pub api_url: String,
    #[serde(default = "default_google_api_url")]
    pub upload_url: String,
    #[serde(default = "default_google_oauth_url")]
    pub oauth_url: String,
    pub client_id: Option<String>,
    /// Environment variable holding the OAuth client secret
    #[serde(default = "default_youtube_secret_env")]
    pub client_secret_env: String,
}

impl Default for YouTubeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: default_google_api_url(),
            upload_url: default_google_api_url(),
            oauth_url: default_google_oauth_url(),
            client_id: None,
            client_secret_env: default_youtube_secret_env(),
        }
    }
}

impl YouTubeConfig {
    pub fn client_secret(&self) -> Option<SecretString> {
        read_secret_env(&self.client_secret_env)
    }
}

fn read_secret_env(var: &str) -> Option<SecretString> {
    std::env::var(var)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(SecretString::from)
}

fn default_grace_window() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_staleness() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_revalidate_after() -> Duration {
    Duration::from_secs(2 * 60)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_poll_attempts() -> u32 {
    30
}

fn default_backoff_kind() -> BackoffKind {
    BackoffKind::Fixed
}

fn default_backoff_factor() -> f64 {
    1.5
}

fn default_max_poll_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    format!("mediacast/{}", env!("CARGO_PKG_VERSION"))
}

fn default_true() -> bool {
    true
}

fn default_graph_url() -> String {
    "https://graph.facebook.com".to_string()
}

fn default_graph_version() -> String {
    "v21.0".to_string()
}

fn default_meta_secret_env() -> String {
    "MEDIACAST_META_APP_SECRET".to_string()
}

fn default_google_api_url() -> String {
    "https://www.googleapis.com".to_string()
}

fn default_google_oauth_url() -> String {
    "https://oauth2.googleapis.com".to_string()
}

fn default_youtube_secret_env() -> String {
    "MEDIACAST_YOUTUBE_CLIENT_SECRET".to_string()
}

/// Serde adapter for durations written as humantime strings ("10s", "5m")
mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

impl Config {
    /// Load configuration from the default location
    ///
    /// A missing file is not an error: every section has defaults.
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        if !config_path.exists() {
            tracing::debug!(
                "No config file at {}, using defaults",
                config_path.display()
            );
            return Ok(Self::default_config());
        }
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration with both adapters enabled
    pub fn default_config() -> Self {
        Self {
            meta: Some(MetaConfig::default()),
            youtube: Some(YouTubeConfig::default()),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.polling.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "polling.max_attempts".to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        if self.polling.interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "polling.interval".to_string(),
                reason: "must be greater than zero".to_string(),
            }
            .into());
        }
        if self.polling.backoff == BackoffKind::Exponential && self.polling.backoff_factor < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "polling.backoff_factor".to_string(),
                reason: "must be at least 1.0".to_string(),
            }
            .into());
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_attempts".to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Database path with `MEDIACAST_DB_PATH` taking precedence over the file
    pub fn database_path(&self) -> String {
        std::env::var("MEDIACAST_DB_PATH").unwrap_or_else(|_| self.database.path.clone())
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("MEDIACAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("mediacast").join("config.toml"))
}

/// Resolve the data directory path following XDG Base Directory spec
pub fn resolve_data_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| ConfigError::MissingField("data directory".to_string()))?;

    Ok(data_dir.join("mediacast"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default_config();
        assert_eq!(config.token.grace_window, Duration::from_secs(300));
        assert_eq!(config.polling.interval, Duration::from_secs(10));
        assert_eq!(config.polling.max_attempts, 30);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_secs(2));
        assert_eq!(config.retry.max_delay, Duration::from_secs(30));
        assert!(config.meta.is_some());
        assert!(config.youtube.is_some());
    }

    #[test]
    fn test_parse_humantime_durations() {
        let toml = r#"
            [database]
            path = "/tmp/mediacast.db"

            [polling]
            interval = "15s"
            max_attempts = 20
            backoff = "exponential"
            max_interval = "1m"

            [token]
            grace_window = "10m"

            [meta]
            app_id = "1234"
            api_version = "v20.0"
        "#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.polling.interval, Duration::from_secs(15));
        assert_eq!(config.polling.max_attempts, 20);
        assert_eq!(config.polling.backoff, BackoffKind::Exponential);
        assert_eq!(config.token.grace_window, Duration::from_secs(600));
        // Unset fields fall back to defaults
        assert_eq!(config.token.revalidate_after, Duration::from_secs(120));
        let meta = config.meta.unwrap();
        assert_eq!(meta.api_version, "v20.0");
        assert_eq!(meta.graph_url, "https://graph.facebook.com");
        assert!(config.youtube.is_none());
    }

    #[test]
    fn test_polling_policy_conversion() {
        let mut polling = PollingConfig::default();
        assert_eq!(polling.policy().backoff, PollBackoff::Fixed);

        polling.backoff = BackoffKind::Exponential;
        match polling.policy().backoff {
            PollBackoff::Exponential {
                factor,
                max_interval,
            } => {
                assert_eq!(factor, 1.5);
                assert_eq!(max_interval, Duration::from_secs(60));
            }
            other => panic!("unexpected backoff {:?}", other),
        }
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let toml = r#"
            [polling]
            interval = "soon"
        "#;
        assert!(toml::from_str::<Config>(toml).is_err());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[polling]\nmax_attempts = 0").unwrap();

        let result = Config::load_from_path(file.path());
        assert!(matches!(
            result,
            Err(crate::error::MediacastError::Config(
                ConfigError::InvalidValue { .. }
            ))
        ));
    }

    #[test]
    #[serial]
    fn test_config_path_from_env() {
        std::env::set_var("MEDIACAST_CONFIG", "/tmp/custom-mediacast.toml");
        let path = resolve_config_path().unwrap();
        std::env::remove_var("MEDIACAST_CONFIG");

        assert_eq!(path, PathBuf::from("/tmp/custom-mediacast.toml"));
    }

    #[test]
    #[serial]
    fn test_database_path_env_override() {
        let config = Config::default_config();
        std::env::set_var("MEDIACAST_DB_PATH", "/tmp/override.db");
        let path = config.database_path();
        std::env::remove_var("MEDIACAST_DB_PATH");

        assert_eq!(path, "/tmp/override.db");
    }
}
