//! Session configuration.
//!
//! Supports configuration from:
//! - builder-style setters on [`SessionConfig`]
//! - TOML file via [`SessionConfig::load`]
//! - Environment variables with `MQLITE_SESSION__` prefix (double underscore
//!   for nesting), e.g. `MQLITE_SESSION__HOST=app.example.com`

use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use serde::Deserialize;
use url::Url;

use crate::error::{Result, SessionError};
use crate::transport::endpoint_url;

pub const DEFAULT_PATH: &str = "/api/wss/mqtt";
pub const DEFAULT_USERNAME: &str = "blank";
pub const DEFAULT_KEEP_ALIVE: u16 = 60;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_FIRST_PING_DELAY_MS: u64 = 10_000;
pub const DEFAULT_PING_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 5_000;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 40_000;

/// Session configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Scheme of the hosting page ("http" or "https"); mirrored as ws/wss.
    pub page_scheme: String,
    /// Host (and optional port) serving the WebSocket endpoint.
    pub host: String,
    /// Endpoint path.
    pub path: String,
    /// Fixed client identifier. Generated as `WEB-<uuid>` when unset.
    pub client_id: Option<String>,
    /// Username sent in CONNECT; the credential travels as the password.
    pub username: String,
    /// Keep-alive advertised in CONNECT, in seconds.
    pub keep_alive_secs: u16,
    /// Watchdog while waiting for CONNACK.
    pub connect_timeout_ms: u64,
    /// Watchdog once connected, pushed back by every inbound packet.
    pub idle_timeout_ms: u64,
    /// Delay between CONNACK and the first PINGREQ.
    pub first_ping_delay_ms: u64,
    /// Delay between a PINGRESP and the next PINGREQ.
    pub ping_interval_ms: u64,
    /// Delay before asking the login provider again after a drop.
    pub retry_delay_ms: u64,
    /// Cap for the login retry backoff.
    pub retry_max_delay_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            page_scheme: "https".to_string(),
            host: "localhost".to_string(),
            path: DEFAULT_PATH.to_string(),
            client_id: None,
            username: DEFAULT_USERNAME.to_string(),
            keep_alive_secs: DEFAULT_KEEP_ALIVE,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            first_ping_delay_ms: DEFAULT_FIRST_PING_DELAY_MS,
            ping_interval_ms: DEFAULT_PING_INTERVAL_MS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
        }
    }
}

impl SessionConfig {
    /// Create a config for the given host.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// Set the page scheme the WebSocket scheme is derived from.
    pub fn page_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.page_scheme = scheme.into();
        self
    }

    /// Set the endpoint path.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set a fixed client ID.
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Set the CONNECT username.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Set the CONNACK watchdog.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = millis(timeout);
        self
    }

    /// Set the idle watchdog.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_ms = millis(timeout);
        self
    }

    /// Set the first ping delay and the interval between pings.
    pub fn with_ping(mut self, first: Duration, interval: Duration) -> Self {
        self.first_ping_delay_ms = millis(first);
        self.ping_interval_ms = millis(interval);
        self
    }

    /// Set the login retry delay and its cap.
    pub fn with_retry(mut self, delay: Duration, max: Duration) -> Self {
        self.retry_delay_ms = millis(delay);
        self.retry_max_delay_ms = millis(max);
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn first_ping_delay(&self) -> Duration {
        Duration::from_millis(self.first_ping_delay_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    /// WebSocket endpoint derived from scheme, host and path.
    pub fn endpoint(&self) -> Result<Url> {
        endpoint_url(&self.page_scheme, &self.host, &self.path)
    }

    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let defaults = SessionConfig::default();
        let mut builder = config::Config::builder()
            .set_default("page_scheme", defaults.page_scheme)?
            .set_default("host", defaults.host)?
            .set_default("path", defaults.path)?
            .set_default("username", defaults.username)?
            .set_default("keep_alive_secs", DEFAULT_KEEP_ALIVE as i64)?
            .set_default("connect_timeout_ms", DEFAULT_CONNECT_TIMEOUT_MS as i64)?
            .set_default("idle_timeout_ms", DEFAULT_IDLE_TIMEOUT_MS as i64)?
            .set_default("first_ping_delay_ms", DEFAULT_FIRST_PING_DELAY_MS as i64)?
            .set_default("ping_interval_ms", DEFAULT_PING_INTERVAL_MS as i64)?
            .set_default("retry_delay_ms", DEFAULT_RETRY_DELAY_MS as i64)?
            .set_default("retry_max_delay_ms", DEFAULT_RETRY_MAX_DELAY_MS as i64)?;

        let path = path.as_ref();
        if path.is_file() {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }

        // Override with environment variables (MQLITE_SESSION__HOST, etc.)
        let cfg = builder
            .add_source(
                Environment::with_prefix("MQLITE_SESSION")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: SessionConfig = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: SessionConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(SessionError::Validation("host must not be empty".to_string()));
        }
        if !self.path.starts_with('/') {
            return Err(SessionError::Validation(format!(
                "path must start with '/': {}",
                self.path
            )));
        }
        let timers = [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("idle_timeout_ms", self.idle_timeout_ms),
            ("first_ping_delay_ms", self.first_ping_delay_ms),
            ("ping_interval_ms", self.ping_interval_ms),
            ("retry_delay_ms", self.retry_delay_ms),
            ("retry_max_delay_ms", self.retry_max_delay_ms),
        ];
        if let Some((name, _)) = timers.iter().find(|(_, value)| *value == 0) {
            return Err(SessionError::Validation(format!("{} must be non-zero", name)));
        }
        if self.retry_max_delay_ms < self.retry_delay_ms {
            return Err(SessionError::Validation(
                "retry_max_delay_ms must be >= retry_delay_ms".to_string(),
            ));
        }
        self.endpoint()?;
        Ok(())
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.idle_timeout(), Duration::from_secs(60));
        assert_eq!(config.ping_interval(), Duration::from_secs(30));
        assert_eq!(
            config.endpoint().unwrap().as_str(),
            "wss://localhost/api/wss/mqtt"
        );
    }

    #[test]
    fn test_builder() {
        let config = SessionConfig::new("app.example.com:8443")
            .page_scheme("http")
            .client_id("WEB-fixed")
            .with_connect_timeout(Duration::from_secs(2))
            .with_ping(Duration::from_secs(1), Duration::from_secs(3));

        assert_eq!(config.client_id.as_deref(), Some("WEB-fixed"));
        assert_eq!(config.connect_timeout_ms, 2_000);
        assert_eq!(config.first_ping_delay(), Duration::from_secs(1));
        assert_eq!(
            config.endpoint().unwrap().as_str(),
            "ws://app.example.com:8443/api/wss/mqtt"
        );
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            host = "broker.internal"
            path = "/mqtt"
            idle_timeout_ms = 90000
        "#;
        let config = SessionConfig::parse(toml).unwrap();
        assert_eq!(config.host, "broker.internal");
        assert_eq!(config.path, "/mqtt");
        assert_eq!(config.idle_timeout(), Duration::from_secs(90));
        assert_eq!(config.connect_timeout_ms, DEFAULT_CONNECT_TIMEOUT_MS);
        assert_eq!(config.username, DEFAULT_USERNAME);
    }

    #[test]
    fn test_validation_errors() {
        assert!(matches!(
            SessionConfig::parse("path = \"mqtt\""),
            Err(SessionError::Validation(_))
        ));
        assert!(matches!(
            SessionConfig::parse("ping_interval_ms = 0"),
            Err(SessionError::Validation(_))
        ));
        assert!(matches!(
            SessionConfig::parse("page_scheme = \"gopher\""),
            Err(SessionError::Validation(_))
        ));
        assert!(matches!(
            SessionConfig::parse("retry_delay_ms = 50000"),
            Err(SessionError::Validation(_))
        ));
        assert!(matches!(
            SessionConfig::parse("host = 5"),
            Err(SessionError::Toml(_))
        ));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = SessionConfig::load("/nonexistent/mqlite-session.toml").unwrap();
        assert_eq!(config.path, DEFAULT_PATH);
        assert_eq!(config.keep_alive_secs, DEFAULT_KEEP_ALIVE);
    }
}
