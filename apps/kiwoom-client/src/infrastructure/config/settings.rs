//! Client Configuration Settings
//!
//! Configuration types for the Kiwoom client, loaded from environment
//! variables.

use std::path::Path;
use std::time::Duration;

/// REST base URL of the production host.
pub const REAL_REST_URL: &str = "https://api.kiwoom.com";

/// REST base URL of the mock-trading host.
pub const MOCK_REST_URL: &str = "https://mockapi.kiwoom.com";

/// Socket base URL of the production host.
pub const REAL_SOCKET_URL: &str = "wss://api.kiwoom.com:10000";

/// Socket base URL of the mock-trading host.
pub const MOCK_SOCKET_URL: &str = "wss://mockapi.kiwoom.com:10000";

/// Path of the real-time socket endpoint.
pub const SOCKET_ENDPOINT: &str = "/api/dostk/websocket";

/// Kiwoom API host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Host {
    /// Production trading.
    Real,
    /// Mock trading.
    Mock,
}

impl Host {
    /// Parse a host selector (`REAL` / `MOCK`, any case).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownHost`] for anything else.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_uppercase().as_str() {
            "REAL" => Ok(Self::Real),
            "MOCK" => Ok(Self::Mock),
            _ => Err(ConfigError::UnknownHost(s.to_string())),
        }
    }

    /// REST base URL.
    #[must_use]
    pub const fn rest_url(self) -> &'static str {
        match self {
            Self::Real => REAL_REST_URL,
            Self::Mock => MOCK_REST_URL,
        }
    }

    /// Full real-time socket URL.
    #[must_use]
    pub fn socket_url(self) -> String {
        let base = match self {
            Self::Real => REAL_SOCKET_URL,
            Self::Mock => MOCK_SOCKET_URL,
        };
        format!("{base}{SOCKET_ENDPOINT}")
    }

    /// Host name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Real => "REAL",
            Self::Mock => "MOCK",
        }
    }
}

/// Kiwoom app key and secret key.
#[derive(Clone)]
pub struct Credentials {
    appkey: String,
    secretkey: String,
}

impl Credentials {
    /// Create credentials from raw values.
    #[must_use]
    pub const fn new(appkey: String, secretkey: String) -> Self {
        Self { appkey, secretkey }
    }

    /// Resolve credentials given either raw values or paths to files
    /// holding them.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be read or a value is empty.
    pub fn resolve(appkey: &str, secretkey: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(
            resolve_secret("appkey", appkey)?,
            resolve_secret("secretkey", secretkey)?,
        ))
    }

    /// Get the app key.
    #[must_use]
    pub fn appkey(&self) -> &str {
        &self.appkey
    }

    /// Get the secret key.
    #[must_use]
    pub fn secretkey(&self) -> &str {
        &self.secretkey
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("appkey", &"[REDACTED]")
            .field("secretkey", &"[REDACTED]")
            .finish()
    }
}

fn resolve_secret(name: &str, value: &str) -> Result<String, ConfigError> {
    let value = value.trim();
    let path = Path::new(value);
    let resolved = if !value.is_empty() && path.is_file() {
        std::fs::read_to_string(path)
            .map_err(|e| ConfigError::CredentialFile {
                path: value.to_string(),
                reason: e.to_string(),
            })?
            .trim()
            .to_string()
    } else {
        value.to_string()
    };

    if resolved.is_empty() {
        return Err(ConfigError::EmptyValue(name.to_string()));
    }
    Ok(resolved)
}

/// WebSocket connection settings.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Protocol ping interval.
    pub heartbeat_interval: Duration,
    /// Maximum callback bodies executing at once.
    pub max_concurrency: usize,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            max_concurrency: 1000,
        }
    }
}

/// REST client settings.
#[derive(Debug, Clone)]
pub struct RestSettings {
    /// Minimum spacing between requests (5 per second).
    pub request_interval: Duration,
    /// Total request timeout.
    pub total_timeout: Duration,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Log every request and response body.
    pub debug: bool,
}

impl Default for RestSettings {
    fn default() -> Self {
        Self {
            request_interval: Duration::from_millis(205),
            total_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(3),
            debug: false,
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API host.
    pub host: Host,
    /// API credentials.
    pub credentials: Credentials,
    /// WebSocket settings.
    pub websocket: WebSocketSettings,
    /// REST settings.
    pub rest: RestSettings,
}

impl ClientConfig {
    /// Create a configuration with default settings.
    #[must_use]
    pub fn new(host: Host, credentials: Credentials) -> Self {
        Self {
            host,
            credentials,
            websocket: WebSocketSettings::default(),
            rest: RestSettings::default(),
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        };

        let host = Host::parse(&required("KIWOOM_HOST")?)?;
        let credentials =
            Credentials::resolve(&required("KIWOOM_APPKEY")?, &required("KIWOOM_SECRETKEY")?)?;

        let websocket = WebSocketSettings {
            heartbeat_interval: parse_duration_secs(
                lookup("KIWOOM_WS_HEARTBEAT_SECS"),
                WebSocketSettings::default().heartbeat_interval,
            ),
            max_concurrency: parse_or(
                lookup("KIWOOM_WS_MAX_CONCURRENCY"),
                WebSocketSettings::default().max_concurrency,
            )
            .max(1),
        };

        let rest = RestSettings {
            request_interval: parse_duration_millis(
                lookup("KIWOOM_REST_INTERVAL_MS"),
                RestSettings::default().request_interval,
            ),
            debug: lookup("KIWOOM_DEBUG").is_some_and(|v| parse_bool(&v)),
            ..RestSettings::default()
        };

        Ok(Self {
            host,
            credentials,
            websocket,
            rest,
        })
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Value is empty.
    #[error("{0} cannot be empty")]
    EmptyValue(String),
    /// Host selector is neither `REAL` nor `MOCK`.
    #[error("invalid host: {0}")]
    UnknownHost(String),
    /// Credential file could not be read.
    #[error("failed to read credential file {path}: {reason}")]
    CredentialFile {
        /// File path.
        path: String,
        /// I/O failure.
        reason: String,
    },
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn parse_duration_secs(value: Option<String>, default: Duration) -> Duration {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis(value: Option<String>, default: Duration) -> Duration {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
