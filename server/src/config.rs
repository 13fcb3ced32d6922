//! Server configuration module.
//!
//! Parses configuration from environment variables for the Chorus server.
//! The configuration is built once at startup and shared read-only afterwards.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `CHORUS_SECRET_KEY` | Yes | - | HS256 secret used to sign and verify access tokens |
//! | `PORT` | No | 8080 | HTTP server port |
//! | `CHORUS_ALLOWED_ORIGINS` | No | (empty) | Format: `https://a.example,https://b.example` or `*` |
//! | `CHORUS_CLIENT_QUEUE_CAPACITY` | No | 64 | Outbound queue size per connected client |
//! | `CHORUS_MAX_FRAME_BYTES` | No | 65536 | Largest inbound WebSocket message accepted |

use std::env;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::warn;

/// Default HTTP server port.
const DEFAULT_PORT: u16 = 8080;

/// Default number of frames buffered per client before it is evicted.
pub const DEFAULT_CLIENT_QUEUE_CAPACITY: usize = 64;

/// Default inbound message size limit (64 KiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// Errors that can occur when parsing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has invalid format.
    #[error("invalid format for {var}: {message}")]
    InvalidFormat { var: String, message: String },

    /// Port number is invalid.
    #[error("invalid port number: {0}")]
    InvalidPort(#[from] std::num::ParseIntError),

    /// Configuration validation failed.
    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

/// Origins permitted to open WebSocket connections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OriginPolicy {
    allow_any: bool,
    origins: Vec<String>,
}

impl OriginPolicy {
    /// Policy that admits every origin.
    #[must_use]
    pub fn any() -> Self {
        Self {
            allow_any: true,
            origins: Vec::new(),
        }
    }

    /// Policy that admits exactly the listed origins.
    #[must_use]
    pub fn allow_list<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allow_any: false,
            origins: origins
                .into_iter()
                .map(|o| normalize_origin(&o.into()))
                .collect(),
        }
    }

    /// Returns `true` if `origin` may connect.
    ///
    /// Comparison ignores ASCII case and a trailing slash.
    pub fn is_allowed(&self, origin: &str) -> bool {
        if self.allow_any {
            return true;
        }
        let origin = normalize_origin(origin);
        self.origins.iter().any(|allowed| *allowed == origin)
    }

    /// Returns `true` if every origin is admitted.
    pub fn allows_any(&self) -> bool {
        self.allow_any
    }

    /// The explicit allow-list entries.
    pub fn origins(&self) -> &[String] {
        &self.origins
    }
}

fn normalize_origin(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}

/// Server configuration parsed from environment variables.
#[derive(Clone)]
pub struct Config {
    /// HS256 signing secret for access tokens.
    pub secret_key: String,

    /// HTTP server port.
    pub port: u16,

    /// Origins allowed to upgrade to a WebSocket.
    pub allowed_origins: OriginPolicy,

    /// Bounded outbound queue capacity per client.
    pub client_queue_capacity: usize,

    /// Maximum inbound WebSocket message size in bytes.
    pub max_frame_bytes: usize,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("secret_key", &"<redacted>")
            .field("port", &self.port)
            .field("allowed_origins", &self.allowed_origins)
            .field("client_queue_capacity", &self.client_queue_capacity)
            .field("max_frame_bytes", &self.max_frame_bytes)
            .finish()
    }
}

impl Config {
    /// Creates a configuration with default settings and the given secret.
    ///
    /// Used by tests and embedders that do not read the environment.
    #[must_use]
    pub fn with_secret(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            port: DEFAULT_PORT,
            allowed_origins: OriginPolicy::default(),
            client_queue_capacity: DEFAULT_CLIENT_QUEUE_CAPACITY,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `CHORUS_SECRET_KEY` is missing or empty
    /// - Environment variables have invalid format
    /// - Port number is not a valid u16
    ///
    /// # Example
    ///
    /// ```no_run
    /// use chorus_server::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Server will listen on port {}", config.port);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let secret_key = match env::var("CHORUS_SECRET_KEY") {
            Ok(s) if !s.is_empty() => s,
            _ => return Err(ConfigError::MissingEnvVar("CHORUS_SECRET_KEY".to_string())),
        };
        let port = parse_port()?;
        let allowed_origins = parse_allowed_origins();
        let client_queue_capacity =
            parse_usize_env("CHORUS_CLIENT_QUEUE_CAPACITY", DEFAULT_CLIENT_QUEUE_CAPACITY)?;
        let max_frame_bytes = parse_usize_env("CHORUS_MAX_FRAME_BYTES", DEFAULT_MAX_FRAME_BYTES)?;

        let config = Self {
            secret_key,
            port,
            allowed_origins,
            client_queue_capacity,
            max_frame_bytes,
        };

        config.validate()?;

        if config.allowed_origins.allows_any() {
            warn!("CHORUS_ALLOWED_ORIGINS admits any origin. Do not use in production!");
        }

        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.client_queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "CHORUS_CLIENT_QUEUE_CAPACITY must be at least 1".to_string(),
            ));
        }

        if self.max_frame_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "CHORUS_MAX_FRAME_BYTES must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Parse the PORT environment variable.
///
/// Returns the default port if not set.
fn parse_port() -> Result<u16, ConfigError> {
    match env::var("PORT") {
        Ok(port_str) => Ok(port_str.parse()?),
        Err(env::VarError::NotPresent) => Ok(DEFAULT_PORT),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidFormat {
            var: "PORT".to_string(),
            message: "contains invalid unicode".to_string(),
        }),
    }
}

/// Parse an optional numeric environment variable.
fn parse_usize_env(name: &str, default: usize) -> Result<usize, ConfigError> {
    match env::var(name) {
        Ok(value) => usize::from_str(value.trim()).map_err(|err| ConfigError::InvalidFormat {
            var: name.to_string(),
            message: err.to_string(),
        }),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidFormat {
            var: name.to_string(),
            message: "contains invalid unicode".to_string(),
        }),
    }
}

/// Parse the CHORUS_ALLOWED_ORIGINS environment variable.
///
/// Expected format: `origin1,origin2`. A `*` entry admits any origin.
fn parse_allowed_origins() -> OriginPolicy {
    let origins_str = match env::var("CHORUS_ALLOWED_ORIGINS") {
        Ok(s) if !s.trim().is_empty() => s,
        _ => return OriginPolicy::default(),
    };

    let entries: Vec<&str> = origins_str
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .collect();

    if entries.contains(&"*") {
        return OriginPolicy::any();
    }

    OriginPolicy::allow_list(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    /// Helper to temporarily set environment variables for testing.
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old_value = env::var(key).ok();
            self.vars.push((key.to_string(), old_value));
            env::set_var(key, value);
        }

        fn remove(&mut self, key: &str) {
            let old_value = env::var(key).ok();
            self.vars.push((key.to_string(), old_value));
            env::remove_var(key);
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.iter().rev() {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    fn clear_optional(guard: &mut EnvGuard) {
        guard.remove("PORT");
        guard.remove("CHORUS_ALLOWED_ORIGINS");
        guard.remove("CHORUS_CLIENT_QUEUE_CAPACITY");
        guard.remove("CHORUS_MAX_FRAME_BYTES");
    }

    #[test]
    #[serial]
    fn test_config_defaults() {
        let mut guard = EnvGuard::new();
        guard.set("CHORUS_SECRET_KEY", "s3cret");
        clear_optional(&mut guard);

        let config = Config::from_env().expect("should parse config");
        assert_eq!(config.secret_key, "s3cret");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.client_queue_capacity, DEFAULT_CLIENT_QUEUE_CAPACITY);
        assert_eq!(config.max_frame_bytes, DEFAULT_MAX_FRAME_BYTES);
        assert!(!config.allowed_origins.allows_any());
        assert!(config.allowed_origins.origins().is_empty());
    }

    #[test]
    #[serial]
    fn test_config_with_all_values() {
        let mut guard = EnvGuard::new();
        guard.set("CHORUS_SECRET_KEY", "s3cret");
        guard.set("PORT", "9090");
        guard.set(
            "CHORUS_ALLOWED_ORIGINS",
            "https://chat.example.com, http://localhost:3000",
        );
        guard.set("CHORUS_CLIENT_QUEUE_CAPACITY", "8");
        guard.set("CHORUS_MAX_FRAME_BYTES", "1024");

        let config = Config::from_env().expect("should parse config");
        assert_eq!(config.port, 9090);
        assert_eq!(config.client_queue_capacity, 8);
        assert_eq!(config.max_frame_bytes, 1024);
        assert_eq!(config.allowed_origins.origins().len(), 2);
        assert!(config.allowed_origins.is_allowed("https://chat.example.com"));
        assert!(config.allowed_origins.is_allowed("http://localhost:3000"));
        assert!(!config.allowed_origins.is_allowed("https://evil.example.com"));
    }

    #[test]
    #[serial]
    fn test_config_missing_secret() {
        let mut guard = EnvGuard::new();
        guard.remove("CHORUS_SECRET_KEY");
        clear_optional(&mut guard);

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref v) if v == "CHORUS_SECRET_KEY"));
    }

    #[test]
    #[serial]
    fn test_config_empty_secret_is_missing() {
        let mut guard = EnvGuard::new();
        guard.set("CHORUS_SECRET_KEY", "");
        clear_optional(&mut guard);

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(_)));
    }

    #[test]
    #[serial]
    fn test_config_rejects_zero_queue_capacity() {
        let mut guard = EnvGuard::new();
        guard.set("CHORUS_SECRET_KEY", "s3cret");
        clear_optional(&mut guard);
        guard.set("CHORUS_CLIENT_QUEUE_CAPACITY", "0");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    #[serial]
    fn test_config_rejects_non_numeric_frame_limit() {
        let mut guard = EnvGuard::new();
        guard.set("CHORUS_SECRET_KEY", "s3cret");
        clear_optional(&mut guard);
        guard.set("CHORUS_MAX_FRAME_BYTES", "lots");

        let err = Config::from_env().unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidFormat { ref var, .. } if var == "CHORUS_MAX_FRAME_BYTES")
        );
    }

    #[test]
    #[serial]
    fn test_parse_allowed_origins_wildcard() {
        let mut guard = EnvGuard::new();
        guard.set("CHORUS_ALLOWED_ORIGINS", "https://a.example, *");

        let policy = parse_allowed_origins();
        assert!(policy.allows_any());
        assert!(policy.is_allowed("https://anything.example"));
    }

    #[test]
    #[serial]
    fn test_parse_allowed_origins_skips_empty_entries() {
        let mut guard = EnvGuard::new();
        guard.set("CHORUS_ALLOWED_ORIGINS", ",https://a.example,, ");

        let policy = parse_allowed_origins();
        assert_eq!(policy.origins(), &["https://a.example".to_string()]);
    }

    #[test]
    #[serial]
    fn test_parse_port_default() {
        let mut guard = EnvGuard::new();
        guard.remove("PORT");

        let port = parse_port().expect("should parse port");
        assert_eq!(port, DEFAULT_PORT);
    }

    #[test]
    #[serial]
    fn test_parse_port_invalid() {
        let mut guard = EnvGuard::new();
        guard.set("PORT", "not-a-number");

        let result = parse_port();
        assert!(matches!(result.unwrap_err(), ConfigError::InvalidPort(_)));
    }

    #[test]
    #[serial]
    fn test_parse_port_out_of_range() {
        let mut guard = EnvGuard::new();
        guard.set("PORT", "99999");

        assert!(parse_port().is_err());
    }

    #[test]
    fn origin_policy_ignores_case_and_trailing_slash() {
        let policy = OriginPolicy::allow_list(["https://Chat.Example.com/"]);
        assert!(policy.is_allowed("https://chat.example.com"));
        assert!(policy.is_allowed("HTTPS://CHAT.EXAMPLE.COM/"));
        assert!(!policy.is_allowed("https://chat.example.com.evil"));
    }

    #[test]
    fn default_origin_policy_admits_nothing() {
        let policy = OriginPolicy::default();
        assert!(!policy.is_allowed("http://localhost:3000"));
    }

    #[test]
    fn debug_output_redacts_secret() {
        let config = Config::with_secret("very-secret-value");
        let debug_str = format!("{config:?}");
        assert!(!debug_str.contains("very-secret-value"));
        assert!(debug_str.contains("<redacted>"));
    }
}
