//! Bot configuration.
//!
//! Configuration is loaded from environment variables. The access token is
//! redacted in Debug output.

use common::config::ObservabilityConfig;
use common::secret::SecretString;
use common::types::UserId;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default data directory holding the cursor file.
pub const DEFAULT_DATA_DIR: &str = "./data";

/// Default command prefix.
pub const DEFAULT_COMMAND_PREFIX: &str = "!";

/// Default server-side long-poll wait in milliseconds.
pub const DEFAULT_SYNC_TIMEOUT_MS: u64 = 30_000;

/// Upper bound for the long-poll wait (5 minutes).
pub const MAX_SYNC_TIMEOUT_MS: u64 = 300_000;

/// Default per-request timeout for non-sync requests in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

/// Default number of consecutive transient sync failures tolerated.
pub const DEFAULT_SYNC_MAX_FAILURES: u32 = 5;

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "bot_service=debug,call_bot=debug,common=info";

/// Bot configuration.
#[derive(Clone)]
pub struct Config {
    /// Host used for client discovery.
    pub homeserver_host: String,

    /// Long-lived access token.
    pub access_token: SecretString,

    /// Directory holding the `.next_batch` cursor file.
    pub data_dir: PathBuf,

    /// Directory `play` paths are resolved in (default: `{data_dir}/media`).
    pub media_dir: PathBuf,

    /// Prefix that marks a message as a command (default: "!").
    pub command_prefix: String,

    /// Server-side long-poll wait (default: 30000 ms).
    pub sync_timeout_ms: u64,

    /// Timeout for non-sync requests (default: 10 s).
    pub http_timeout: Duration,

    /// Consecutive transient sync failures tolerated before the loop stops.
    /// Zero stops on the first failure.
    pub sync_max_failures: u32,

    /// Clear this bot's call memberships in every joined room at startup.
    pub disconnect_on_startup: bool,

    /// When set, only these senders may use call-control commands.
    pub allowed_senders: Option<Vec<UserId>>,

    /// Logging and metrics export.
    pub observability: ObservabilityConfig,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("homeserver_host", &self.homeserver_host)
            .field("access_token", &"[REDACTED]")
            .field("data_dir", &self.data_dir)
            .field("media_dir", &self.media_dir)
            .field("command_prefix", &self.command_prefix)
            .field("sync_timeout_ms", &self.sync_timeout_ms)
            .field("http_timeout", &self.http_timeout)
            .field("sync_max_failures", &self.sync_max_failures)
            .field("disconnect_on_startup", &self.disconnect_on_startup)
            .field("allowed_senders", &self.allowed_senders)
            .field("observability", &self.observability)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid command prefix: {0}")]
    InvalidCommandPrefix(String),

    #[error("Invalid sync timeout configuration: {0}")]
    InvalidSyncTimeout(String),

    #[error("Invalid HTTP timeout configuration: {0}")]
    InvalidHttpTimeout(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

impl Config {
    /// Path of the persisted cursor file.
    #[must_use]
    pub fn cursor_path(&self) -> PathBuf {
        self.data_dir.join(".next_batch")
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let homeserver_host = required(vars, "BOT_HOMESERVER_HOST")?;
        let access_token = SecretString::from(required(vars, "BOT_ACCESS_TOKEN")?);

        let data_dir = PathBuf::from(
            vars.get("BOT_DATA_DIR")
                .cloned()
                .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()),
        );

        let media_dir = vars
            .get("BOT_MEDIA_DIR")
            .map_or_else(|| data_dir.join("media"), PathBuf::from);

        let command_prefix = vars
            .get("BOT_COMMAND_PREFIX")
            .cloned()
            .unwrap_or_else(|| DEFAULT_COMMAND_PREFIX.to_string());
        if command_prefix.is_empty() || command_prefix.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidCommandPrefix(format!(
                "BOT_COMMAND_PREFIX must be non-empty and contain no whitespace, got '{command_prefix}'"
            )));
        }

        let sync_timeout_ms = if let Some(value_str) = vars.get("BOT_SYNC_TIMEOUT_MS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidSyncTimeout(format!(
                    "BOT_SYNC_TIMEOUT_MS must be a valid positive integer, got '{value_str}': {e}"
                ))
            })?;

            if value == 0 {
                return Err(ConfigError::InvalidSyncTimeout(
                    "BOT_SYNC_TIMEOUT_MS must be greater than 0".to_string(),
                ));
            }

            if value > MAX_SYNC_TIMEOUT_MS {
                return Err(ConfigError::InvalidSyncTimeout(format!(
                    "BOT_SYNC_TIMEOUT_MS must not exceed {MAX_SYNC_TIMEOUT_MS}, got {value}"
                )));
            }

            value
        } else {
            DEFAULT_SYNC_TIMEOUT_MS
        };

        let http_timeout_secs = if let Some(value_str) = vars.get("BOT_HTTP_TIMEOUT_SECS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidHttpTimeout(format!(
                    "BOT_HTTP_TIMEOUT_SECS must be a valid positive integer, got '{value_str}': {e}"
                ))
            })?;

            if value == 0 {
                return Err(ConfigError::InvalidHttpTimeout(
                    "BOT_HTTP_TIMEOUT_SECS must be greater than 0".to_string(),
                ));
            }

            value
        } else {
            DEFAULT_HTTP_TIMEOUT_SECS
        };

        let sync_max_failures = match vars.get("BOT_SYNC_MAX_FAILURES") {
            Some(value_str) => value_str
                .parse()
                .map_err(|e| invalid("BOT_SYNC_MAX_FAILURES", format!("'{value_str}': {e}")))?,
            None => DEFAULT_SYNC_MAX_FAILURES,
        };

        let disconnect_on_startup = parse_bool(vars, "BOT_DISCONNECT_ON_STARTUP", true)?;

        let allowed_senders = match vars.get("BOT_ALLOWED_SENDERS") {
            None => None,
            Some(list) => {
                let senders: Vec<UserId> = list
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(UserId::from)
                    .collect();
                if senders.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        name: "BOT_ALLOWED_SENDERS".to_string(),
                        reason: "must list at least one user id".to_string(),
                    });
                }
                Some(senders)
            }
        };

        let observability = ObservabilityConfig {
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            json_logs: parse_bool(vars, "BOT_LOG_JSON", false)?,
            metrics_bind_address: vars
                .get("BOT_METRICS_BIND_ADDRESS")
                .filter(|s| !s.is_empty())
                .cloned(),
        };

        Ok(Config {
            homeserver_host,
            access_token,
            data_dir,
            media_dir,
            command_prefix,
            sync_timeout_ms,
            http_timeout: Duration::from_secs(http_timeout_secs),
            sync_max_failures,
            disconnect_on_startup,
            allowed_senders,
            observability,
        })
    }
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .filter(|v| !v.trim().is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn invalid(name: &str, reason: String) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        reason,
    }
}

fn parse_bool(
    vars: &HashMap<String, String>,
    name: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match vars.get(name).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if v == "true" || v == "1" || v == "yes" => Ok(true),
        Some(v) if v == "false" || v == "0" || v == "no" => Ok(false),
        Some(v) => Err(invalid(name, format!("expected true or false, got '{v}'"))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            (
                "BOT_HOMESERVER_HOST".to_string(),
                "matrix.example.org".to_string(),
            ),
            ("BOT_ACCESS_TOKEN".to_string(), "syt_secret_token".to_string()),
        ])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&base_vars()).expect("Config should load successfully");

        assert_eq!(config.homeserver_host, "matrix.example.org");
        assert_eq!(config.access_token.expose_secret(), "syt_secret_token");
        assert_eq!(config.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
        assert_eq!(config.media_dir, PathBuf::from(DEFAULT_DATA_DIR).join("media"));
        assert_eq!(config.command_prefix, "!");
        assert_eq!(config.sync_timeout_ms, DEFAULT_SYNC_TIMEOUT_MS);
        assert_eq!(config.http_timeout, Duration::from_secs(10));
        assert_eq!(config.sync_max_failures, DEFAULT_SYNC_MAX_FAILURES);
        assert!(config.disconnect_on_startup);
        assert!(config.allowed_senders.is_none());
        assert!(!config.observability.json_logs);
        assert!(config.observability.metrics_bind_address.is_none());
        assert_eq!(
            config.cursor_path(),
            PathBuf::from(DEFAULT_DATA_DIR).join(".next_batch")
        );
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let mut vars = base_vars();
        vars.insert("BOT_DATA_DIR".to_string(), "/var/lib/bot".to_string());
        vars.insert("BOT_MEDIA_DIR".to_string(), "/srv/clips".to_string());
        vars.insert("BOT_COMMAND_PREFIX".to_string(), "?".to_string());
        vars.insert("BOT_SYNC_TIMEOUT_MS".to_string(), "60000".to_string());
        vars.insert("BOT_HTTP_TIMEOUT_SECS".to_string(), "20".to_string());
        vars.insert("BOT_SYNC_MAX_FAILURES".to_string(), "0".to_string());
        vars.insert("BOT_DISCONNECT_ON_STARTUP".to_string(), "false".to_string());
        vars.insert(
            "BOT_ALLOWED_SENDERS".to_string(),
            "@alice:example.org, @bob:example.org".to_string(),
        );
        vars.insert("BOT_LOG_JSON".to_string(), "1".to_string());
        vars.insert(
            "BOT_METRICS_BIND_ADDRESS".to_string(),
            "127.0.0.1:9100".to_string(),
        );

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/bot"));
        assert_eq!(config.media_dir, PathBuf::from("/srv/clips"));
        assert_eq!(config.command_prefix, "?");
        assert_eq!(config.sync_timeout_ms, 60_000);
        assert_eq!(config.http_timeout, Duration::from_secs(20));
        assert_eq!(config.sync_max_failures, 0);
        assert!(!config.disconnect_on_startup);
        assert_eq!(
            config.allowed_senders,
            Some(vec![
                UserId::from("@alice:example.org"),
                UserId::from("@bob:example.org")
            ])
        );
        assert!(config.observability.json_logs);
        assert_eq!(
            config.observability.metrics_bind_address.as_deref(),
            Some("127.0.0.1:9100")
        );
    }

    #[test]
    fn test_from_vars_missing_host() {
        let mut vars = base_vars();
        vars.remove("BOT_HOMESERVER_HOST");

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "BOT_HOMESERVER_HOST"));
    }

    #[test]
    fn test_from_vars_blank_token_is_missing() {
        let mut vars = base_vars();
        vars.insert("BOT_ACCESS_TOKEN".to_string(), "   ".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "BOT_ACCESS_TOKEN"));
    }

    #[test]
    fn test_command_prefix_rejects_empty_and_whitespace() {
        for bad in ["", " ", "! "] {
            let mut vars = base_vars();
            vars.insert("BOT_COMMAND_PREFIX".to_string(), bad.to_string());
            assert!(matches!(
                Config::from_vars(&vars),
                Err(ConfigError::InvalidCommandPrefix(_))
            ));
        }
    }

    #[test]
    fn test_sync_timeout_rejects_zero() {
        let mut vars = base_vars();
        vars.insert("BOT_SYNC_TIMEOUT_MS".to_string(), "0".to_string());

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidSyncTimeout(msg)) if msg.contains("must be greater than 0"))
        );
    }

    #[test]
    fn test_sync_timeout_rejects_too_large() {
        let mut vars = base_vars();
        vars.insert("BOT_SYNC_TIMEOUT_MS".to_string(), "300001".to_string());

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidSyncTimeout(msg)) if msg.contains("must not exceed 300000"))
        );
    }

    #[test]
    fn test_sync_timeout_rejects_non_numeric() {
        let mut vars = base_vars();
        vars.insert("BOT_SYNC_TIMEOUT_MS".to_string(), "thirty".to_string());

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidSyncTimeout(msg)) if msg.contains("must be a valid positive integer"))
        );
    }

    #[test]
    fn test_http_timeout_rejects_zero() {
        let mut vars = base_vars();
        vars.insert("BOT_HTTP_TIMEOUT_SECS".to_string(), "0".to_string());

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidHttpTimeout(_))
        ));
    }

    #[test]
    fn test_bool_rejects_garbage() {
        let mut vars = base_vars();
        vars.insert("BOT_DISCONNECT_ON_STARTUP".to_string(), "maybe".to_string());

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidValue { name, .. }) if name == "BOT_DISCONNECT_ON_STARTUP")
        );
    }

    #[test]
    fn test_blank_allowed_senders_is_rejected() {
        for blank in ["", ",", " , "] {
            let mut vars = base_vars();
            vars.insert("BOT_ALLOWED_SENDERS".to_string(), blank.to_string());

            let result = Config::from_vars(&vars);
            assert!(
                matches!(&result, Err(ConfigError::InvalidValue { name, .. }) if name == "BOT_ALLOWED_SENDERS"),
                "{blank:?}: {result:?}"
            );
        }
    }

    #[test]
    fn test_unset_allowed_senders_means_unrestricted() {
        let config = Config::from_vars(&base_vars()).unwrap();
        assert!(config.allowed_senders.is_none());
    }

    #[test]
    fn test_debug_redacts_access_token() {
        let config = Config::from_vars(&base_vars()).unwrap();

        let debug_output = format!("{config:?}");

        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("syt_secret_token"));
    }
}
