//! Common configuration types.

use serde::{Deserialize, Serialize};

/// Default filter used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Observability configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Fallback `EnvFilter` directive when `RUST_LOG` is unset
    pub log_filter: String,
    /// Enable JSON-formatted logs
    pub json_logs: bool,
    /// Prometheus scrape listener address, if metrics export is wanted
    pub metrics_bind_address: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            json_logs: false,
            metrics_bind_address: None,
        }
    }
}
