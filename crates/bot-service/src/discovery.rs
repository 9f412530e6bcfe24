//! Client discovery.
//!
//! Resolves a host name to the homeserver base URL and the RTC focus
//! candidates by fetching `https://{host}/.well-known/matrix/client`.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Well-known document path.
pub const WELL_KNOWN_PATH: &str = "/.well-known/matrix/client";

/// Focus type preferred over every other candidate.
pub const LIVEKIT_FOCUS_TYPE: &str = "livekit";

const DISCOVERY_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Discovery document at {url} is unreachable: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("Discovery document at {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("Discovery document at {url} is invalid: {reason}")]
    Invalid { url: String, reason: String },

    #[error("Discovery document at {0} has no RTC foci")]
    MissingRtcFoci(String),
}

/// One RTC focus candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcFocus {
    #[serde(rename = "type")]
    pub focus_type: String,

    #[serde(
        rename = "livekit_service_url",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub service_url: Option<String>,
}

impl RtcFocus {
    pub fn new(focus_type: impl Into<String>, service_url: Option<String>) -> Self {
        Self {
            focus_type: focus_type.into(),
            service_url,
        }
    }
}

/// Resolved client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Homeserver base URL without a trailing slash.
    pub homeserver_base_url: String,

    /// RTC focus candidates in document order.
    pub rtc_foci: Vec<RtcFocus>,
}

#[derive(Debug, Deserialize)]
struct WellKnownDocument {
    #[serde(rename = "m.homeserver")]
    homeserver: Option<HomeserverInfo>,

    #[serde(rename = "org.matrix.msc4143.rtc_foci")]
    rtc_foci: Option<Vec<RtcFocus>>,
}

#[derive(Debug, Deserialize)]
struct HomeserverInfo {
    base_url: String,
}

/// Select the preferred focus: the first `livekit` candidate, else the first
/// candidate of any other type, else `None`.
#[must_use]
pub fn select_preferred_focus(foci: &[RtcFocus]) -> Option<&RtcFocus> {
    foci.iter()
        .find(|f| f.focus_type == LIVEKIT_FOCUS_TYPE)
        .or_else(|| foci.first())
}

/// Base URL for a configured host. A value carrying an explicit scheme is
/// used verbatim.
#[must_use]
pub fn discovery_base(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("https://") || host.starts_with("http://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

/// Parse a well-known document body.
///
/// A missing `m.homeserver` entry falls back to the discovery base.
pub fn parse_client_config(
    url: &str,
    fallback_base: &str,
    body: &str,
) -> Result<ClientConfig, DiscoveryError> {
    let document: WellKnownDocument =
        serde_json::from_str(body).map_err(|e| DiscoveryError::Invalid {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let rtc_foci = document
        .rtc_foci
        .ok_or_else(|| DiscoveryError::MissingRtcFoci(url.to_string()))?;

    let homeserver_base_url = document
        .homeserver
        .map_or_else(|| fallback_base.to_string(), |h| h.base_url)
        .trim_end_matches('/')
        .to_string();

    Ok(ClientConfig {
        homeserver_base_url,
        rtc_foci,
    })
}

/// Fetch and parse the discovery document for `host`.
///
/// # Errors
///
/// Every failure is fatal to startup: unreachable, non-200, unparseable, or
/// missing the RTC foci list.
#[instrument(skip_all, fields(host = %host))]
pub async fn discover(host: &str) -> Result<ClientConfig, DiscoveryError> {
    let base = discovery_base(host);
    let url = format!("{base}{WELL_KNOWN_PATH}");

    let client = Client::builder()
        .timeout(Duration::from_secs(DISCOVERY_TIMEOUT_SECS))
        .build()
        .map_err(|e| DiscoveryError::Unreachable {
            url: url.clone(),
            reason: e.to_string(),
        })?;

    let response = client.get(&url).send().await.map_err(|e| {
        warn!(target: "bot.discovery", error = %e, "Discovery request failed");
        DiscoveryError::Unreachable {
            url: url.clone(),
            reason: e.to_string(),
        }
    })?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        warn!(target: "bot.discovery", status = %status, "Discovery returned non-200");
        return Err(DiscoveryError::Status {
            url,
            status: status.as_u16(),
        });
    }

    let body = response
        .text()
        .await
        .map_err(|e| DiscoveryError::Unreachable {
            url: url.clone(),
            reason: e.to_string(),
        })?;

    let config = parse_client_config(&url, &base, &body)?;

    info!(
        target: "bot.discovery",
        homeserver = %config.homeserver_base_url,
        foci = config.rtc_foci.len(),
        "Discovered client configuration"
    );

    Ok(config)
}
