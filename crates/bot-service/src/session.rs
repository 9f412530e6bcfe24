//! Session bootstrap.
//!
//! Resolves the bot's own identity and picks the RTC focus. Every failure
//! here is fatal; nothing is retried.

use crate::discovery::{select_preferred_focus, ClientConfig, RtcFocus};
use crate::errors::BootstrapError;
use crate::homeserver::HomeserverApi;
use common::types::{DeviceId, UserId};
use tracing::{info, instrument, warn};

/// Identity and focus shared by every later component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub focus: RtcFocus,
    pub display_name: Option<String>,
}

impl SessionContext {
    /// Token endpoint base of the selected focus.
    #[must_use]
    pub fn focus_service_url(&self) -> Option<&str> {
        self.focus.service_url.as_deref()
    }
}

/// Resolve identity via the homeserver and select the preferred focus.
///
/// # Errors
///
/// - `BootstrapError::IdentityLookup` if the access token is rejected or the
///   homeserver is unreachable
/// - `BootstrapError::MissingDeviceId` if the token is not bound to a device
/// - `BootstrapError::NoRtcFocus` if discovery listed no candidates
/// - `BootstrapError::MissingServiceUrl` if the chosen focus has no URL
#[instrument(skip_all)]
pub async fn bootstrap(
    homeserver: &dyn HomeserverApi,
    config: &ClientConfig,
) -> Result<SessionContext, BootstrapError> {
    let whoami = homeserver
        .whoami()
        .await
        .map_err(BootstrapError::IdentityLookup)?;
    let device_id = whoami.device_id.ok_or(BootstrapError::MissingDeviceId)?;

    let focus = select_preferred_focus(&config.rtc_foci)
        .cloned()
        .ok_or(BootstrapError::NoRtcFocus)?;
    if focus.service_url.is_none() {
        return Err(BootstrapError::MissingServiceUrl(focus.focus_type));
    }

    // Cosmetic; a profile failure must not stop startup.
    let display_name = match homeserver.display_name(&whoami.user_id).await {
        Ok(name) => name,
        Err(e) => {
            warn!(target: "bot.session", error = %e, "Could not fetch display name");
            None
        }
    };

    info!(
        target: "bot.session",
        user_id = %whoami.user_id,
        device_id = %device_id,
        focus_type = %focus.focus_type,
        "Session established"
    );

    Ok(SessionContext {
        user_id: whoami.user_id,
        device_id,
        focus,
        display_name,
    })
}
