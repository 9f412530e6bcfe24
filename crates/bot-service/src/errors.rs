//! Bot error types.
//!
//! Errors are split by collaborator so callers can classify them:
//! - `HomeserverError`: chat-protocol requests (status + errcode kept)
//! - `RtcError`: SFU token exchange and media session
//! - `CallError`: call orchestration, naming the failed join step
//! - `CommandError`: what a command handler returns; rendered into the room
//! - `BootstrapError` / `BotError`: startup and loop-terminating failures

use crate::config::ConfigError;
use crate::cursor::CursorError;
use crate::discovery::DiscoveryError;
use crate::rtc::audio::AudioError;
use common::types::RoomId;
use std::fmt;
use thiserror::Error;

/// Errors from the homeserver client.
#[derive(Debug, Clone, Error)]
pub enum HomeserverError {
    /// Request never produced a response (connect, timeout, TLS).
    #[error("Homeserver request failed: {0}")]
    Transport(String),

    /// Server answered with a non-success status.
    #[error("Homeserver returned {status}: {message}")]
    Status {
        status: u16,
        errcode: Option<String>,
        message: String,
    },

    /// Response body could not be parsed.
    #[error("Invalid homeserver response: {0}")]
    InvalidResponse(String),

    /// HTTP client could not be built or a URL was malformed.
    #[error("Homeserver client configuration error: {0}")]
    Configuration(String),
}

impl HomeserverError {
    /// HTTP status, if the server answered.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            HomeserverError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status().is_some_and(|s| (400..500).contains(&s))
    }

    /// 401/403: the access token is no longer accepted.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(self.status(), Some(401 | 403))
    }

    /// Failures worth retrying: no response, rate limiting, server errors.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            HomeserverError::Transport(_) => true,
            HomeserverError::Status { status, .. } => *status == 429 || *status >= 500,
            HomeserverError::InvalidResponse(_) | HomeserverError::Configuration(_) => false,
        }
    }
}

/// Errors from the RTC collaborator.
#[derive(Debug, Clone, Error)]
pub enum RtcError {
    /// SFU token request never produced a response.
    #[error("SFU request failed: {0}")]
    Transport(String),

    /// SFU token endpoint answered with a non-success status.
    #[error("SFU returned status {0}")]
    Status(u16),

    /// SFU response could not be parsed.
    #[error("Invalid SFU response: {0}")]
    InvalidResponse(String),

    /// Media session failed to connect, publish or accept a frame.
    #[error("Media session error: {0}")]
    Media(String),

    /// This build has no media backend.
    #[error("Media backend unavailable: {0}")]
    MediaUnavailable(String),

    /// HTTP client could not be built or a URL was malformed.
    #[error("RTC client configuration error: {0}")]
    Configuration(String),
}

/// The four ordered steps of joining a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStep {
    /// Requesting the OpenID assertion from the homeserver.
    OpenIdToken,
    /// Exchanging the assertion for RTC signaling credentials.
    RtcCredentials,
    /// Writing the call-membership state event.
    AnnounceMembership,
    /// Connecting the media session and publishing audio.
    MediaSession,
}

impl JoinStep {
    /// Bounded label for metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            JoinStep::OpenIdToken => "openid_token",
            JoinStep::RtcCredentials => "rtc_credentials",
            JoinStep::AnnounceMembership => "announce_membership",
            JoinStep::MediaSession => "media_session",
        }
    }
}

impl fmt::Display for JoinStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            JoinStep::OpenIdToken => "requesting the OpenID token",
            JoinStep::RtcCredentials => "exchanging RTC credentials",
            JoinStep::AnnounceMembership => "announcing call membership",
            JoinStep::MediaSession => "starting the media session",
        };
        f.write_str(text)
    }
}

/// Call orchestration errors.
#[derive(Debug, Error)]
pub enum CallError {
    /// A join step failed; later steps were not attempted and earlier ones
    /// were not rolled back.
    #[error("Joining the call failed while {step}: {reason}")]
    Join { step: JoinStep, reason: String },

    /// Clearing the membership state event failed.
    #[error("Leaving the call failed: {0}")]
    Leave(HomeserverError),

    /// Listing joined rooms for disconnect-all failed.
    #[error("Could not list joined rooms: {0}")]
    RoomScan(HomeserverError),

    /// The room has no call session owned by this process.
    #[error("Not in a call in {0}")]
    NoActiveCall(RoomId),

    /// Audio pipeline rejected the request.
    #[error(transparent)]
    Audio(#[from] AudioError),
}

impl CallError {
    pub(crate) fn join(step: JoinStep, reason: impl fmt::Display) -> Self {
        CallError::Join {
            step,
            reason: reason.to_string(),
        }
    }
}

/// Error returned by a command handler or precondition.
///
/// The dispatcher turns it into a chat reply in the originating room.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{0}")]
    Failed(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Not permitted: {0}")]
    PreconditionFailed(String),

    #[error(transparent)]
    Call(#[from] CallError),

    #[error(transparent)]
    Homeserver(#[from] HomeserverError),
}

/// Session bootstrap failures. All are fatal.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Identity lookup failed: {0}")]
    IdentityLookup(HomeserverError),

    #[error("Identity lookup returned no device id")]
    MissingDeviceId,

    #[error("No RTC focus candidate is configured")]
    NoRtcFocus,

    #[error("RTC focus '{0}' has no service URL")]
    MissingServiceUrl(String),
}

/// Errors that stop the bot.
#[derive(Debug, Error)]
pub enum BotError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error(transparent)]
    Homeserver(#[from] HomeserverError),

    #[error(transparent)]
    Rtc(#[from] RtcError),

    #[error(transparent)]
    Cursor(#[from] CursorError),

    #[error(transparent)]
    Call(#[from] CallError),

    /// Consecutive transient sync failures exceeded the configured budget.
    #[error("Sync failed {attempts} times in a row: {last}")]
    SyncExhausted { attempts: u32, last: HomeserverError },
}
