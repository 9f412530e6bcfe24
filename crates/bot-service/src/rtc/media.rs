//! Media session seams.
//!
//! A `MediaConnector` turns RTC credentials into a connected `MediaSession`
//! that publishes one outbound audio track. Frames reach the track through
//! the session's `AudioSink`.

use super::audio::AudioFrame;
use super::sfu::RtcCredentials;
use crate::errors::RtcError;
use async_trait::async_trait;
use std::sync::Arc;

/// Name of the published audio track.
pub const AUDIO_TRACK_NAME: &str = "bot-audio";

/// Accepts paced audio frames for the published track.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn push_frame(&self, frame: &AudioFrame) -> Result<(), RtcError>;
}

/// A connected media session with its audio track published.
#[async_trait]
pub trait MediaSession: Send + Sync {
    fn audio_sink(&self) -> Arc<dyn AudioSink>;

    /// Disconnect from the signaling server.
    async fn close(&self) -> Result<(), RtcError>;
}

#[async_trait]
pub trait MediaConnector: Send + Sync {
    /// Whether `connect` can ever succeed in this build.
    fn is_available(&self) -> bool {
        true
    }

    /// Connect with `credentials` and publish the audio track.
    async fn connect(&self, credentials: &RtcCredentials)
        -> Result<Box<dyn MediaSession>, RtcError>;
}

/// Connector for builds without a media backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableMediaConnector;

#[async_trait]
impl MediaConnector for UnavailableMediaConnector {
    fn is_available(&self) -> bool {
        false
    }

    async fn connect(
        &self,
        _credentials: &RtcCredentials,
    ) -> Result<Box<dyn MediaSession>, RtcError> {
        Err(RtcError::MediaUnavailable(
            "built without the `livekit` feature".to_string(),
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::SecretString;

    #[tokio::test]
    async fn test_unavailable_connector_refuses() {
        let credentials = RtcCredentials {
            url: "wss://sfu.example.org".to_string(),
            jwt: SecretString::from("jwt"),
        };

        assert!(!UnavailableMediaConnector.is_available());
        let result = UnavailableMediaConnector.connect(&credentials).await;
        assert!(matches!(result, Err(RtcError::MediaUnavailable(_))));
    }
}
