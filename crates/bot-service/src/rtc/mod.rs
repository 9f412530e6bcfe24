//! RTC collaborator: SFU credential exchange, media sessions, audio.

pub mod audio;
pub mod media;
pub mod sfu;

#[cfg(feature = "livekit")]
pub mod livekit;

pub use audio::{AudioClip, AudioFrame, AudioPlayer};
pub use media::{AudioSink, MediaConnector, MediaSession, UnavailableMediaConnector};
pub use sfu::{RtcCredentials, SfuTokenApi, SfuTokenClient};

use std::sync::Arc;

/// Media connector for this build: LiveKit when the feature is enabled,
/// otherwise one that refuses every connection.
#[must_use]
pub fn default_media_connector() -> Arc<dyn MediaConnector> {
    #[cfg(feature = "livekit")]
    {
        Arc::new(livekit::LiveKitConnector::new())
    }
    #[cfg(not(feature = "livekit"))]
    {
        Arc::new(UnavailableMediaConnector)
    }
}
