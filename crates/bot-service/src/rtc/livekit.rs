//! LiveKit media backend.
//!
//! Connects with the SFU-issued JWT, disables auto-subscribe (the bot only
//! speaks), and publishes a single microphone-sourced track fed from a
//! native audio source.

use super::audio::{AudioFrame, CHANNELS, SAMPLES_PER_FRAME, SAMPLE_RATE};
use super::media::{AudioSink, MediaConnector, MediaSession, AUDIO_TRACK_NAME};
use super::sfu::RtcCredentials;
use crate::errors::RtcError;
use async_trait::async_trait;
use common::secret::ExposeSecret;
use livekit::options::TrackPublishOptions;
use livekit::prelude::{LocalAudioTrack, LocalTrack, Room, RoomOptions, TrackSource};
use livekit::webrtc::audio_frame::AudioFrame as LkAudioFrame;
use livekit::webrtc::audio_source::native::NativeAudioSource;
use livekit::webrtc::audio_source::{AudioSourceOptions, RtcAudioSource};
use std::borrow::Cow;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Buffered audio inside the native source.
const SOURCE_QUEUE_MS: u32 = 1_000;

#[derive(Debug, Default, Clone, Copy)]
pub struct LiveKitConnector;

impl LiveKitConnector {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaConnector for LiveKitConnector {
    #[instrument(skip_all, fields(url = %credentials.url))]
    async fn connect(
        &self,
        credentials: &RtcCredentials,
    ) -> Result<Box<dyn MediaSession>, RtcError> {
        let options = RoomOptions {
            auto_subscribe: false,
            ..Default::default()
        };

        let (room, mut events) =
            Room::connect(&credentials.url, credentials.jwt.expose_secret(), options)
                .await
                .map_err(|e| RtcError::Media(format!("connect failed: {e}")))?;

        // Nothing is subscribed; drain so the room's event channel never backs up.
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                debug!(target: "bot.rtc", event = ?event, "LiveKit room event");
            }
        });

        let source = NativeAudioSource::new(
            AudioSourceOptions::default(),
            SAMPLE_RATE,
            CHANNELS,
            SOURCE_QUEUE_MS,
        );
        let track = LocalAudioTrack::create_audio_track(
            AUDIO_TRACK_NAME,
            RtcAudioSource::Native(source.clone()),
        );

        room.local_participant()
            .publish_track(
                LocalTrack::Audio(track),
                TrackPublishOptions {
                    source: TrackSource::Microphone,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| RtcError::Media(format!("publish failed: {e}")))?;

        info!(target: "bot.rtc", room = %room.name(), "Media session connected");

        Ok(Box::new(LiveKitSession {
            room,
            sink: Arc::new(LiveKitAudioSink { source }),
        }))
    }
}

struct LiveKitSession {
    room: Room,
    sink: Arc<LiveKitAudioSink>,
}

#[async_trait]
impl MediaSession for LiveKitSession {
    fn audio_sink(&self) -> Arc<dyn AudioSink> {
        self.sink.clone()
    }

    async fn close(&self) -> Result<(), RtcError> {
        self.room
            .close()
            .await
            .map_err(|e| RtcError::Media(format!("close failed: {e}")))
    }
}

struct LiveKitAudioSink {
    source: NativeAudioSource,
}

#[async_trait]
impl AudioSink for LiveKitAudioSink {
    async fn push_frame(&self, frame: &AudioFrame) -> Result<(), RtcError> {
        let frame = LkAudioFrame {
            data: Cow::Borrowed(frame.samples.as_slice()),
            sample_rate: SAMPLE_RATE,
            num_channels: CHANNELS,
            samples_per_channel: SAMPLES_PER_FRAME as u32,
        };

        self.source
            .capture_frame(&frame)
            .await
            .map_err(|e| RtcError::Media(format!("capture failed: {e}")))
    }
}
