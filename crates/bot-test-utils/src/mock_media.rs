//! Media connector that records instead of streaming.

use async_trait::async_trait;
use bot_service::errors::RtcError;
use bot_service::rtc::{AudioFrame, AudioSink, MediaConnector, MediaSession, RtcCredentials};
use std::sync::{Arc, Mutex};

/// Counts connects, closes and frames across every session it created.
#[derive(Debug, Clone)]
pub struct RecordingMediaConnector {
    inner: Arc<Mutex<MediaStats>>,
}

#[derive(Debug, Default)]
struct MediaStats {
    error: Option<RtcError>,
    connected_urls: Vec<String>,
    closed: usize,
    frames: usize,
    audible_frames: usize,
}

impl Default for RecordingMediaConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingMediaConnector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MediaStats::default())),
        }
    }

    /// Every connect fails with `error`.
    #[must_use]
    pub fn failing(error: RtcError) -> Self {
        let connector = Self::new();
        connector.inner.lock().unwrap().error = Some(error);
        connector
    }

    /// Signaling URLs connected to, in order.
    #[must_use]
    pub fn connected_urls(&self) -> Vec<String> {
        self.inner.lock().unwrap().connected_urls.clone()
    }

    #[must_use]
    pub fn connects(&self) -> usize {
        self.inner.lock().unwrap().connected_urls.len()
    }

    #[must_use]
    pub fn closes(&self) -> usize {
        self.inner.lock().unwrap().closed
    }

    #[must_use]
    pub fn frames(&self) -> usize {
        self.inner.lock().unwrap().frames
    }

    /// Frames that were not silence.
    #[must_use]
    pub fn audible_frames(&self) -> usize {
        self.inner.lock().unwrap().audible_frames
    }
}

#[async_trait]
impl MediaConnector for RecordingMediaConnector {
    async fn connect(
        &self,
        credentials: &RtcCredentials,
    ) -> Result<Box<dyn MediaSession>, RtcError> {
        let mut stats = self.inner.lock().unwrap();
        if let Some(error) = &stats.error {
            return Err(error.clone());
        }
        stats.connected_urls.push(credentials.url.clone());
        Ok(Box::new(RecordingSession {
            stats: Arc::clone(&self.inner),
        }))
    }
}

struct RecordingSession {
    stats: Arc<Mutex<MediaStats>>,
}

#[async_trait]
impl MediaSession for RecordingSession {
    fn audio_sink(&self) -> Arc<dyn AudioSink> {
        Arc::new(RecordingSink {
            stats: Arc::clone(&self.stats),
        })
    }

    async fn close(&self) -> Result<(), RtcError> {
        self.stats.lock().unwrap().closed += 1;
        Ok(())
    }
}

struct RecordingSink {
    stats: Arc<Mutex<MediaStats>>,
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn push_frame(&self, frame: &AudioFrame) -> Result<(), RtcError> {
        let mut stats = self.stats.lock().unwrap();
        stats.frames += 1;
        if !frame.is_silent() {
            stats.audible_frames += 1;
        }
        Ok(())
    }
}
