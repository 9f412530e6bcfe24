//! Outbound audio pipeline.
//!
//! Audio is 48 kHz mono signed 16-bit PCM cut into 20 ms frames. Each call
//! session runs one `AudioPlayer` task that sends a frame per tick of a
//! wall-clock ticker: the next frame of the current clip, or silence when
//! nothing is queued. Clips arrive through a bounded queue.

use super::media::AudioSink;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: u32 = 1;
pub const FRAME_MS: u64 = 20;

/// Samples per channel in one frame (960).
pub const SAMPLES_PER_FRAME: usize = 960;

/// Clips that may wait behind the one playing.
pub const CLIP_QUEUE_CAPACITY: usize = 8;

const FRAME_DURATION: Duration = Duration::from_millis(FRAME_MS);

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Audio file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Failed to start decoder: {0}")]
    DecoderUnavailable(String),

    #[error("Decoding failed: {0}")]
    DecodeFailed(String),

    #[error("Audio file contains no samples")]
    Empty,

    #[error("Audio queue is full ({CLIP_QUEUE_CAPACITY} clips waiting)")]
    QueueFull,

    #[error("Audio player has stopped")]
    PlayerStopped,
}

/// One 20 ms frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
}

impl AudioFrame {
    #[must_use]
    pub fn silence() -> Self {
        Self {
            samples: vec![0; SAMPLES_PER_FRAME],
        }
    }

    #[must_use]
    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|&s| s == 0)
    }
}

/// Split raw s16le PCM into frames. A trailing partial frame is zero-padded;
/// a dangling odd byte is dropped.
#[must_use]
pub fn pcm_to_frames(pcm: &[u8]) -> Vec<AudioFrame> {
    let samples: Vec<i16> = pcm
        .chunks_exact(2)
        .filter_map(|pair| match *pair {
            [lo, hi] => Some(i16::from_le_bytes([lo, hi])),
            _ => None,
        })
        .collect();

    samples
        .chunks(SAMPLES_PER_FRAME)
        .map(|chunk| {
            let mut frame = chunk.to_vec();
            frame.resize(SAMPLES_PER_FRAME, 0);
            AudioFrame { samples: frame }
        })
        .collect()
}

/// A decoded clip ready for playback.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub name: String,
    pub frames: Vec<AudioFrame>,
}

impl AudioClip {
    #[must_use]
    pub fn duration(&self) -> Duration {
        FRAME_DURATION.saturating_mul(u32::try_from(self.frames.len()).unwrap_or(u32::MAX))
    }
}

/// Decode an audio file with `ffmpeg` into 48 kHz mono s16 frames.
#[instrument(skip_all, fields(path = %path.display()))]
pub async fn decode_file(path: &Path) -> Result<AudioClip, AudioError> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(AudioError::FileNotFound(path.to_path_buf()));
    }

    let output = Command::new("ffmpeg")
        .args(["-hide_banner", "-loglevel", "error", "-i"])
        .arg(path)
        .args(["-f", "s16le", "-acodec", "pcm_s16le"])
        .args(["-ac", &CHANNELS.to_string(), "-ar", &SAMPLE_RATE.to_string()])
        .arg("pipe:1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| AudioError::DecoderUnavailable(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AudioError::DecodeFailed(format!(
            "ffmpeg exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let frames = pcm_to_frames(&output.stdout);
    if frames.is_empty() {
        return Err(AudioError::Empty);
    }

    let name = path
        .file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());

    debug!(target: "bot.audio", frames = frames.len(), "Decoded audio file");
    Ok(AudioClip { name, frames })
}

/// Paced frame writer for one media session.
pub struct AudioPlayer {
    queue: mpsc::Sender<AudioClip>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl AudioPlayer {
    /// Start the playback task. It stops when `cancel` fires or `stop` is
    /// called.
    #[must_use]
    pub fn spawn(sink: Arc<dyn AudioSink>, cancel: CancellationToken) -> Self {
        let (queue, clips) = mpsc::channel(CLIP_QUEUE_CAPACITY);
        let handle = tokio::spawn(run_player(sink, clips, cancel.clone()));

        Self {
            queue,
            cancel,
            handle,
        }
    }

    /// Queue a clip behind whatever is playing.
    pub fn enqueue(&self, clip: AudioClip) -> Result<(), AudioError> {
        self.queue.try_send(clip).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => AudioError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => AudioError::PlayerStopped,
        })
    }

    /// Stop the task and wait for it to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(target: "bot.audio", error = %e, "Audio player task failed");
        }
    }
}

async fn run_player(
    sink: Arc<dyn AudioSink>,
    mut clips: mpsc::Receiver<AudioClip>,
    cancel: CancellationToken,
) {
    let silence = AudioFrame::silence();
    let mut ticker = tokio::time::interval(FRAME_DURATION);
    let mut current: Option<(String, std::vec::IntoIter<AudioFrame>)> = None;
    let mut sink_failing = false;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            _ = ticker.tick() => {
                let mut next = current.as_mut().and_then(|(_, frames)| frames.next());

                if next.is_none() {
                    if let Some((name, _)) = current.take() {
                        debug!(target: "bot.audio", clip = %name, "Clip finished");
                    }
                    if let Ok(clip) = clips.try_recv() {
                        info!(target: "bot.audio", clip = %clip.name, "Playing clip");
                        let mut frames = clip.frames.into_iter();
                        next = frames.next();
                        current = Some((clip.name, frames));
                    }
                }

                let frame = next.as_ref().unwrap_or(&silence);
                match sink.push_frame(frame).await {
                    Ok(()) => sink_failing = false,
                    Err(e) => {
                        if !sink_failing {
                            warn!(target: "bot.audio", error = %e, "Audio sink rejected frame");
                        }
                        sink_failing = true;
                    }
                }
            }
        }
    }

    debug!(target: "bot.audio", "Audio player stopped");
}
