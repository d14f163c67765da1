use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::handle::Recorder;
use super::state::FeedOutcome;
use crate::audio::wav::PcmFormat;
use crate::audio::AudioFrame;
use crate::error::RecorderResult;

const FRAME_BITS_PER_SAMPLE: u16 = 16;

/// Anything that accepts raw PCM from an audio pipeline
pub trait AudioSink: Send + Sync {
    fn feed(&self, pcm: &[u8]) -> RecorderResult<FeedOutcome>;

    /// PCM format the sink expects producers to deliver
    fn format(&self) -> PcmFormat;
}

impl AudioSink for Recorder {
    fn feed(&self, pcm: &[u8]) -> RecorderResult<FeedOutcome> {
        self.feed_audio(pcm)
    }

    fn format(&self) -> PcmFormat {
        self.config().format
    }
}

/// Adapt a sink to the raw frame-callback shape used by audio pipelines.
///
/// The returned closure reports how many bytes were taken; zero means the
/// buffer was ignored, dropped, or rejected.
pub fn frame_callback(sink: Arc<dyn AudioSink>) -> impl Fn(&[u8]) -> usize + Send + Sync + 'static {
    move |buffer: &[u8]| {
        if buffer.is_empty() {
            return 0;
        }
        match sink.feed(buffer) {
            Ok(FeedOutcome::Accepted) | Ok(FeedOutcome::LimitReached { accepted: true }) => {
                buffer.len()
            }
            Ok(_) => 0,
            Err(e) => {
                error!("Audio sink rejected buffer: {}", e);
                0
            }
        }
    }
}

/// Counts from one [`pump_frames`] run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub frames: u64,
    pub bytes_fed: u64,
    pub accepted_bytes: u64,
    pub dropped_frames: u64,
    pub ignored_frames: u64,
    pub mismatched_frames: u64,
}

/// Feed every frame from `audio_rx` into `sink` until the channel closes.
///
/// Blocking: run it on a dedicated thread or `spawn_blocking`, the way a
/// real-time audio callback thread would call the sink.
pub fn pump_frames(mut audio_rx: mpsc::Receiver<AudioFrame>, sink: &dyn AudioSink) -> PumpStats {
    let format = sink.format();
    let mut stats = PumpStats::default();

    info!("Audio pump started");

    while let Some(frame) = audio_rx.blocking_recv() {
        stats.frames += 1;

        // Frames always carry 16-bit samples
        if frame.sample_rate != format.sample_rate
            || frame.channels != format.channels
            || format.bits_per_sample != FRAME_BITS_PER_SAMPLE
        {
            if stats.mismatched_frames == 0 {
                warn!(
                    "Skipping frames in {}Hz/{}ch/16-bit; sink expects {}Hz/{}ch/{}-bit",
                    frame.sample_rate,
                    frame.channels,
                    format.sample_rate,
                    format.channels,
                    format.bits_per_sample
                );
            }
            stats.mismatched_frames += 1;
            continue;
        }

        // Convert to PCM bytes
        let pcm_bytes = frame.to_le_bytes();
        if pcm_bytes.is_empty() {
            continue;
        }
        stats.bytes_fed += pcm_bytes.len() as u64;

        match sink.feed(&pcm_bytes) {
            Ok(FeedOutcome::Accepted) | Ok(FeedOutcome::LimitReached { accepted: true }) => {
                stats.accepted_bytes += pcm_bytes.len() as u64
            }
            Ok(FeedOutcome::Dropped) => stats.dropped_frames += 1,
            Ok(FeedOutcome::Ignored) | Ok(FeedOutcome::LimitReached { accepted: false }) => {
                stats.ignored_frames += 1
            }
            Err(e) => {
                error!("Failed to feed audio frame: {}", e);
                stats.ignored_frames += 1;
            }
        }
    }

    info!(
        "Audio pump stopped: {} frames, {} bytes accepted, {} dropped",
        stats.frames, stats.accepted_bytes, stats.dropped_frames
    );

    stats
}
