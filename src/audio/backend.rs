use anyhow::Result;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Little-endian PCM bytes, as written to a WAV payload
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0;
        }
        let frames = self.samples.len() as u64 / self.channels as u64;
        frames * 1000 / self.sample_rate as u64
    }
}

/// Configuration for audio backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Sample rate of produced frames
    pub target_sample_rate: u32,
    /// Channel count (1 = mono, 2 = stereo)
    pub target_channels: u16,
    /// Buffer size in milliseconds (one callback's worth of audio)
    pub buffer_duration_ms: u64,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 24000, // Recorder default
            target_channels: 2,        // Stereo
            buffer_duration_ms: 20,    // 20ms callbacks
        }
    }
}

impl AudioBackendConfig {
    /// Interleaved samples in one buffer
    pub fn samples_per_buffer(&self) -> usize {
        let frames = self.target_sample_rate as u64 * self.buffer_duration_ms / 1000;
        frames as usize * self.target_channels as usize
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - Tone: synthetic sine wave, paced in real time
/// - File: replay a WAV file, paced in real time
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start producing audio
    ///
    /// Returns a channel receiver that will receive audio frames
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop producing audio; the frame channel closes afterwards
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently producing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Audio source type
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// Sine tone generator
    Tone { frequency_hz: f32, amplitude: f32 },
    /// WAV file replay
    File(PathBuf),
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create audio backend for a source
    pub fn create(
        source: AudioSource,
        config: AudioBackendConfig,
    ) -> Result<Box<dyn AudioBackend>> {
        match source {
            AudioSource::Tone {
                frequency_hz,
                amplitude,
            } => {
                let backend = super::tone::ToneBackend::new(config, frequency_hz, amplitude)?;
                Ok(Box::new(backend))
            }

            AudioSource::File(path) => {
                let backend = super::file::FileBackend::open(config, &path)?;
                Ok(Box::new(backend))
            }
        }
    }
}
