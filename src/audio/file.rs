use anyhow::{bail, Context, Result};
use hound::WavReader;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path)
            .with_context(|| format!("Failed to open WAV file: {}", path.display()))?;

        let spec = reader.spec();
        if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
            bail!(
                "Only 16-bit integer PCM is supported, got {}-bit {:?}",
                spec.bits_per_sample,
                spec.sample_format
            );
        }

        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        let duration_seconds = samples.len() as f64 /
            (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            bits_per_sample: spec.bits_per_sample,
            samples,
        })
    }

    /// PCM payload size in bytes
    pub fn data_size(&self) -> u64 {
        self.samples.len() as u64 * 2
    }
}

/// Replays a WAV file in real time, one buffer per `buffer_duration_ms`
pub struct FileBackend {
    config: AudioBackendConfig,
    audio: Arc<AudioFile>,
    capturing: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl FileBackend {
    pub fn open(config: AudioBackendConfig, path: impl AsRef<Path>) -> Result<Self> {
        let audio = AudioFile::open(path)?;

        // No resampling: replay only what the consumer can take as-is
        if audio.sample_rate != config.target_sample_rate || audio.channels != config.target_channels {
            bail!(
                "Resampling not supported. Expected {}Hz {}ch, got {}Hz {}ch",
                config.target_sample_rate,
                config.target_channels,
                audio.sample_rate,
                audio.channels
            );
        }
        if config.samples_per_buffer() == 0 {
            bail!("Buffer of {}ms holds no samples", config.buffer_duration_ms);
        }

        Ok(Self {
            config,
            audio: Arc::new(audio),
            capturing: Arc::new(AtomicBool::new(false)),
            task: None,
        })
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.capturing.load(Ordering::SeqCst) {
            bail!("Already capturing");
        }

        let (tx, rx) = mpsc::channel(32);
        let config = self.config.clone();
        let audio = Arc::clone(&self.audio);
        let capturing = Arc::clone(&self.capturing);

        capturing.store(true, Ordering::SeqCst);
        info!("Replaying {} ({:.1}s)", audio.path, audio.duration_seconds);

        let task = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(config.buffer_duration_ms));
            let mut timestamp_ms = 0u64;

            for chunk in audio.samples.chunks(config.samples_per_buffer()) {
                if !capturing.load(Ordering::SeqCst) {
                    break;
                }
                ticker.tick().await;

                let frame = AudioFrame {
                    samples: chunk.to_vec(),
                    sample_rate: config.target_sample_rate,
                    channels: config.target_channels,
                    timestamp_ms,
                };
                timestamp_ms += frame.duration_ms();

                if tx.send(frame).await.is_err() {
                    break;
                }
            }

            capturing.store(false, Ordering::SeqCst);
            info!("File replay finished");
        });

        self.task = Some(task);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.capturing.store(false, Ordering::SeqCst);

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("File replay task panicked: {}", e);
            }
        }

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "file"
    }
}
