// Synthetic sine-wave backend
//
// Stands in for a capture device: emits one buffer every
// `buffer_duration_ms`, so consumers see the same pacing as a real-time
// audio callback.

use anyhow::{bail, Result};
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};

pub struct ToneBackend {
    config: AudioBackendConfig,
    frequency_hz: f32,
    amplitude: f32,
    capturing: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl ToneBackend {
    pub fn new(config: AudioBackendConfig, frequency_hz: f32, amplitude: f32) -> Result<Self> {
        if config.samples_per_buffer() == 0 {
            bail!(
                "Buffer of {}ms at {}Hz holds no samples",
                config.buffer_duration_ms,
                config.target_sample_rate
            );
        }
        if !(0.0..=1.0).contains(&amplitude) {
            bail!("Amplitude must be between 0.0 and 1.0, got {}", amplitude);
        }

        info!(
            "Tone backend initialized ({:.0}Hz tone, {}Hz, {} channels)",
            frequency_hz, config.target_sample_rate, config.target_channels
        );

        Ok(Self {
            config,
            frequency_hz,
            amplitude,
            capturing: Arc::new(AtomicBool::new(false)),
            task: None,
        })
    }
}

/// Generates consecutive buffers of an interleaved sine wave
struct ToneGenerator {
    phase: f32,
    step: f32,
    peak: f32,
    channels: usize,
}

impl ToneGenerator {
    fn new(frequency_hz: f32, amplitude: f32, sample_rate: u32, channels: u16) -> Self {
        Self {
            phase: 0.0,
            step: TAU * frequency_hz / sample_rate as f32,
            peak: amplitude * i16::MAX as f32,
            channels: channels as usize,
        }
    }

    fn next_buffer(&mut self, samples: usize) -> Vec<i16> {
        let mut buffer = Vec::with_capacity(samples);
        for _ in 0..samples / self.channels {
            let value = (self.phase.sin() * self.peak) as i16;
            buffer.extend(std::iter::repeat(value).take(self.channels));
            self.phase = (self.phase + self.step) % TAU;
        }
        buffer
    }
}

#[async_trait::async_trait]
impl AudioBackend for ToneBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.capturing.load(Ordering::SeqCst) {
            bail!("Already capturing");
        }

        let (tx, rx) = mpsc::channel(32);
        let config = self.config.clone();
        let capturing = Arc::clone(&self.capturing);
        let mut generator = ToneGenerator::new(
            self.frequency_hz,
            self.amplitude,
            config.target_sample_rate,
            config.target_channels,
        );

        capturing.store(true, Ordering::SeqCst);

        let task = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(config.buffer_duration_ms));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
            let mut timestamp_ms = 0u64;

            while capturing.load(Ordering::SeqCst) {
                ticker.tick().await;

                let frame = AudioFrame {
                    samples: generator.next_buffer(config.samples_per_buffer()),
                    sample_rate: config.target_sample_rate,
                    channels: config.target_channels,
                    timestamp_ms,
                };
                timestamp_ms += config.buffer_duration_ms;

                if tx.send(frame).await.is_err() {
                    break;
                }
            }

            capturing.store(false, Ordering::SeqCst);
        });

        self.task = Some(task);
        info!("Tone capture started");

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.capturing.store(false, Ordering::SeqCst);

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Tone task panicked: {}", e);
            }
        }

        info!("Tone capture stopped");
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "tone"
    }
}
