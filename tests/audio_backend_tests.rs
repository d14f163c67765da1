// Tests for the audio source abstractions
//
// The tone backend stands in for a capture device, so these tests check
// frame shape, pacing and shutdown the way a recorder would consume them.

use anyhow::Result;
use loqa_recorder::audio::{AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource};
use std::time::Duration;
use tokio::time::timeout;

fn tone() -> AudioSource {
    AudioSource::Tone {
        frequency_hz: 440.0,
        amplitude: 0.5,
    }
}

#[test]
fn test_audio_frame_le_bytes() {
    let frame = AudioFrame {
        samples: vec![1, -1, 0x1234],
        sample_rate: 16000,
        channels: 1,
        timestamp_ms: 0,
    };

    assert_eq!(frame.to_le_bytes(), vec![0x01, 0x00, 0xFF, 0xFF, 0x34, 0x12]);
}

#[test]
fn test_audio_frame_duration() {
    // 20ms of 24kHz stereo: 480 frames, 960 interleaved samples
    let frame = AudioFrame {
        samples: vec![0i16; 960],
        sample_rate: 24000,
        channels: 2,
        timestamp_ms: 0,
    };
    assert_eq!(frame.duration_ms(), 20);

    let empty = AudioFrame {
        samples: vec![],
        sample_rate: 0,
        channels: 0,
        timestamp_ms: 0,
    };
    assert_eq!(empty.duration_ms(), 0);
}

#[test]
fn test_audio_backend_config_default() {
    let config = AudioBackendConfig::default();

    assert_eq!(config.target_sample_rate, 24000, "Default should match the recorder");
    assert_eq!(config.target_channels, 2, "Default should be stereo");
    assert_eq!(config.buffer_duration_ms, 20, "Default buffer should be 20ms");
    assert_eq!(config.samples_per_buffer(), 960);
}

#[test]
fn test_factory_rejects_bad_tone() {
    let result = AudioBackendFactory::create(
        AudioSource::Tone {
            frequency_hz: 440.0,
            amplitude: 1.5,
        },
        AudioBackendConfig::default(),
    );
    assert!(result.is_err(), "Amplitude above 1.0 should be rejected");

    let result = AudioBackendFactory::create(
        tone(),
        AudioBackendConfig {
            target_sample_rate: 24000,
            target_channels: 2,
            buffer_duration_ms: 0,
        },
    );
    assert!(result.is_err(), "Empty buffers should be rejected");
}

#[tokio::test]
async fn test_tone_backend_produces_frames() -> Result<()> {
    let config = AudioBackendConfig {
        target_sample_rate: 16000,
        target_channels: 1,
        buffer_duration_ms: 10,
    };
    let mut backend = AudioBackendFactory::create(tone(), config)?;
    assert_eq!(backend.name(), "tone");
    assert!(!backend.is_capturing());

    let mut rx = backend.start().await?;
    assert!(backend.is_capturing());

    let mut frames = Vec::new();
    for _ in 0..3 {
        let frame = timeout(Duration::from_secs(2), rx.recv())
            .await?
            .expect("tone should keep producing");
        frames.push(frame);
    }

    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.sample_rate, 16000);
        assert_eq!(frame.channels, 1);
        assert_eq!(frame.samples.len(), 160);
        assert_eq!(frame.timestamp_ms, i as u64 * 10);
    }

    // Half-scale tone peaks near 16383
    let peak = frames
        .iter()
        .flat_map(|f| f.samples.iter())
        .map(|s| s.unsigned_abs())
        .max()
        .unwrap_or(0);
    assert!(peak > 10_000 && peak <= 16_384, "Unexpected peak {}", peak);

    backend.stop().await?;
    assert!(!backend.is_capturing());

    // Channel closes once the generator exits
    while timeout(Duration::from_secs(2), rx.recv()).await?.is_some() {}

    Ok(())
}

#[tokio::test]
async fn test_tone_backend_stereo_is_interleaved() -> Result<()> {
    let mut backend = AudioBackendFactory::create(tone(), AudioBackendConfig::default())?;
    let mut rx = backend.start().await?;

    let frame = timeout(Duration::from_secs(2), rx.recv())
        .await?
        .expect("frame");
    assert_eq!(frame.samples.len(), 960);
    for pair in frame.samples.chunks(2) {
        assert_eq!(pair[0], pair[1], "Both channels carry the same tone");
    }

    backend.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_tone_backend_cannot_start_twice() -> Result<()> {
    let mut backend = AudioBackendFactory::create(tone(), AudioBackendConfig::default())?;
    let _rx = backend.start().await?;

    assert!(backend.start().await.is_err());

    backend.stop().await?;
    Ok(())
}
