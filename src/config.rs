use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::audio::{AudioBackendConfig, AudioSource, PcmFormat};
use crate::recorder::RecorderConfig;

/// Environment variables override file settings, e.g.
/// `LOQA_RECORDER__RECORDER__MAX_FILE_SIZE_BYTES=1048576`
pub const ENV_PREFIX: &str = "LOQA_RECORDER";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub logging: LoggingConfig,
    pub recorder: RecorderConfig,
    pub source: SourceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "loqa-recorder".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Tone,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub frequency_hz: f32,
    pub amplitude: f32,
    /// WAV to replay when `kind = "file"`
    pub input: Option<PathBuf>,
    pub buffer_duration_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Tone,
            frequency_hz: 440.0,
            amplitude: 0.25,
            input: None,
            buffer_duration_ms: 20,
        }
    }
}

impl SourceConfig {
    pub fn audio_source(&self) -> Result<AudioSource> {
        match self.kind {
            SourceKind::Tone => Ok(AudioSource::Tone {
                frequency_hz: self.frequency_hz,
                amplitude: self.amplitude,
            }),
            SourceKind::File => match &self.input {
                Some(path) => Ok(AudioSource::File(expand_path(path)?)),
                None => bail!("source.kind is \"file\" but source.input is not set"),
            },
        }
    }

    /// Backend settings producing frames in the recorder's format
    pub fn backend_config(&self, format: &PcmFormat) -> AudioBackendConfig {
        AudioBackendConfig {
            target_sample_rate: format.sample_rate,
            target_channels: format.channels,
            buffer_duration_ms: self.buffer_duration_ms,
        }
    }
}

impl Config {
    /// Load `path` (extension optional, file optional) layered with environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to load config from {}", path))?;

        let mut cfg: Config = settings
            .try_deserialize()
            .context("Invalid configuration")?;

        cfg.recorder.output_directory = expand_path(&cfg.recorder.output_directory)?;

        Ok(cfg)
    }
}

/// Expand `~` and `$VAR` in a configured path
pub fn expand_path(path: &std::path::Path) -> Result<PathBuf> {
    let raw = path
        .to_str()
        .with_context(|| format!("Path is not valid UTF-8: {}", path.display()))?;
    let expanded = shellexpand::full(raw)
        .with_context(|| format!("Failed to expand path: {}", raw))?;
    Ok(PathBuf::from(expanded.as_ref()))
}
