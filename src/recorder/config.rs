use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::wav::{PcmFormat, MAX_DATA_SIZE};
use crate::error::{RecorderError, RecorderResult};

/// Recorder configuration, fixed for the lifetime of a recorder handle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Mounted, writable directory that receives `rec_N.wav` files
    pub output_directory: PathBuf,

    /// Cap on the `data` payload of one recording (0 = unlimited)
    pub max_file_size_bytes: u64,

    /// Capacity of the queue between producer and writer.
    /// Should be several audio callbacks' worth to absorb scheduling jitter.
    pub queue_capacity_bytes: usize,

    /// Payload growth between header patches.
    /// Bounds how much audio a power cut can leave unaccounted for.
    pub header_patch_interval_bytes: u64,

    /// How long `feed_audio` may wait for queue space before dropping
    pub push_timeout_ms: u64,

    /// Writer pop timeout; bounds how quickly the writer notices a stop
    pub pop_timeout_ms: u64,

    /// How long `stop` waits for the writer to exit before finalizing anyway
    pub stop_grace_ms: u64,

    /// Consecutive failed writes before the session is marked as errored
    pub max_consecutive_write_errors: u32,

    /// PCM format written to the header; producers must match it
    pub format: PcmFormat,

    /// Start recording as soon as the recorder is initialized
    pub auto_start: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_directory: PathBuf::from("recordings"),
            max_file_size_bytes: 50 * 1024 * 1024,
            queue_capacity_bytes: 16 * 4096,
            header_patch_interval_bytes: 32 * 1024,
            push_timeout_ms: 10,
            pop_timeout_ms: 10,
            stop_grace_ms: 500,
            max_consecutive_write_errors: 3,
            format: PcmFormat::default(),
            auto_start: false,
        }
    }
}

impl RecorderConfig {
    pub fn new(output_directory: impl Into<PathBuf>) -> Self {
        Self {
            output_directory: output_directory.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> RecorderResult<()> {
        if self.output_directory.as_os_str().is_empty() {
            return Err(RecorderError::InvalidArgument(
                "output directory must not be empty".to_string(),
            ));
        }
        if self.queue_capacity_bytes == 0 {
            return Err(RecorderError::InvalidArgument(
                "queue capacity must be non-zero".to_string(),
            ));
        }
        if self.header_patch_interval_bytes == 0 {
            return Err(RecorderError::InvalidArgument(
                "header patch interval must be non-zero".to_string(),
            ));
        }
        if self.max_consecutive_write_errors == 0 {
            return Err(RecorderError::InvalidArgument(
                "max consecutive write errors must be non-zero".to_string(),
            ));
        }
        self.format
            .validate()
            .map_err(|reason| RecorderError::InvalidArgument(format!("format: {}", reason)))
    }

    /// Payload limit actually enforced, including the WAV format limit
    pub fn effective_max_data_size(&self) -> u64 {
        match self.max_file_size_bytes {
            0 => MAX_DATA_SIZE,
            cap => cap.min(MAX_DATA_SIZE),
        }
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }

    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}
