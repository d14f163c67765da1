use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Recorder lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderState {
    /// No open file; ready to start
    Idle,
    /// Writer active, accepting audio
    Recording,
    /// Writer being torn down
    Stopping,
    /// Unrecoverable storage failure; needs deinit + init
    Error,
}

impl RecorderState {
    fn as_u8(self) -> u8 {
        match self {
            RecorderState::Idle => 0,
            RecorderState::Recording => 1,
            RecorderState::Stopping => 2,
            RecorderState::Error => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => RecorderState::Idle,
            1 => RecorderState::Recording,
            2 => RecorderState::Stopping,
            _ => RecorderState::Error,
        }
    }
}

impl fmt::Display for RecorderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecorderState::Idle => "idle",
            RecorderState::Recording => "recording",
            RecorderState::Stopping => "stopping",
            RecorderState::Error => "error",
        };
        f.write_str(name)
    }
}

/// State cell readable from any thread without taking the state lock
pub(crate) struct AtomicState(AtomicU8);

impl AtomicState {
    pub(crate) fn new(state: RecorderState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    pub(crate) fn get(&self) -> RecorderState {
        RecorderState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: RecorderState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }

    /// Move `from -> to`; returns false if the state was not `from`
    pub(crate) fn transition(&self, from: RecorderState, to: RecorderState) -> bool {
        self.0
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Per-session counters, shared between producer, writer and readers
#[derive(Default)]
pub(crate) struct SessionCounters {
    pub(crate) data_size: AtomicU64,
    pub(crate) bytes_written: AtomicU64,
    /// Bytes admitted into the queue this session
    pub(crate) accepted: AtomicU64,
    pub(crate) dropped_chunks: AtomicU64,
    pub(crate) dropped_bytes: AtomicU64,
    pub(crate) write_errors: AtomicU64,
    pub(crate) header_patches: AtomicU64,
}

impl SessionCounters {
    /// Zero everything for a new file whose header is `header_len` bytes
    pub(crate) fn begin_session(&self, header_len: u64) {
        for counter in [
            &self.data_size,
            &self.bytes_written,
            &self.accepted,
            &self.dropped_chunks,
            &self.dropped_bytes,
            &self.write_errors,
            &self.header_patches,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
        self.bytes_written.store(header_len, Ordering::SeqCst);
    }
}

/// Point-in-time view of the recorder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderStatus {
    pub state: RecorderState,

    /// Current file, or the last one after a session ended
    pub filename: Option<PathBuf>,

    /// Bytes in the file including the 44-byte header
    pub bytes_written: u64,

    /// PCM payload bytes
    pub data_size: u64,

    /// Bytes waiting in the queue
    pub queued_bytes: usize,

    pub dropped_chunks: u64,
    pub dropped_bytes: u64,
    pub write_errors: u64,
    pub header_patches: u64,

    pub started_at: Option<DateTime<Utc>>,
}

/// Result of a finished recording
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingSummary {
    pub filename: PathBuf,
    pub data_size: u64,
    pub bytes_written: u64,
    pub duration_secs: f64,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    pub dropped_bytes: u64,
    pub write_errors: u64,
}

/// What happened to one `feed_audio` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Bytes queued for writing
    Accepted,
    /// Queue stayed full for the push timeout; bytes discarded
    Dropped,
    /// Recorder not recording; nothing done
    Ignored,
    /// The size cap ended the session. `accepted` tells whether these bytes
    /// made it into the file before it was finalized.
    LimitReached { accepted: bool },
}
