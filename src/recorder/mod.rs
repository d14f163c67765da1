//! Continuous audio-to-storage recorder
//!
//! This module provides the `Recorder` handle that manages:
//! - A bounded byte queue between the real-time producer and disk
//! - A writer thread that appends PCM and periodically patches the WAV header
//! - The IDLE → RECORDING → STOPPING → IDLE (or ERROR) lifecycle
//! - Collision-free `rec_N.wav` file naming

mod config;
mod filename;
mod handle;
mod queue;
mod sink;
mod state;
mod writer;

pub use config::RecorderConfig;
pub use filename::FilenameAllocator;
pub use handle::Recorder;
pub use queue::ByteQueue;
pub use sink::{frame_callback, pump_frames, AudioSink, PumpStats};
pub use state::{FeedOutcome, RecorderState, RecorderStatus, RecordingSummary};
