pub mod audio;
pub mod config;
pub mod error;
pub mod recorder;

pub use audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFile, AudioFrame, AudioSource,
    PcmFormat,
};
pub use config::Config;
pub use error::{RecorderError, RecorderResult};
pub use recorder::{
    frame_callback, pump_frames, AudioSink, FeedOutcome, PumpStats, Recorder, RecorderConfig,
    RecorderState, RecorderStatus, RecordingSummary,
};
