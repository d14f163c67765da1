pub mod backend;
pub mod file;
pub mod tone;
pub mod wav;

pub use backend::{AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource};
pub use file::{AudioFile, FileBackend};
pub use tone::ToneBackend;
pub use wav::PcmFormat;
