//! Recorder error types

use std::path::PathBuf;

use thiserror::Error;

use crate::recorder::RecorderState;

/// Errors returned by the recorder control plane
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Cannot {operation} while recorder is {state}")]
    InvalidState {
        operation: &'static str,
        state: RecorderState,
    },

    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Storage not mounted: {}", .0.display())]
    NotMounted(PathBuf),
}

impl RecorderError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

pub type RecorderResult<T> = std::result::Result<T, RecorderError>;
