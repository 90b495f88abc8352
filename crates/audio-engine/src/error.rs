//! Error types for audio-engine.

use thiserror::Error;

/// Failures reported by a decode backend.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not determine type of stream: {0}")]
    Unrecognized(String),

    #[error("no audio stream matching sink caps: {0}")]
    NoAudioStream(String),

    #[error("failed to create decoder: {0}")]
    Decoder(String),

    #[error("discovery timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("discovery failed: {0}")]
    Discovery(String),
}

/// Error type for audio-engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("audio subsystem is not initialized")]
    NotInitialized,

    #[error("duration unavailable for {uri} after {attempts} attempts")]
    DurationUnavailable { uri: String, attempts: u32 },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("failed to open output device: {0}")]
    DeviceOpen(String),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
