//! Error types for the audio link

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio device errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Capture device unavailable: {0}")]
    PermissionDenied(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Advisory only; logged by the buffer governor after it has cleared
    #[error("Buffer overflow: {attempted} bytes exceeds ceiling of {max}")]
    BufferOverflow { attempted: usize, max: usize },
}

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Decode failed: {0}")]
    DecodeFailure(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),
}

/// Network errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Connection timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Channel is not open")]
    NotOpen,

    #[error("Outbound queue full")]
    QueueFull,
}

/// Playback engine errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("{backend} backend failed to initialize: {reason}")]
    BackendInitFailure {
        backend: &'static str,
        reason: String,
    },

    #[error("Playback engine is closed")]
    Closed,

    #[error("Playback engine is not ready")]
    NotReady,
}

/// Session lifecycle errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("A session is already running")]
    AlreadyRunning,
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
