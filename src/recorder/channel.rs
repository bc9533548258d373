//! Recording channel trait
//!
//! Defines the interface shared by the recording channels (screen capture
//! process, input tracking) and the error taxonomy for a recording session.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during recording
///
/// Every variant is fatal to the session it was raised in.
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Capture process did not confirm start within {0:?}")]
    CaptureStartTimeout(Duration),

    #[error("Capture process crashed: {0}")]
    CaptureProcessCrashed(String),

    #[error("Input listener failed to attach: {0}")]
    ListenerAttachFailed(String),

    #[error("Failed to write action log to {path:?}: {source}")]
    PersistenceWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid session state: {0}")]
    InvalidSessionState(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

/// Result type for recording operations
pub type RecordingResult<T> = Result<T, RecordingError>;

/// Trait for recording channels
///
/// Each channel owns one long-lived worker of a session (the capture-monitor
/// thread or the input-listener attachment). Channels are driven by the
/// [`Recorder`](crate::recorder::Recorder) in a fixed order.
#[async_trait]
pub trait RecordingChannel: Send + Sync {
    /// Get the channel identifier (e.g., "capture", "input")
    fn id(&self) -> &str;

    /// Get the channel type
    fn channel_type(&self) -> ChannelType;

    /// Start recording
    async fn start(&mut self) -> RecordingResult<()>;

    /// Stop recording. Stopping a channel that is not recording is a no-op.
    async fn stop(&mut self) -> RecordingResult<()>;

    /// Check if the channel is currently recording
    fn is_recording(&self) -> bool;

    /// Get output files created by this channel
    fn output_files(&self) -> Vec<String>;
}

/// Types of recording channels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    /// External screen capture process
    Capture,
    /// Input tracking (mouse, keyboard)
    Input,
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelType::Capture => write!(f, "capture"),
            ChannelType::Input => write!(f, "input"),
        }
    }
}
