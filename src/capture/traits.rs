//! Capture trait definitions
//!
//! Backend-agnostic boundary to the application that does the actual screen
//! recording. The session controller only talks to this trait.

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by a capture backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureBackendError {
    /// Connection refused, handshake failure, or timeout
    #[error("capture application unreachable: {0}")]
    Unreachable(String),

    /// The connection dropped while a request was in flight
    #[error("capture application disconnected: {0}")]
    Disconnected(String),

    #[error("capture application is already recording")]
    AlreadyRecording,

    #[error("capture application is not recording")]
    NotRecording,

    /// Any other failure status returned by the application
    #[error("capture request rejected (code {code}): {comment}")]
    Rejected { code: u16, comment: String },

    /// The application answered with something we could not understand
    #[error("malformed response from capture application: {0}")]
    Protocol(String),
}

/// Result of a stop request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoppedRecording {
    /// Output file reported by the application, if any
    pub output_path: Option<PathBuf>,
}

/// Remote control of a recording application
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Short identifier used in logs
    fn id(&self) -> &str;

    /// Ask the application to start recording
    async fn start_recording(&self) -> Result<(), CaptureBackendError>;

    /// Ask the application to stop recording
    async fn stop_recording(&self) -> Result<StoppedRecording, CaptureBackendError>;

    /// Whether the application currently reports an active recording
    async fn is_recording(&self) -> Result<bool, CaptureBackendError>;

    /// Release the connection, stopping any recording we left running
    async fn shutdown(&self) {}
}
