//! Capture module
//!
//! The recording itself happens in an external application; this module
//! holds the boundary trait and the OBS WebSocket implementation.

pub mod obs;
pub mod traits;

pub use obs::ObsClient;
pub use traits::{CaptureBackend, CaptureBackendError, StoppedRecording};
