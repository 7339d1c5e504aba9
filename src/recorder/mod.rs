//! Capture session module
//!
//! - CaptureController: the single-session state machine over a capture backend
//! - State types: capture state, session record, artifact naming fallback

pub mod controller;
pub mod state;

pub use controller::{CaptureController, CaptureError, CaptureResult};
pub use state::{ArtifactNaming, CaptureSession, CaptureState};
