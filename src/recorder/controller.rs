//! Capture session controller
//!
//! Wraps a [`CaptureBackend`] behind the `Idle -> Starting -> Active ->
//! Stopping -> Idle` state machine. At most one session exists at a time; the
//! state transition out of `Idle` is taken under a lock before any await, so
//! concurrent `start` calls cannot both succeed.

use super::state::{ArtifactNaming, CaptureSession, CaptureState};
use crate::capture::{CaptureBackend, CaptureBackendError};
use crate::compress::MediaArtifact;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Capture session errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("capture start failed: {0}")]
    StartFailed(String),

    #[error("a capture session is already {0:?}")]
    AlreadyActive(CaptureState),

    #[error("no active capture session (state {0:?})")]
    NotActive(CaptureState),

    #[error("capture disconnected: {0}")]
    Disconnected(String),

    #[error("recording artifact missing: {0}")]
    ArtifactMissing(String),

    #[error("recording artifact is empty: {}", .0.display())]
    EmptyArtifact(PathBuf),
}

pub type CaptureResult<T> = Result<T, CaptureError>;

/// Drives one capture session at a time against a backend
pub struct CaptureController {
    backend: Arc<dyn CaptureBackend>,
    naming: ArtifactNaming,
    state: Arc<RwLock<CaptureState>>,
    session: RwLock<Option<CaptureSession>>,
    /// How long to wait for the application to confirm a start
    ack_timeout: Duration,
    ack_poll_interval: Duration,
}

impl CaptureController {
    pub fn new(backend: Arc<dyn CaptureBackend>, naming: ArtifactNaming) -> Self {
        Self {
            backend,
            naming,
            state: Arc::new(RwLock::new(CaptureState::Idle)),
            session: RwLock::new(None),
            ack_timeout: Duration::from_secs(5),
            ack_poll_interval: Duration::from_millis(250),
        }
    }

    /// Override the start acknowledgement timeout
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Get the current capture state
    pub fn state(&self) -> CaptureState {
        *self.state.read()
    }

    /// The in-flight session, if any
    pub fn session(&self) -> Option<CaptureSession> {
        self.session.read().clone()
    }

    /// Start a capture expected to last `duration`
    pub async fn start(&self, duration: Duration) -> CaptureResult<CaptureSession> {
        {
            let mut state = self.state.write();
            if *state != CaptureState::Idle {
                return Err(CaptureError::AlreadyActive(*state));
            }
            *state = CaptureState::Starting;
        }

        tracing::info!("Starting capture via {}", self.backend.id());

        match self.start_inner(duration).await {
            Ok(session) => {
                *self.session.write() = Some(session.clone());
                *self.state.write() = CaptureState::Active;
                tracing::info!("Capture {} active until {}", session.id, session.expected_stop_at);
                Ok(session)
            }
            Err(e) => {
                *self.state.write() = CaptureState::Idle;
                tracing::warn!("Capture start failed: {}", e);
                Err(e)
            }
        }
    }

    async fn start_inner(&self, duration: Duration) -> CaptureResult<CaptureSession> {
        // Stamped before the request; the application names its file no earlier
        let session = CaptureSession::new(duration);
        self.backend
            .start_recording()
            .await
            .map_err(|e| CaptureError::StartFailed(e.to_string()))?;

        let deadline = Instant::now() + self.ack_timeout;
        loop {
            match self.backend.is_recording().await {
                Ok(true) => return Ok(session),
                Ok(false) if Instant::now() < deadline => {
                    tokio::time::sleep(self.ack_poll_interval).await;
                }
                Ok(false) => {
                    // Don't leave a late-starting recording behind
                    let _ = self.backend.stop_recording().await;
                    return Err(CaptureError::StartFailed(format!(
                        "recording not confirmed within {:?}",
                        self.ack_timeout
                    )));
                }
                Err(e) => return Err(CaptureError::StartFailed(e.to_string())),
            }
        }
    }

    /// Stop the active capture and resolve its artifact
    pub async fn stop(&self) -> CaptureResult<MediaArtifact> {
        {
            let mut state = self.state.write();
            if *state != CaptureState::Active {
                return Err(CaptureError::NotActive(*state));
            }
            *state = CaptureState::Stopping;
        }

        let session = self.session.write().take();
        let result = self.stop_inner(session).await;
        *self.state.write() = CaptureState::Idle;

        match &result {
            Ok(artifact) => tracing::info!(
                "Capture stopped: {:?} ({:.2} MB)",
                artifact.path,
                artifact.size_mb()
            ),
            Err(e) => tracing::warn!("Capture stop failed: {}", e),
        }
        result
    }

    async fn stop_inner(&self, session: Option<CaptureSession>) -> CaptureResult<MediaArtifact> {
        let stopped = self.backend.stop_recording().await.map_err(|e| match e {
            CaptureBackendError::NotRecording => {
                CaptureError::Disconnected("recording ended before stop".to_string())
            }
            other => CaptureError::Disconnected(other.to_string()),
        })?;

        let path = match stopped.output_path {
            Some(path) => path,
            None => self.fallback_path(session).await?,
        };

        let artifact = MediaArtifact::from_path(&path)
            .await
            .map_err(|e| CaptureError::ArtifactMissing(format!("{}: {}", path.display(), e)))?;

        if artifact.size_bytes == 0 {
            return Err(CaptureError::EmptyArtifact(path));
        }
        Ok(artifact)
    }

    /// First existing file among the names derived from the session start,
    /// or the most likely name when none exists yet
    async fn fallback_path(&self, session: Option<CaptureSession>) -> CaptureResult<PathBuf> {
        let candidates = session
            .map(|s| self.naming.candidates(s.started_at))
            .unwrap_or_default();
        for candidate in &candidates {
            if tokio::fs::try_exists(candidate).await.unwrap_or(false) {
                return Ok(candidate.clone());
            }
        }
        candidates.into_iter().next().ok_or_else(|| {
            CaptureError::ArtifactMissing(
                "no output path reported and no recording directory configured".to_string(),
            )
        })
    }

    /// Confirm the active capture is still recording. Any failure drops the
    /// session and returns to `Idle`.
    pub async fn check_alive(&self) -> CaptureResult<()> {
        let current = self.state();
        if current != CaptureState::Active {
            return Err(CaptureError::NotActive(current));
        }

        let reason = match self.backend.is_recording().await {
            Ok(true) => return Ok(()),
            Ok(false) => "recording stopped unexpectedly".to_string(),
            Err(e) => e.to_string(),
        };

        tracing::warn!("Capture lost: {}", reason);
        self.session.write().take();
        *self.state.write() = CaptureState::Idle;
        Err(CaptureError::Disconnected(reason))
    }

    /// Stop the active recording without resolving an artifact
    pub async fn abandon(&self) {
        let was_active = {
            let mut state = self.state.write();
            let active = *state == CaptureState::Active;
            if active {
                *state = CaptureState::Stopping;
            }
            active
        };
        if !was_active {
            return;
        }

        self.session.write().take();
        match self.backend.stop_recording().await {
            Ok(stopped) => tracing::info!("Capture abandoned, left {:?}", stopped.output_path),
            Err(e) => tracing::warn!("Failed to stop abandoned capture: {}", e),
        }
        *self.state.write() = CaptureState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::StoppedRecording;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakeBackend {
        recording: Mutex<bool>,
        start_error: Option<CaptureBackendError>,
        output_path: Option<PathBuf>,
        never_confirms: bool,
        start_calls: Mutex<u32>,
    }

    #[async_trait]
    impl CaptureBackend for FakeBackend {
        fn id(&self) -> &str {
            "fake"
        }

        async fn start_recording(&self) -> Result<(), CaptureBackendError> {
            *self.start_calls.lock() += 1;
            tokio::time::sleep(Duration::from_millis(10)).await;
            if let Some(e) = &self.start_error {
                return Err(e.clone());
            }
            if !self.never_confirms {
                *self.recording.lock() = true;
            }
            Ok(())
        }

        async fn stop_recording(&self) -> Result<StoppedRecording, CaptureBackendError> {
            let mut recording = self.recording.lock();
            if !*recording {
                return Err(CaptureBackendError::NotRecording);
            }
            *recording = false;
            Ok(StoppedRecording {
                output_path: self.output_path.clone(),
            })
        }

        async fn is_recording(&self) -> Result<bool, CaptureBackendError> {
            Ok(*self.recording.lock())
        }
    }

    fn write_file(dir: &std::path::Path, name: &str, len: usize) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, vec![1u8; len]).unwrap();
        path
    }

    #[tokio::test]
    async fn test_start_stop_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "rec.mkv", 4096);
        let backend = Arc::new(FakeBackend {
            output_path: Some(path.clone()),
            ..Default::default()
        });
        let controller = CaptureController::new(backend, ArtifactNaming::default());

        controller.start(Duration::from_secs(10)).await.unwrap();
        assert_eq!(controller.state(), CaptureState::Active);
        assert!(controller.session().is_some());

        let artifact = controller.stop().await.unwrap();
        assert_eq!(artifact.path, path);
        assert_eq!(artifact.size_bytes, 4096);
        assert_eq!(controller.state(), CaptureState::Idle);
        assert!(controller.session().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_returns_to_idle() {
        let backend = Arc::new(FakeBackend {
            start_error: Some(CaptureBackendError::Unreachable("connection refused".into())),
            ..Default::default()
        });
        let controller = CaptureController::new(backend, ArtifactNaming::default());

        let err = controller.start(Duration::from_secs(10)).await.unwrap_err();
        assert!(matches!(err, CaptureError::StartFailed(ref m) if m.contains("unreachable")));
        assert_eq!(controller.state(), CaptureState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_start_times_out() {
        let backend = Arc::new(FakeBackend {
            never_confirms: true,
            ..Default::default()
        });
        let controller = CaptureController::new(backend, ArtifactNaming::default())
            .with_ack_timeout(Duration::from_secs(1));

        let err = controller.start(Duration::from_secs(10)).await.unwrap_err();
        assert!(matches!(err, CaptureError::StartFailed(_)));
        assert_eq!(controller.state(), CaptureState::Idle);
    }

    #[tokio::test]
    async fn test_concurrent_starts_admit_one_session() {
        let backend = Arc::new(FakeBackend::default());
        let controller = Arc::new(CaptureController::new(
            backend.clone(),
            ArtifactNaming::default(),
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let controller = controller.clone();
                tokio::spawn(async move { controller.start(Duration::from_secs(5)).await })
            })
            .collect();

        let mut ok = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(e) => assert!(matches!(e, CaptureError::AlreadyActive(_))),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(*backend.start_calls.lock(), 1);
        assert_eq!(controller.state(), CaptureState::Active);
    }

    #[tokio::test]
    async fn test_stop_without_session() {
        let controller =
            CaptureController::new(Arc::new(FakeBackend::default()), ArtifactNaming::default());
        assert_eq!(
            controller.stop().await.unwrap_err(),
            CaptureError::NotActive(CaptureState::Idle)
        );
    }

    #[tokio::test]
    async fn test_empty_artifact_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "rec.mkv", 0);
        let backend = Arc::new(FakeBackend {
            output_path: Some(path.clone()),
            ..Default::default()
        });
        let controller = CaptureController::new(backend, ArtifactNaming::default());

        controller.start(Duration::from_secs(1)).await.unwrap();
        assert_eq!(controller.stop().await.unwrap_err(), CaptureError::EmptyArtifact(path));
        assert_eq!(controller.state(), CaptureState::Idle);
    }

    #[tokio::test]
    async fn test_missing_path_without_naming() {
        let controller =
            CaptureController::new(Arc::new(FakeBackend::default()), ArtifactNaming::default());

        controller.start(Duration::from_secs(1)).await.unwrap();
        assert!(matches!(
            controller.stop().await.unwrap_err(),
            CaptureError::ArtifactMissing(_)
        ));
    }

    #[tokio::test]
    async fn test_naming_fallback_points_at_recording_dir() {
        let dir = tempfile::tempdir().unwrap();
        let naming = ArtifactNaming {
            recording_dir: Some(dir.path().to_path_buf()),
            extension: "mkv".to_string(),
        };
        let controller = CaptureController::new(Arc::new(FakeBackend::default()), naming.clone());

        let session = controller.start(Duration::from_secs(1)).await.unwrap();
        let expected = naming.resolve(session.started_at).unwrap();
        std::fs::write(&expected, b"data").unwrap();

        let artifact = controller.stop().await.unwrap();
        assert_eq!(artifact.path, expected);
    }

    #[tokio::test]
    async fn test_naming_fallback_tolerates_late_stamp() {
        let dir = tempfile::tempdir().unwrap();
        let naming = ArtifactNaming {
            recording_dir: Some(dir.path().to_path_buf()),
            extension: "mkv".to_string(),
        };
        let controller = CaptureController::new(Arc::new(FakeBackend::default()), naming.clone());

        let session = controller.start(Duration::from_secs(1)).await.unwrap();
        let late = naming
            .resolve(session.started_at + chrono::Duration::seconds(1))
            .unwrap();
        std::fs::write(&late, b"data").unwrap();

        let artifact = controller.stop().await.unwrap();
        assert_eq!(artifact.path, late);
    }

    #[tokio::test]
    async fn test_disconnect_moves_to_idle() {
        let backend = Arc::new(FakeBackend::default());
        let controller = CaptureController::new(backend.clone(), ArtifactNaming::default());

        controller.start(Duration::from_secs(1)).await.unwrap();
        controller.check_alive().await.unwrap();

        *backend.recording.lock() = false;
        assert!(matches!(
            controller.check_alive().await.unwrap_err(),
            CaptureError::Disconnected(_)
        ));
        assert_eq!(controller.state(), CaptureState::Idle);
        assert!(controller.session().is_none());

        // A fresh session can start afterwards
        controller.start(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_abandon_stops_backend() {
        let backend = Arc::new(FakeBackend::default());
        let controller = CaptureController::new(backend.clone(), ArtifactNaming::default());

        controller.start(Duration::from_secs(1)).await.unwrap();
        controller.abandon().await;
        assert_eq!(controller.state(), CaptureState::Idle);
        assert!(!*backend.recording.lock());
    }
}
