//! The periodic record -> compress -> deliver loop
//!
//! One cycle is in flight at a time. Every failure inside a cycle is turned
//! into a [`CycleResult`]; only the shutdown flag ends the loop.

use super::cycle::{CycleReport, CycleResult, OrchestratorEvent};
use crate::compress::{CompressedArtifact, Compressor, MediaArtifact};
use crate::config::Config;
use crate::delivery::{caption, DeliveryClient, DeliveryError};
use crate::recorder::{CaptureController, CaptureError};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

const EVENT_CAPACITY: usize = 64;

/// Drives cycles on a fixed period
pub struct Orchestrator {
    config: Arc<Config>,
    capture: CaptureController,
    compressor: Compressor,
    delivery: Arc<dyn DeliveryClient>,
    event_tx: broadcast::Sender<OrchestratorEvent>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        capture: CaptureController,
        compressor: Compressor,
        delivery: Arc<dyn DeliveryClient>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            capture,
            compressor,
            delivery,
            event_tx,
        }
    }

    /// Subscribe to cycle events
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.event_tx.subscribe()
    }

    pub fn capture(&self) -> &CaptureController {
        &self.capture
    }

    /// Run cycles until `shutdown` turns true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.config.cycle.cycle_interval;
        tracing::info!(
            "Orchestrator running: {:?} captures every {:?}, budget {} bytes, channel {}",
            self.config.cycle.capture_duration,
            interval,
            self.config.cycle.byte_budget,
            self.config.cycle.channel_id
        );

        let mut cycle = 0u64;
        loop {
            if *shutdown.borrow() {
                break;
            }
            cycle += 1;
            let began = Instant::now();
            self.run_cycle(cycle, &mut shutdown).await;

            let remaining = interval.saturating_sub(began.elapsed());
            if remaining.is_zero() {
                tracing::warn!("Cycle {} overran the {:?} interval", cycle, interval);
                continue;
            }
            tracing::debug!("Next cycle in {:?}", remaining);
            tokio::select! {
                _ = tokio::time::sleep(remaining) => {}
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }

        tracing::info!("Orchestrator stopped after {} cycles", cycle);
    }

    /// Run one full cycle, publish its report, then release its files
    pub async fn run_cycle(&self, cycle: u64, shutdown: &mut watch::Receiver<bool>) -> CycleReport {
        let started_at = Utc::now();
        let began = Instant::now();
        tracing::info!("Cycle {} started", cycle);
        let _ = self
            .event_tx
            .send(OrchestratorEvent::CycleStarted { cycle, started_at });

        let mut leftovers = Vec::new();
        let result = self.drive(started_at, shutdown, &mut leftovers).await;

        let report = CycleReport {
            cycle,
            started_at,
            elapsed: began.elapsed(),
            result,
        };
        self.publish(&report);

        if !self.config.keep_artifacts {
            remove_files(leftovers).await;
        }
        report
    }

    async fn drive(
        &self,
        started_at: DateTime<Utc>,
        shutdown: &mut watch::Receiver<bool>,
        leftovers: &mut Vec<PathBuf>,
    ) -> CycleResult {
        let duration = self.config.cycle.capture_duration;

        if let Err(e) = self.capture.start(duration).await {
            return CycleResult::CaptureFailed {
                reason: e.to_string(),
            };
        }

        if let Err(reason) = self.capture_window(shutdown).await {
            return CycleResult::CaptureFailed { reason };
        }

        let artifact = match self.capture.stop().await {
            Ok(artifact) => artifact,
            Err(e) => {
                if let CaptureError::EmptyArtifact(path) = &e {
                    leftovers.push(path.clone());
                }
                return CycleResult::CaptureFailed {
                    reason: e.to_string(),
                }
            }
        };
        leftovers.push(artifact.path.clone());

        let compressed = match self
            .compressor
            .compress(
                &artifact,
                self.config.cycle.byte_budget,
                self.compressor.settings().max_attempts,
            )
            .await
        {
            Ok(compressed) => compressed,
            Err(e) => {
                tracing::warn!("Compression failed: {}", e);
                return CycleResult::CompressionInfeasible {
                    best_size: e.best_size(),
                    attempts: e.attempts_used(),
                };
            }
        };
        if compressed.artifact.path != artifact.path {
            leftovers.push(compressed.artifact.path.clone());
        }

        let text = caption(started_at, &self.config.discord.host_label);
        self.deliver(&compressed, &text).await
    }

    /// Wait out the capture duration, polling liveness and watching for
    /// shutdown. `Err` carries the failure reason; the session is gone.
    async fn capture_window(&self, shutdown: &mut watch::Receiver<bool>) -> Result<(), String> {
        let deadline = Instant::now() + self.config.cycle.capture_duration;
        loop {
            let wake = match self.config.status_poll_interval {
                Some(poll) => deadline.min(Instant::now() + poll),
                None => deadline,
            };

            tokio::select! {
                _ = tokio::time::sleep_until(wake) => {}
                _ = wait_for_shutdown(shutdown) => {
                    tracing::info!("Shutdown requested during capture");
                    self.capture.abandon().await;
                    return Err("interrupted by shutdown".to_string());
                }
            }

            if Instant::now() >= deadline {
                return Ok(());
            }
            self.capture.check_alive().await.map_err(|e| e.to_string())?;
        }
    }

    /// Upload with retries on transient failures. Not interruptible.
    async fn deliver(&self, compressed: &CompressedArtifact, text: &str) -> CycleResult {
        let policy = &self.config.delivery_retry;
        let channel = self.config.cycle.channel_id;
        let artifact: &MediaArtifact = &compressed.artifact;
        let mut attempt = 1u32;

        loop {
            let err = match self.delivery.deliver(artifact, channel, Some(text)).await {
                Ok(()) => {
                    tracing::info!("Delivered to channel {} on attempt {}", channel, attempt);
                    return CycleResult::Delivered {
                        size_bytes: artifact.size_bytes,
                        attempts: compressed.attempts_used(),
                    };
                }
                Err(e) => e,
            };

            match err {
                DeliveryError::Transient {
                    ref reason,
                    retry_after,
                } if policy.should_retry(attempt) => {
                    let delay = policy.delay_with_hint(attempt, retry_after);
                    tracing::warn!(
                        "Delivery attempt {}/{} failed ({}), retrying in {:?}",
                        attempt,
                        policy.max_attempts,
                        reason,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                DeliveryError::SizeRejected(reason) => {
                    tracing::warn!("Channel refused {} bytes: {}", artifact.size_bytes, reason);
                    return CycleResult::CompressionInfeasible {
                        best_size: Some(artifact.size_bytes),
                        attempts: compressed.attempts_used(),
                    };
                }
                DeliveryError::Auth(reason) => {
                    tracing::error!("Delivery credential rejected, operator action needed: {}", reason);
                    let _ = self.event_tx.send(OrchestratorEvent::OperatorAlert(format!(
                        "delivery credential rejected: {}",
                        reason
                    )));
                    return CycleResult::DeliveryFailed {
                        reason: format!("auth error: {}", reason),
                        retries: attempt - 1,
                    };
                }
                other => {
                    return CycleResult::DeliveryFailed {
                        reason: other.to_string(),
                        retries: attempt - 1,
                    };
                }
            }
        }
    }

    fn publish(&self, report: &CycleReport) {
        match &report.result {
            CycleResult::Delivered { .. } => tracing::info!(
                "Cycle {} finished in {:?}: {}",
                report.cycle,
                report.elapsed,
                report.result
            ),
            _ => tracing::warn!(
                "Cycle {} finished in {:?}: {}",
                report.cycle,
                report.elapsed,
                report.result
            ),
        }
        let _ = self
            .event_tx
            .send(OrchestratorEvent::CycleCompleted(report.clone()));
    }
}

/// Resolves once the flag is true. A dropped sender never resolves.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn remove_files(paths: Vec<PathBuf>) {
    for path in paths {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::debug!("Removed {:?}", path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove {:?}: {}", path, e),
        }
    }
}
