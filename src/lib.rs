//! obs-rec - scheduled OBS recordings delivered to Discord.
//!
//! Every cycle records a fixed-length clip through the OBS WebSocket API,
//! compresses it with ffmpeg until it fits the upload budget, and posts it to
//! a Discord channel. Failures are contained to the cycle they happen in.

pub mod capture;
pub mod compress;
pub mod config;
pub mod delivery;
pub mod orchestrator;
pub mod recorder;
pub mod utils;

use capture::{CaptureBackend, ObsClient};
use compress::{Compressor, FfmpegTranscoder};
use config::Config;
use delivery::DiscordClient;
use orchestrator::Orchestrator;
use recorder::CaptureController;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utils::{AppError, AppResult};

/// Install the global tracing subscriber
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "obs_rec=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wire the real backends and run until a shutdown signal arrives
pub async fn run(config: Config) -> AppResult<()> {
    tracing::info!("Starting obs-rec v{}", env!("CARGO_PKG_VERSION"));
    tracing::debug!("Configuration: {:?}", config);

    if let Some(dir) = &config.compressor.work_dir {
        tokio::fs::create_dir_all(dir).await?;
    }

    let config = Arc::new(config);
    let backend = Arc::new(ObsClient::new(config.obs.clone()));
    let controller = CaptureController::new(backend.clone(), config.naming.clone());
    let compressor = Compressor::new(
        Arc::new(FfmpegTranscoder::from_settings(&config.compressor)),
        config.compressor.clone(),
    );
    let delivery = DiscordClient::new(config.discord.clone())
        .map_err(|e| AppError::Delivery(e.to_string()))?;

    let orchestrator = Orchestrator::new(config, controller, compressor, Arc::new(delivery));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match shutdown_signal().await {
            Ok(()) => {
                tracing::info!("Shutdown requested, finishing the current step");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => tracing::error!("Failed to listen for shutdown signals: {}", e),
        }
    });

    orchestrator.run(shutdown_rx).await;
    backend.shutdown().await;

    tracing::info!("obs-rec stopped");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
