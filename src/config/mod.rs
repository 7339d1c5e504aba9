//! Runtime configuration
//!
//! Every option can be given as a long flag or through the environment. The
//! parsed [`Cli`] is validated once into an immutable [`Config`] that is
//! shared with the orchestrator; nothing reads the environment after startup.

use crate::capture::obs::ObsSettings;
use crate::compress::{CompressorSettings, ContainerFormat};
use crate::delivery::{ChannelId, DiscordSettings};
use crate::orchestrator::RetryPolicy;
use crate::recorder::ArtifactNaming;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Bytes in one budget megabyte (the budget is expressed in MiB)
pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Smallest byte budget accepted at startup, in MiB
pub const MIN_BUDGET_MB: f64 = 1.0;

/// Configuration errors. All of them are fatal before the loop starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing credential: {0} is not set")]
    MissingCredential(String),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Command-line / environment surface
#[derive(Debug, Parser, Clone)]
#[command(
    name = "obs-rec",
    about = "Record the screen through OBS on a schedule and post the clips to Discord",
    author,
    version
)]
pub struct Cli {
    /// Discord bot token
    #[arg(long, env = "DISCORD_BOT_TOKEN", hide_env_values = true, default_value = "")]
    pub discord_token: String,

    /// Discord channel receiving the recordings
    #[arg(long, env = "DISCORD_CHANNEL_ID")]
    pub channel_id: Option<u64>,

    /// OBS WebSocket host
    #[arg(long, env = "OBS_HOST", default_value = "localhost")]
    pub obs_host: String,

    /// OBS WebSocket port
    #[arg(long, env = "OBS_PORT", default_value_t = 4455)]
    pub obs_port: u16,

    /// OBS WebSocket password
    #[arg(long, env = "OBS_PASSWORD", hide_env_values = true)]
    pub obs_password: Option<String>,

    /// Timeout for OBS connection and requests (seconds)
    #[arg(long, env = "OBS_TIMEOUT", default_value_t = 3.0)]
    pub obs_timeout: f64,

    /// Length of each recording (seconds)
    #[arg(long, env = "RECORDING_DURATION", default_value_t = 30.0)]
    pub recording_duration: f64,

    /// Time between the starts of two recordings (seconds)
    #[arg(long, env = "RECORDING_INTERVAL", default_value_t = 1800.0)]
    pub recording_interval: f64,

    /// Upload size limit (MiB)
    #[arg(long, env = "VIDEO_MAX_SIZE_MB", default_value_t = 25.0)]
    pub video_max_size_mb: f64,

    /// OBS recording directory, used when OBS does not report the output path
    #[arg(long, env = "RECORDING_DIR")]
    pub recording_dir: Option<PathBuf>,

    /// Container extension OBS records to
    #[arg(long, env = "RECORDING_EXTENSION", default_value = "mkv")]
    pub recording_extension: String,

    /// Container uploads are delivered in (mp4, webm, mkv, mov or flv)
    #[arg(long, env = "OUTPUT_CONTAINER", default_value = "mp4")]
    pub output_container: String,

    /// Directory for compressed outputs (defaults to the recording's directory)
    #[arg(long, env = "WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// Maximum number of transcodes per recording
    #[arg(long, env = "MAX_COMPRESS_ATTEMPTS", default_value_t = 5)]
    pub max_compress_attempts: u32,

    /// Most aggressive video bitrate the search may use (kbps)
    #[arg(long, env = "MIN_VIDEO_BITRATE_KBPS", default_value_t = 100)]
    pub min_video_bitrate_kbps: u32,

    /// Least aggressive video bitrate the search may use (kbps)
    #[arg(long, env = "MAX_VIDEO_BITRATE_KBPS", default_value_t = 5000)]
    pub max_video_bitrate_kbps: u32,

    /// First bitrate tried; derived from budget and duration when unset (kbps)
    #[arg(long, env = "DEFAULT_VIDEO_BITRATE_KBPS")]
    pub default_video_bitrate_kbps: Option<u32>,

    /// Audio bitrate of compressed outputs (kbps)
    #[arg(long, env = "AUDIO_BITRATE_KBPS", default_value_t = 128)]
    pub audio_bitrate_kbps: u32,

    /// ffmpeg executable
    #[arg(long, env = "FFMPEG_PATH", default_value = "ffmpeg")]
    pub ffmpeg_path: PathBuf,

    /// ffprobe executable
    #[arg(long, env = "FFPROBE_PATH", default_value = "ffprobe")]
    pub ffprobe_path: PathBuf,

    /// Upload attempts per recording, first try included
    #[arg(long, env = "DELIVERY_ATTEMPTS", default_value_t = 4)]
    pub delivery_attempts: u32,

    /// Backoff before the first upload retry (milliseconds)
    #[arg(long, env = "DELIVERY_BACKOFF_MS", default_value_t = 2_000)]
    pub delivery_backoff_ms: u64,

    /// Upper bound for upload backoff (milliseconds)
    #[arg(long, env = "DELIVERY_BACKOFF_MAX_MS", default_value_t = 60_000)]
    pub delivery_backoff_max_ms: u64,

    /// How often OBS is polled while recording (seconds, 0 disables)
    #[arg(long, env = "STATUS_POLL_SECS", default_value_t = 5.0)]
    pub status_poll_secs: f64,

    /// Machine name shown in the upload caption
    #[arg(long, env = "HOST_LABEL")]
    pub host_label: Option<String>,

    /// Keep recordings and compressed files on disk after each cycle
    #[arg(long, env = "KEEP_ARTIFACTS", default_value_t = false)]
    pub keep_artifacts: bool,
}

/// Immutable per-run cycle parameters
#[derive(Debug, Clone, PartialEq)]
pub struct CycleConfig {
    /// How long each capture runs
    pub capture_duration: Duration,
    /// Period between cycle starts
    pub cycle_interval: Duration,
    /// Maximum artifact size accepted by the delivery channel
    pub byte_budget: u64,
    /// Destination channel
    pub channel_id: ChannelId,
}

/// Fully validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub cycle: CycleConfig,
    pub obs: ObsSettings,
    pub naming: ArtifactNaming,
    pub discord: DiscordSettings,
    pub compressor: CompressorSettings,
    pub delivery_retry: RetryPolicy,
    /// Liveness polling period during capture; `None` disables polling
    pub status_poll_interval: Option<Duration>,
    pub keep_artifacts: bool,
}

impl Config {
    /// Parse the process arguments and environment, then validate
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(Cli::parse())
    }

    /// Validate a parsed command line
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let token = cli.discord_token.trim().to_string();
        if token.is_empty() {
            return Err(ConfigError::MissingCredential("DISCORD_BOT_TOKEN".into()));
        }

        let channel_id = match cli.channel_id {
            None => return Err(ConfigError::MissingCredential("DISCORD_CHANNEL_ID".into())),
            Some(0) => return Err(ConfigError::invalid("channel-id", "must not be zero")),
            Some(id) => ChannelId(id),
        };

        let capture_duration = positive_secs("recording-duration", cli.recording_duration)?;
        let cycle_interval = positive_secs("recording-interval", cli.recording_interval)?;
        let obs_timeout = positive_secs("obs-timeout", cli.obs_timeout)?;

        if !cli.video_max_size_mb.is_finite() || cli.video_max_size_mb < MIN_BUDGET_MB {
            return Err(ConfigError::invalid(
                "video-max-size-mb",
                format!("must be at least {MIN_BUDGET_MB} MiB, got {}", cli.video_max_size_mb),
            ));
        }
        let byte_budget = (cli.video_max_size_mb * BYTES_PER_MB) as u64;

        if cli.obs_port == 0 {
            return Err(ConfigError::invalid("obs-port", "must not be zero"));
        }
        if cli.max_compress_attempts == 0 {
            return Err(ConfigError::invalid("max-compress-attempts", "must be at least 1"));
        }
        if cli.delivery_attempts == 0 {
            return Err(ConfigError::invalid("delivery-attempts", "must be at least 1"));
        }
        if cli.min_video_bitrate_kbps == 0
            || cli.min_video_bitrate_kbps >= cli.max_video_bitrate_kbps
        {
            return Err(ConfigError::invalid(
                "min-video-bitrate-kbps",
                format!(
                    "must be non-zero and below max-video-bitrate-kbps ({}), got {}",
                    cli.max_video_bitrate_kbps, cli.min_video_bitrate_kbps
                ),
            ));
        }
        if cli.delivery_backoff_max_ms < cli.delivery_backoff_ms {
            return Err(ConfigError::invalid(
                "delivery-backoff-max-ms",
                "must not be below delivery-backoff-ms",
            ));
        }

        let status_poll_interval = if !cli.status_poll_secs.is_finite() || cli.status_poll_secs < 0.0 {
            return Err(ConfigError::invalid(
                "status-poll-secs",
                format!("must be zero or positive, got {}", cli.status_poll_secs),
            ));
        } else if cli.status_poll_secs == 0.0 {
            None
        } else {
            Some(
                Duration::try_from_secs_f64(cli.status_poll_secs)
                    .map_err(|e| ConfigError::invalid("status-poll-secs", e.to_string()))?,
            )
        };

        let extension = cli.recording_extension.trim().trim_start_matches('.').to_string();
        if extension.is_empty() {
            return Err(ConfigError::invalid("recording-extension", "must not be empty"));
        }

        let target_container = ContainerFormat::from_extension(&cli.output_container);
        if target_container == ContainerFormat::Other {
            return Err(ConfigError::invalid(
                "output-container",
                format!("unsupported container {:?}", cli.output_container),
            ));
        }

        let host_label = cli
            .host_label
            .filter(|label| !label.trim().is_empty())
            .or_else(|| std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()))
            .unwrap_or_else(|| "unknown".to_string());

        Ok(Config {
            cycle: CycleConfig {
                capture_duration,
                cycle_interval,
                byte_budget,
                channel_id,
            },
            obs: ObsSettings {
                host: cli.obs_host,
                port: cli.obs_port,
                password: cli.obs_password.filter(|p| !p.is_empty()),
                timeout: obs_timeout,
            },
            naming: ArtifactNaming {
                recording_dir: cli.recording_dir,
                extension,
            },
            discord: DiscordSettings::new(token, host_label),
            compressor: CompressorSettings {
                max_attempts: cli.max_compress_attempts,
                min_bitrate_kbps: cli.min_video_bitrate_kbps,
                max_bitrate_kbps: cli.max_video_bitrate_kbps,
                default_bitrate_kbps: cli.default_video_bitrate_kbps,
                audio_bitrate_kbps: cli.audio_bitrate_kbps,
                work_dir: cli.work_dir,
                ffmpeg_path: cli.ffmpeg_path,
                ffprobe_path: cli.ffprobe_path,
                target_container,
                ..CompressorSettings::default()
            },
            delivery_retry: RetryPolicy {
                max_attempts: cli.delivery_attempts,
                base_delay_ms: cli.delivery_backoff_ms,
                max_delay_ms: cli.delivery_backoff_max_ms,
                ..RetryPolicy::default()
            },
            status_poll_interval,
            keep_artifacts: cli.keep_artifacts,
        })
    }
}

fn positive_secs(field: &'static str, value: f64) -> Result<Duration, ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::invalid(
            field,
            format!("must be a positive number of seconds, got {value}"),
        ));
    }
    Duration::try_from_secs_f64(value).map_err(|e| ConfigError::invalid(field, e.to_string()))
}
