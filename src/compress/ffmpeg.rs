//! FFmpeg transcoding boundary
//!
//! The compressor only sees the [`Transcoder`] trait. [`FfmpegTranscoder`]
//! implements it with `ffprobe` / `ffmpeg` subprocesses; each run reports its
//! exit status, the tail of stderr, and the size of the file it wrote.

use super::types::{CompressorSettings, ContainerFormat, MediaProbe};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

/// Lines of ffmpeg stderr kept for diagnostics
const STDERR_TAIL_LINES: usize = 20;

/// Transcoder errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TranscodeError {
    #[error("failed to run {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("transcoder wrote no output at {}", .0.display())]
    MissingOutput(PathBuf),

    #[error("unreadable probe output: {0}")]
    Probe(String),
}

/// What a transcode should do to the streams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeMode {
    /// Rewrap the existing streams into another container
    StreamCopy,
    /// Re-encode at a target bitrate
    Compress {
        video_bitrate_kbps: u32,
        audio_bitrate_kbps: u32,
    },
}

/// One transcoder invocation
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub mode: TranscodeMode,
    pub container: ContainerFormat,
}

/// Outcome of a successful invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeOutput {
    pub size_bytes: u64,
    pub stderr_tail: String,
}

/// Media transcoder used by the compressor
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Read duration and stream metadata
    async fn probe(&self, input: &Path) -> Result<MediaProbe, TranscodeError>;

    /// Run one job, writing `job.output`
    async fn transcode(&self, job: &TranscodeJob) -> Result<TranscodeOutput, TranscodeError>;
}

/// Transcoder backed by the ffmpeg command-line tools
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    preset: String,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            preset: "medium".to_string(),
        }
    }

    pub fn from_settings(settings: &CompressorSettings) -> Self {
        Self {
            ffmpeg: settings.ffmpeg_path.clone(),
            ffprobe: settings.ffprobe_path.clone(),
            preset: settings.preset.clone(),
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn probe(&self, input: &Path) -> Result<MediaProbe, TranscodeError> {
        let program = self.ffprobe.display().to_string();
        let output = Command::new(&self.ffprobe)
            .args(probe_args(input))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TranscodeError::Spawn {
                program: program.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(TranscodeError::Failed {
                program,
                status: output.status.to_string(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        parse_probe_output(&String::from_utf8_lossy(&output.stdout))
    }

    async fn transcode(&self, job: &TranscodeJob) -> Result<TranscodeOutput, TranscodeError> {
        let program = self.ffmpeg.display().to_string();
        let args = transcode_args(job, &self.preset);
        tracing::debug!("Running {} {}", program, args.join(" "));

        // kill_on_drop: a cancelled cycle must not leave ffmpeg running
        let output = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TranscodeError::Spawn {
                program: program.clone(),
                reason: e.to_string(),
            })?;

        let tail = stderr_tail(&output.stderr);
        if !output.status.success() {
            return Err(TranscodeError::Failed {
                program,
                status: output.status.to_string(),
                stderr: tail,
            });
        }

        let size_bytes = tokio::fs::metadata(&job.output)
            .await
            .map(|m| m.len())
            .map_err(|_| TranscodeError::MissingOutput(job.output.clone()))?;

        Ok(TranscodeOutput {
            size_bytes,
            stderr_tail: tail,
        })
    }
}

/// `ffprobe` arguments producing JSON format and stream info
pub fn probe_args(input: &Path) -> Vec<String> {
    vec![
        "-v".into(),
        "quiet".into(),
        "-print_format".into(),
        "json".into(),
        "-show_format".into(),
        "-show_streams".into(),
        input.to_string_lossy().into_owned(),
    ]
}

/// `ffmpeg` arguments for a job
pub fn transcode_args(job: &TranscodeJob, preset: &str) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-nostdin".into(),
        "-y".into(),
        "-i".into(),
        job.input.to_string_lossy().into_owned(),
    ];

    match job.mode {
        TranscodeMode::StreamCopy => {
            args.extend(["-c", "copy"].map(String::from));
        }
        TranscodeMode::Compress {
            video_bitrate_kbps,
            audio_bitrate_kbps,
        } => {
            let (video_codec, audio_codec) = codecs_for(job.container);
            args.extend(["-c:v", video_codec].map(String::from));
            if job.container != ContainerFormat::Webm {
                args.extend(["-preset", preset].map(String::from));
            }
            args.extend([
                "-b:v".to_string(),
                format!("{}k", video_bitrate_kbps),
                "-maxrate".to_string(),
                format!("{}k", video_bitrate_kbps),
                "-bufsize".to_string(),
                format!("{}k", video_bitrate_kbps.saturating_mul(2)),
                "-c:a".to_string(),
                audio_codec.to_string(),
                "-b:a".to_string(),
                format!("{}k", audio_bitrate_kbps),
            ]);
        }
    }

    if matches!(job.container, ContainerFormat::Mp4 | ContainerFormat::Mov) {
        // Index at the front so clients can play while downloading
        args.extend(["-movflags", "+faststart"].map(String::from));
    }

    args.extend([
        "-f".to_string(),
        job.container.muxer().to_string(),
        job.output.to_string_lossy().into_owned(),
    ]);
    args
}

fn codecs_for(container: ContainerFormat) -> (&'static str, &'static str) {
    match container {
        ContainerFormat::Webm => ("libvpx-vp9", "libopus"),
        _ => ("libx264", "aac"),
    }
}

/// Parse `ffprobe -print_format json -show_format -show_streams` output
pub fn parse_probe_output(raw: &str) -> Result<MediaProbe, TranscodeError> {
    let json: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| TranscodeError::Probe(e.to_string()))?;

    let streams = json
        .get("streams")
        .and_then(|s| s.as_array())
        .cloned()
        .unwrap_or_default();

    let video_stream = streams
        .iter()
        .find(|s| s.get("codec_type").and_then(|t| t.as_str()) == Some("video"));

    // Format duration first, stream duration for containers that omit it
    let duration_secs = json
        .get("format")
        .and_then(|f| f.get("duration"))
        .or_else(|| video_stream.and_then(|s| s.get("duration")))
        .and_then(|d| d.as_str())
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| TranscodeError::Probe("no duration reported".to_string()))?;

    let format_name = json
        .get("format")
        .and_then(|f| f.get("format_name"))
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let dimension = |key: &str| {
        video_stream
            .and_then(|s| s.get(key))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32
    };

    Ok(MediaProbe {
        duration_secs,
        format_name,
        video_codec: video_stream
            .and_then(|s| s.get("codec_name"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
        width: dimension("width"),
        height: dimension("height"),
    })
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}
