//! Compression types and configuration
//!
//! Artifacts moving through a cycle, the search trace, and compressor
//! settings and errors.

use super::ffmpeg::TranscodeError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Container formats we recognise by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    Mp4,
    Webm,
    Mkv,
    Mov,
    Flv,
    Other,
}

impl ContainerFormat {
    /// Guess the container from a file extension
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(ContainerFormat::Other)
    }

    pub fn from_extension(ext: &str) -> Self {
        match ext.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "mp4" | "m4v" => ContainerFormat::Mp4,
            "webm" => ContainerFormat::Webm,
            "mkv" => ContainerFormat::Mkv,
            "mov" => ContainerFormat::Mov,
            "flv" => ContainerFormat::Flv,
            _ => ContainerFormat::Other,
        }
    }

    /// Get the file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::Webm => "webm",
            ContainerFormat::Mkv => "mkv",
            ContainerFormat::Mov => "mov",
            ContainerFormat::Flv => "flv",
            ContainerFormat::Other => "bin",
        }
    }

    /// FFmpeg muxer name (`-f`)
    pub fn muxer(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::Webm => "webm",
            ContainerFormat::Mkv => "matroska",
            ContainerFormat::Mov => "mov",
            ContainerFormat::Flv => "flv",
            ContainerFormat::Other => "mp4",
        }
    }

    /// MIME type used when uploading
    pub fn mime_type(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "video/mp4",
            ContainerFormat::Webm => "video/webm",
            ContainerFormat::Mkv => "video/x-matroska",
            ContainerFormat::Mov => "video/quicktime",
            ContainerFormat::Flv => "video/x-flv",
            ContainerFormat::Other => "application/octet-stream",
        }
    }
}

/// Metadata read from the media file itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaProbe {
    pub duration_secs: f64,
    pub format_name: String,
    pub video_codec: Option<String>,
    pub width: u32,
    pub height: u32,
}

/// A media file on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub container: ContainerFormat,
    /// Filled in once the compressor has probed the file
    pub probe: Option<MediaProbe>,
}

impl MediaArtifact {
    /// Describe an existing file
    pub async fn from_path(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path.display()),
            ));
        }
        Ok(Self {
            container: ContainerFormat::from_path(&path),
            size_bytes: metadata.len(),
            path,
            probe: None,
        })
    }

    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("recording.{}", self.container.extension()))
    }
}

/// One sample of the bitrate search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionAttempt {
    pub bitrate_kbps: u32,
    pub size_bytes: u64,
}

/// Successful compressor outcome
#[derive(Debug, Clone)]
pub struct CompressedArtifact {
    /// File to deliver; the input itself on pass-through
    pub artifact: MediaArtifact,
    /// Search trace, in order; empty on pass-through
    pub attempts: Vec<CompressionAttempt>,
    /// No re-encode happened (at most a container remux)
    pub pass_through: bool,
}

impl CompressedArtifact {
    pub fn attempts_used(&self) -> u32 {
        self.attempts.len() as u32
    }
}

/// Compression errors
#[derive(Error, Debug)]
pub enum CompressError {
    #[error("invalid input: {0}")]
    InputInvalid(String),

    #[error("no bitrate met the budget within {} attempts (smallest {best_size} bytes)", attempts.len())]
    Infeasible {
        best_size: u64,
        attempts: Vec<CompressionAttempt>,
    },

    #[error("transcode failed: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CompressError {
    /// Smallest size observed before giving up, if any transcode finished
    pub fn best_size(&self) -> Option<u64> {
        match self {
            CompressError::Infeasible { best_size, .. } => Some(*best_size),
            _ => None,
        }
    }

    pub fn attempts_used(&self) -> u32 {
        match self {
            CompressError::Infeasible { attempts, .. } => attempts.len() as u32,
            _ => 0,
        }
    }
}

/// Compressor configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CompressorSettings {
    /// Default transcode ceiling per cycle
    pub max_attempts: u32,
    /// Most aggressive bitrate (lower end of the search range)
    pub min_bitrate_kbps: u32,
    /// Least aggressive bitrate (upper end of the search range)
    pub max_bitrate_kbps: u32,
    /// First bitrate tried; derived from budget and duration when `None`
    pub default_bitrate_kbps: Option<u32>,
    pub audio_bitrate_kbps: u32,
    /// Fraction of the budget the derived default bitrate aims for
    pub size_safety_margin: f64,
    /// An in-budget result filling at least this fraction of the budget is
    /// accepted without probing a higher bitrate
    pub accept_fill_ratio: f64,
    /// Container the delivery channel expects
    pub target_container: ContainerFormat,
    /// Where outputs go; next to the input when `None`
    pub work_dir: Option<PathBuf>,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    /// x264 preset used for compression
    pub preset: String,
}

impl Default for CompressorSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_bitrate_kbps: 100,
            max_bitrate_kbps: 5_000,
            default_bitrate_kbps: None,
            audio_bitrate_kbps: 128,
            size_safety_margin: 0.95,
            accept_fill_ratio: 0.75,
            target_container: ContainerFormat::Mp4,
            work_dir: None,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            preset: "medium".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_from_path() {
        assert_eq!(ContainerFormat::from_path(Path::new("a/b.MKV")), ContainerFormat::Mkv);
        assert_eq!(ContainerFormat::from_path(Path::new("clip.mp4")), ContainerFormat::Mp4);
        assert_eq!(ContainerFormat::from_path(Path::new("noext")), ContainerFormat::Other);
    }

    #[tokio::test]
    async fn test_artifact_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mkv");
        std::fs::write(&path, vec![0u8; 2048]).unwrap();

        let artifact = MediaArtifact::from_path(&path).await.unwrap();
        assert_eq!(artifact.size_bytes, 2048);
        assert_eq!(artifact.container, ContainerFormat::Mkv);
        assert_eq!(artifact.file_name(), "clip.mkv");
    }

    #[tokio::test]
    async fn test_artifact_from_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        assert!(MediaArtifact::from_path(dir.path().join("gone.mkv")).await.is_err());
        assert!(MediaArtifact::from_path(dir.path()).await.is_err());
    }

    #[test]
    fn test_infeasible_reports_smallest() {
        let err = CompressError::Infeasible {
            best_size: 42,
            attempts: vec![
                CompressionAttempt { bitrate_kbps: 2000, size_bytes: 50 },
                CompressionAttempt { bitrate_kbps: 1000, size_bytes: 42 },
            ],
        };
        assert_eq!(err.best_size(), Some(42));
        assert_eq!(err.attempts_used(), 2);
    }
}
