//! Size-targeting compression
//!
//! Turns a captured recording into a file the delivery channel accepts:
//! - Transcoder trait with the ffmpeg/ffprobe implementation
//! - Compressor running the bitrate search against a byte budget
//! - Artifact and search types

pub mod ffmpeg;
pub mod search;
pub mod types;

pub use ffmpeg::{
    FfmpegTranscoder, TranscodeError, TranscodeJob, TranscodeMode, TranscodeOutput, Transcoder,
};
pub use search::Compressor;
pub use types::{
    CompressError, CompressedArtifact, CompressionAttempt, CompressorSettings, ContainerFormat,
    MediaArtifact, MediaProbe,
};
