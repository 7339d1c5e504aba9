//! Size-targeting compressor
//!
//! Searches the video bitrate range for the best-quality encode that fits a
//! byte budget. Encoded size is treated as a black-box sample of bitrate:
//! over-budget samples halve the range toward the most aggressive bitrate,
//! in-budget samples with slack probe upward toward the least aggressive one.

use super::ffmpeg::{TranscodeJob, TranscodeMode, Transcoder};
use super::types::{
    CompressError, CompressedArtifact, CompressionAttempt, CompressorSettings, MediaArtifact,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Produces artifacts that fit a byte budget
pub struct Compressor {
    transcoder: Arc<dyn Transcoder>,
    settings: CompressorSettings,
}

/// Best in-budget result so far
struct Candidate {
    path: PathBuf,
    size_bytes: u64,
}

impl Compressor {
    pub fn new(transcoder: Arc<dyn Transcoder>, settings: CompressorSettings) -> Self {
        Self {
            transcoder,
            settings,
        }
    }

    pub fn settings(&self) -> &CompressorSettings {
        &self.settings
    }

    /// Compress `input` to at most `byte_budget` bytes using no more than
    /// `max_attempts` re-encodes. The input file is never modified.
    pub async fn compress(
        &self,
        input: &MediaArtifact,
        byte_budget: u64,
        max_attempts: u32,
    ) -> Result<CompressedArtifact, CompressError> {
        if input.size_bytes == 0 {
            return Err(CompressError::InputInvalid(format!(
                "{} is empty",
                input.path.display()
            )));
        }

        let probe = self
            .transcoder
            .probe(&input.path)
            .await
            .map_err(|e| CompressError::InputInvalid(format!("unreadable media: {}", e)))?;
        if !probe.duration_secs.is_finite() || probe.duration_secs <= 0.0 {
            return Err(CompressError::InputInvalid(format!(
                "{} has zero duration",
                input.path.display()
            )));
        }

        let mut input = input.clone();
        input.probe = Some(probe);

        let output_dir = self.output_dir(&input.path);
        tokio::fs::create_dir_all(&output_dir).await?;

        if input.size_bytes <= byte_budget {
            if let Some(done) = self.pass_through(&input, &output_dir, byte_budget).await {
                return Ok(done);
            }
        }

        self.search(&input, &output_dir, byte_budget, max_attempts).await
    }

    /// In-budget input: hand it back as is, or rewrap it into the delivery
    /// container without re-encoding. `None` means a search is needed.
    async fn pass_through(
        &self,
        input: &MediaArtifact,
        output_dir: &Path,
        byte_budget: u64,
    ) -> Option<CompressedArtifact> {
        let target = self.settings.target_container;
        if input.container == target {
            tracing::info!(
                "{:?} already fits the budget ({} <= {} bytes), passing through",
                input.path,
                input.size_bytes,
                byte_budget
            );
            return Some(CompressedArtifact {
                artifact: input.clone(),
                attempts: Vec::new(),
                pass_through: true,
            });
        }

        let output = output_dir.join(format!("{}-normalized.{}", stem(&input.path), target.extension()));
        let job = TranscodeJob {
            input: input.path.clone(),
            output: output.clone(),
            mode: TranscodeMode::StreamCopy,
            container: target,
        };

        match self.transcoder.transcode(&job).await {
            Ok(result) if result.size_bytes <= byte_budget => {
                tracing::info!(
                    "Rewrapped {:?} into {:?} ({} bytes)",
                    input.path,
                    output,
                    result.size_bytes
                );
                Some(CompressedArtifact {
                    artifact: MediaArtifact {
                        path: output,
                        size_bytes: result.size_bytes,
                        container: target,
                        probe: input.probe.clone(),
                    },
                    attempts: Vec::new(),
                    pass_through: true,
                })
            }
            Ok(result) => {
                tracing::info!(
                    "Rewrapped file exceeds budget ({} > {} bytes), re-encoding",
                    result.size_bytes,
                    byte_budget
                );
                remove_output(&output).await;
                None
            }
            Err(e) => {
                tracing::warn!("Stream copy into {:?} failed, re-encoding: {}", target, e);
                remove_output(&output).await;
                None
            }
        }
    }

    async fn search(
        &self,
        input: &MediaArtifact,
        output_dir: &Path,
        byte_budget: u64,
        max_attempts: u32,
    ) -> Result<CompressedArtifact, CompressError> {
        let target = self.settings.target_container;
        let duration = input.probe.as_ref().map(|p| p.duration_secs).unwrap_or(0.0);

        let mut low = self.settings.min_bitrate_kbps;
        let mut high = self.settings.max_bitrate_kbps;
        let mut bitrate = self.initial_bitrate(byte_budget, duration);
        let mut attempts: Vec<CompressionAttempt> = Vec::new();
        let mut best: Option<Candidate> = None;

        tracing::info!(
            "Compressing {:?} ({} bytes) to {} bytes, starting at {}k in [{}k, {}k]",
            input.path,
            input.size_bytes,
            byte_budget,
            bitrate,
            low,
            high
        );

        while (attempts.len() as u32) < max_attempts {
            let output = output_dir.join(format!("{}-{}k.{}", stem(&input.path), bitrate, target.extension()));
            let job = TranscodeJob {
                input: input.path.clone(),
                output: output.clone(),
                mode: TranscodeMode::Compress {
                    video_bitrate_kbps: bitrate,
                    audio_bitrate_kbps: self.settings.audio_bitrate_kbps,
                },
                container: target,
            };

            let size_bytes = match self.transcoder.transcode(&job).await {
                Ok(result) => result.size_bytes,
                Err(e) => {
                    remove_output(&output).await;
                    if let Some(best) = best {
                        // Keep what already fits rather than failing the cycle
                        tracing::warn!("Transcode at {}k failed, keeping earlier result: {}", bitrate, e);
                        return Ok(self.finish(input, best, attempts));
                    }
                    if attempts.is_empty() {
                        return Err(e.into());
                    }
                    tracing::warn!("Transcode at {}k failed, ending search: {}", bitrate, e);
                    break;
                }
            };

            attempts.push(CompressionAttempt {
                bitrate_kbps: bitrate,
                size_bytes,
            });
            tracing::info!(
                "Attempt {}/{}: {}k -> {} bytes ({})",
                attempts.len(),
                max_attempts,
                bitrate,
                size_bytes,
                if size_bytes <= byte_budget { "fits" } else { "over budget" }
            );

            let next = if size_bytes <= byte_budget {
                let replaces = best.as_ref().map_or(true, |b| size_bytes > b.size_bytes);
                if replaces {
                    if let Some(old) = best.take() {
                        remove_output(&old.path).await;
                    }
                    best = Some(Candidate {
                        path: output,
                        size_bytes,
                    });
                } else {
                    remove_output(&output).await;
                }

                if size_bytes as f64 >= byte_budget as f64 * self.settings.accept_fill_ratio {
                    break;
                }
                low = bitrate;
                midpoint(bitrate, high)
            } else {
                remove_output(&output).await;
                if best.is_some() {
                    // Stepping up overshot; the previous fit is the answer
                    break;
                }
                high = bitrate;
                midpoint(low, bitrate)
            };

            if next == bitrate {
                break;
            }
            bitrate = next;
        }

        match best {
            Some(best) => Ok(self.finish(input, best, attempts)),
            None => {
                let best_size = attempts
                    .iter()
                    .map(|a| a.size_bytes)
                    .min()
                    .unwrap_or(input.size_bytes);
                tracing::warn!(
                    "No bitrate fit {} bytes after {} attempts (smallest {} bytes)",
                    byte_budget,
                    attempts.len(),
                    best_size
                );
                Err(CompressError::Infeasible {
                    best_size,
                    attempts,
                })
            }
        }
    }

    fn finish(
        &self,
        input: &MediaArtifact,
        best: Candidate,
        attempts: Vec<CompressionAttempt>,
    ) -> CompressedArtifact {
        tracing::info!(
            "Selected {:?} ({} bytes) after {} attempts",
            best.path,
            best.size_bytes,
            attempts.len()
        );
        CompressedArtifact {
            artifact: MediaArtifact {
                path: best.path,
                size_bytes: best.size_bytes,
                container: self.settings.target_container,
                probe: input.probe.clone(),
            },
            attempts,
            pass_through: false,
        }
    }

    /// First bitrate to try: the configured default, or what the budget
    /// allows for this duration after audio and a safety margin
    pub fn initial_bitrate(&self, byte_budget: u64, duration_secs: f64) -> u32 {
        let min = self.settings.min_bitrate_kbps;
        let max = self.settings.max_bitrate_kbps;
        if let Some(kbps) = self.settings.default_bitrate_kbps {
            return kbps.clamp(min, max);
        }
        if duration_secs <= 0.0 {
            return max;
        }

        let target_bits = byte_budget as f64 * 8.0 * self.settings.size_safety_margin;
        let total_kbps = target_bits / duration_secs / 1000.0;
        let video_kbps = total_kbps - self.settings.audio_bitrate_kbps as f64;
        (video_kbps.max(0.0).min(u32::MAX as f64) as u32).clamp(min, max)
    }

    fn output_dir(&self, input: &Path) -> PathBuf {
        self.settings
            .work_dir
            .clone()
            .or_else(|| input.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

fn midpoint(a: u32, b: u32) -> u32 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    lo + (hi - lo) / 2
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "recording".to_string())
}

async fn remove_output(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove {:?}: {}", path, e);
        }
    }
}
