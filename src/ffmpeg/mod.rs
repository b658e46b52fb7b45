//! Media engine
//!
//! This module handles the two conversions a job needs:
//! - Lossless concatenation of segments listed in a concat file
//! - Audio extraction and re-encoding to a target format
//!
//! `FfmpegCli` runs the ffmpeg binaries; tests use an in-process fake.

pub mod cli;
pub mod progress;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::config::AudioConfig;
use crate::error::EngineError;

pub use cli::FfmpegCli;
pub use progress::ProgressTracker;

/// Progress callback, 0..=100
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Output parameters for an audio encode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTarget {
    /// ffmpeg encoder name, e.g. `libmp3lame`, `pcm_s16le`
    pub codec: String,
    pub channels: u16,
    pub sample_rate: u32,
    /// `None` for codecs without a bitrate setting (PCM)
    pub bitrate_kbps: Option<u32>,
    /// ffmpeg muxer name, e.g. `mp3`, `wav`
    pub format: String,
    /// File extension of the output
    pub extension: String,
    /// Drop container metadata (ID3 tags, LIST chunks)
    pub strip_metadata: bool,
}

impl AudioTarget {
    /// Mono 16 kHz PCM WAV, the format speech providers handle best
    pub fn pcm_wav_mono_16k() -> Self {
        Self {
            codec: "pcm_s16le".to_string(),
            channels: 1,
            sample_rate: 16_000,
            bitrate_kbps: None,
            format: "wav".to_string(),
            extension: "wav".to_string(),
            strip_metadata: true,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self.extension.as_str() {
            "mp3" => "audio/mpeg",
            "wav" => "audio/wav",
            "m4a" | "aac" => "audio/mp4",
            "ogg" | "opus" => "audio/ogg",
            "flac" => "audio/flac",
            _ => "application/octet-stream",
        }
    }
}

impl From<&AudioConfig> for AudioTarget {
    fn from(cfg: &AudioConfig) -> Self {
        Self {
            codec: cfg.codec.clone(),
            channels: cfg.channels,
            sample_rate: cfg.sample_rate,
            bitrate_kbps: cfg.bitrate_kbps,
            format: cfg.format.clone(),
            extension: cfg.extension.clone(),
            strip_metadata: cfg.strip_metadata,
        }
    }
}

#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Stream-copy the files named in `file_list` into `output`
    async fn concat(&self, file_list: &Path, output: &Path) -> Result<(), EngineError>;

    /// Decode the audio of `input` and encode it to `output`
    async fn transcode_audio(
        &self,
        input: &Path,
        output: &Path,
        target: &AudioTarget,
        progress: Option<ProgressFn>,
    ) -> Result<(), EngineError>;
}
