use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use super::{AudioTarget, MediaEngine, ProgressFn, ProgressTracker};
use crate::error::EngineError;

/// Lines of stderr kept for error messages
const STDERR_TAIL_LINES: usize = 20;

/// `MediaEngine` backed by the ffmpeg and ffprobe executables
#[derive(Debug, Clone)]
pub struct FfmpegCli {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for FfmpegCli {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl FfmpegCli {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Duration of a media file according to ffprobe
    pub async fn probe_duration(&self, input: &Path) -> Result<Duration, EngineError> {
        let program = self.ffprobe.display().to_string();
        let output = Command::new(&self.ffprobe)
            .args(probe_args(input))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| EngineError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(EngineError::Failed {
                program,
                status: output.status.to_string(),
                stderr: tail(&String::from_utf8_lossy(&output.stderr)),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout);
        text.trim()
            .parse::<f64>()
            .ok()
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map(Duration::from_secs_f64)
            .ok_or_else(|| EngineError::Failed {
                program,
                status: output.status.to_string(),
                stderr: format!("unparseable duration {:?}", text.trim()),
            })
    }

    async fn run_ffmpeg(
        &self,
        args: Vec<OsString>,
        mut progress: Option<ProgressTracker>,
    ) -> Result<(), EngineError> {
        let program = self.ffmpeg.display().to_string();
        tracing::debug!(program = %program, ?args, "Running ffmpeg");

        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EngineError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let read_progress = async {
            if let Some(out) = stdout {
                let mut lines = BufReader::new(out).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(tracker) = progress.as_mut() {
                        tracker.feed(&line);
                    }
                }
            }
        };
        let read_stderr = async {
            let mut buf = String::new();
            if let Some(mut err) = stderr {
                if let Err(e) = err.read_to_string(&mut buf).await {
                    tracing::debug!(program = %program, error = %e, "Failed to read stderr");
                }
            }
            buf
        };

        let (status, (), stderr) = tokio::join!(child.wait(), read_progress, read_stderr);
        let status = status?;

        if status.success() {
            Ok(())
        } else {
            Err(EngineError::Failed {
                program,
                status: status.to_string(),
                stderr: tail(&stderr),
            })
        }
    }
}

#[async_trait]
impl MediaEngine for FfmpegCli {
    async fn concat(&self, file_list: &Path, output: &Path) -> Result<(), EngineError> {
        self.run_ffmpeg(concat_args(file_list, output), None).await
    }

    async fn transcode_audio(
        &self,
        input: &Path,
        output: &Path,
        target: &AudioTarget,
        progress: Option<ProgressFn>,
    ) -> Result<(), EngineError> {
        validate_target(target)?;

        let tracker = match progress {
            Some(callback) => {
                let total = match self.probe_duration(input).await {
                    Ok(d) => Some(d),
                    Err(e) => {
                        tracing::warn!(input = %input.display(), error = %e, "Could not probe duration");
                        None
                    }
                };
                Some(ProgressTracker::new(total, callback))
            }
            None => None,
        };

        self.run_ffmpeg(transcode_args(input, output, target), tracker)
            .await
    }
}

fn validate_target(target: &AudioTarget) -> Result<(), EngineError> {
    if target.codec.is_empty() || target.format.is_empty() {
        return Err(EngineError::Unsupported(
            "codec and format must be set".to_string(),
        ));
    }
    if target.channels == 0 || target.sample_rate == 0 {
        return Err(EngineError::Unsupported(format!(
            "{} channel(s) at {} Hz",
            target.channels, target.sample_rate
        )));
    }
    Ok(())
}

fn base_args() -> Vec<OsString> {
    ["-hide_banner", "-nostdin", "-loglevel", "error", "-y"]
        .iter()
        .map(OsString::from)
        .collect()
}

/// Concat demuxer, stream copy
pub fn concat_args(file_list: &Path, output: &Path) -> Vec<OsString> {
    let mut args = base_args();
    args.extend(
        ["-f", "concat", "-safe", "0", "-i"]
            .iter()
            .map(OsString::from),
    );
    args.push(file_list.into());
    args.extend(["-c", "copy"].iter().map(OsString::from));
    args.push(output.into());
    args
}

pub fn transcode_args(input: &Path, output: &Path, target: &AudioTarget) -> Vec<OsString> {
    let mut args = base_args();
    args.push("-i".into());
    args.push(input.into());

    let mut opts: Vec<String> = vec![
        "-vn".into(),
        "-ac".into(),
        target.channels.to_string(),
        "-ar".into(),
        target.sample_rate.to_string(),
    ];
    if let Some(kbps) = target.bitrate_kbps {
        opts.push("-b:a".into());
        opts.push(format!("{}k", kbps));
    }
    opts.push("-c:a".into());
    opts.push(target.codec.clone());
    if target.strip_metadata {
        opts.extend(["-map_metadata", "-1", "-fflags", "+bitexact", "-flags:a", "+bitexact"].map(String::from));
        if target.format == "mp3" {
            opts.extend(["-id3v2_version", "0", "-write_id3v1", "0"].map(String::from));
        }
    }
    opts.extend(["-f".to_string(), target.format.clone()]);
    opts.extend(["-progress", "pipe:1", "-nostats"].map(String::from));

    args.extend(opts.into_iter().map(OsString::from));
    args.push(output.into());
    args
}

fn probe_args(input: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-v",
        "error",
        "-show_entries",
        "format=duration",
        "-of",
        "default=noprint_wrappers=1:nokey=1",
    ]
    .iter()
    .map(OsString::from)
    .collect();
    args.push(input.into());
    args
}

fn tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.trim().lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}
