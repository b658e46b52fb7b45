//! Container -> audio artifact

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::non_empty_size;
use crate::error::{JobError, Result};
use crate::ffmpeg::{AudioTarget, MediaEngine, ProgressFn};
use crate::job::Workspace;

pub struct Transcoder {
    engine: Arc<dyn MediaEngine>,
    target: AudioTarget,
}

impl Transcoder {
    pub fn new(engine: Arc<dyn MediaEngine>, target: AudioTarget) -> Self {
        Self { engine, target }
    }

    pub fn target(&self) -> &AudioTarget {
        &self.target
    }

    /// Encode `input` to `audio.<ext>` in the workspace.
    ///
    /// The output must exist with a non-zero size afterwards, whatever the
    /// engine reported.
    pub async fn transcode(
        &self,
        input: &Path,
        workspace: &Workspace,
        progress: Option<ProgressFn>,
    ) -> Result<(PathBuf, u64)> {
        let output = workspace.audio_path(&self.target.extension);

        self.engine
            .transcode_audio(input, &output, &self.target, progress)
            .await
            .map_err(|e| JobError::Transcode(e.to_string()))?;

        let size = non_empty_size(&output).await.ok_or_else(|| {
            JobError::Transcode(format!(
                "conversion reported success but {} is missing or empty",
                output.display()
            ))
        })?;

        tracing::info!(
            output = %output.display(),
            bytes = size,
            codec = %self.target.codec,
            channels = self.target.channels,
            sample_rate = self.target.sample_rate,
            "Audio encoded"
        );
        Ok((output, size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::fixtures::FakeEngine;
    use crate::job::JobId;
    use parking_lot::Mutex;
    use tempfile::tempdir;

    fn mp3() -> AudioTarget {
        AudioTarget {
            codec: "libmp3lame".into(),
            channels: 1,
            sample_rate: 16_000,
            bitrate_kbps: Some(64),
            format: "mp3".into(),
            extension: "mp3".into(),
            strip_metadata: false,
        }
    }

    #[tokio::test]
    async fn test_transcode_writes_audio_artifact() {
        let root = tempdir().unwrap();
        let ws = Workspace::create(root.path(), &JobId::new()).await.unwrap();
        let merged = ws.merged_path("ts");
        tokio::fs::write(&merged, b"container").await.unwrap();
        let engine = Arc::new(FakeEngine::new());
        let transcoder = Transcoder::new(engine.clone(), mp3());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress: ProgressFn = Arc::new(move |p| sink.lock().push(p));

        let (path, size) = transcoder.transcode(&merged, &ws, Some(progress)).await.unwrap();

        assert_eq!(path, ws.audio_path("mp3"));
        assert!(size > 0);
        assert_eq!(seen.lock().last(), Some(&100));
        assert_eq!(engine.last_target().unwrap(), mp3());
    }

    #[tokio::test]
    async fn test_zero_byte_output_is_error_even_on_success() {
        let root = tempdir().unwrap();
        let ws = Workspace::create(root.path(), &JobId::new()).await.unwrap();
        let merged = ws.merged_path("ts");
        tokio::fs::write(&merged, b"container").await.unwrap();
        let transcoder = Transcoder::new(Arc::new(FakeEngine::new().empty_audio()), mp3());

        let err = transcoder.transcode(&merged, &ws, None).await.unwrap_err();
        assert!(matches!(err, JobError::Transcode(_)));
    }

    #[tokio::test]
    async fn test_engine_failure_is_transcode_error() {
        let root = tempdir().unwrap();
        let ws = Workspace::create(root.path(), &JobId::new()).await.unwrap();
        let transcoder = Transcoder::new(Arc::new(FakeEngine::new().failing_transcode()), mp3());

        let err = transcoder
            .transcode(&ws.merged_path("ts"), &ws, None)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Transcode(_)));
    }
}
