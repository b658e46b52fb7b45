//! Speech-to-text stage
//!
//! The encoded audio artifact is optionally re-encoded to a provider-friendly
//! PCM WAV copy, sent to a `SpeechProvider`, and the scratch copy is removed
//! as soon as the request finishes.

pub mod deepgram;

use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;

use crate::config::TranscriptionConfig;
use crate::error::{JobError, ProviderError, Result};
use crate::ffmpeg::{AudioTarget, MediaEngine};
use crate::job::workspace::remove_file;
use crate::job::Workspace;
use crate::transcode::non_empty_size;

pub use deepgram::DeepgramProvider;

/// One pre-recorded transcription request
#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    pub audio: Bytes,
    pub mime_type: String,
    pub language: String,
    pub model: String,
    pub smart_format: bool,
    pub punctuate: bool,
}

#[async_trait]
pub trait SpeechProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Returns the formatted transcript text
    async fn transcribe(&self, request: TranscriptionRequest) -> std::result::Result<String, ProviderError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptionOptions {
    pub language: String,
    pub model: String,
    pub smart_format: bool,
    pub punctuate: bool,
    /// Re-encode to mono 16 kHz WAV before sending
    pub reformat: bool,
}

impl From<&TranscriptionConfig> for TranscriptionOptions {
    fn from(cfg: &TranscriptionConfig) -> Self {
        Self {
            language: cfg.language.clone(),
            model: cfg.model.clone(),
            smart_format: cfg.smart_format,
            punctuate: cfg.punctuate,
            reformat: cfg.reformat_to_wav,
        }
    }
}

pub struct Transcriber {
    provider: Arc<dyn SpeechProvider>,
    engine: Arc<dyn MediaEngine>,
    options: TranscriptionOptions,
}

impl Transcriber {
    pub fn new(
        provider: Arc<dyn SpeechProvider>,
        engine: Arc<dyn MediaEngine>,
        options: TranscriptionOptions,
    ) -> Self {
        Self {
            provider,
            engine,
            options,
        }
    }

    /// Transcribe the audio file at `audio` (of type `mime_type`).
    pub async fn transcribe(&self, audio: &Path, mime_type: &str, workspace: &Workspace) -> Result<String> {
        if non_empty_size(audio).await.is_none() {
            return Err(JobError::Transcription(format!(
                "audio input {} is missing or empty",
                audio.display()
            )));
        }

        if !self.options.reformat {
            let data = tokio::fs::read(audio).await?;
            return self.request(Bytes::from(data), mime_type).await;
        }

        let scratch = workspace.transcribe_scratch_path();
        let result = self.reformat_and_request(audio, &scratch).await;

        if let Err(e) = remove_file(&scratch).await {
            tracing::warn!(path = %scratch.display(), error = %e, "Failed to remove transcription scratch file");
        }
        result
    }

    async fn reformat_and_request(&self, audio: &Path, scratch: &Path) -> Result<String> {
        let target = AudioTarget::pcm_wav_mono_16k();
        self.engine
            .transcode_audio(audio, scratch, &target, None)
            .await
            .map_err(|e| JobError::Transcription(format!("reformatting audio failed: {}", e)))?;
        if non_empty_size(scratch).await.is_none() {
            return Err(JobError::Transcription(
                "reformatted audio is empty".to_string(),
            ));
        }
        let data = tokio::fs::read(scratch).await?;
        self.request(Bytes::from(data), target.mime_type()).await
    }

    async fn request(&self, audio: Bytes, mime_type: &str) -> Result<String> {
        let bytes = audio.len();
        let request = TranscriptionRequest {
            audio,
            mime_type: mime_type.to_string(),
            language: self.options.language.clone(),
            model: self.options.model.clone(),
            smart_format: self.options.smart_format,
            punctuate: self.options.punctuate,
        };

        tracing::info!(provider = self.provider.name(), bytes, mime_type, model = %self.options.model, "Requesting transcription");
        let transcript = self
            .provider
            .transcribe(request)
            .await
            .map_err(|e| JobError::Transcription(e.to_string()))?;
        tracing::info!(provider = self.provider.name(), chars = transcript.len(), "Transcription received");
        Ok(transcript)
    }
}
