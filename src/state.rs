//! Application state management
//!
//! This module defines the AppState structure that holds:
//! - The job store (live jobs, tombstones, workspaces)
//! - The job pipeline and its collaborators
//! - Server configuration
//! - The shutdown token shared with background tasks

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::clock::{Clock, SystemClock};
use crate::config::ServerConfig;
use crate::error::{JobError, Result};
use crate::ffmpeg::{FfmpegCli, MediaEngine};
use crate::job::JobStore;
use crate::lookup::{self, ManifestLookup};
use crate::net::{HttpClient, HttpFetch};
use crate::pipeline::{Pipeline, PipelineDeps};
use crate::transcribe::{DeepgramProvider, SpeechProvider};

/// Application state shared across all handlers
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<JobStore>,
    pub pipeline: Arc<Pipeline>,
    /// Cancelled on server shutdown
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Build production collaborators from configuration
    pub fn from_config(config: ServerConfig) -> Result<Self> {
        let client = HttpClient::new(config.fetch.request_timeout())?;
        let speech: Option<Arc<dyn SpeechProvider>> = if config.transcription.is_available() {
            let base = Url::parse(&config.transcription.base_url).map_err(|e| {
                JobError::Config(format!(
                    "invalid transcription base URL {:?}: {}",
                    config.transcription.base_url, e
                ))
            })?;
            let key = config.transcription.api_key.clone().unwrap_or_default();
            Some(Arc::new(DeepgramProvider::new(client.inner().clone(), base, key)))
        } else {
            tracing::info!("Transcription disabled (no API key configured)");
            None
        };

        let http: Arc<dyn HttpFetch> = Arc::new(client);
        let lookup = lookup::from_config(&config.lookup, http.clone())?;
        let engine: Arc<dyn MediaEngine> = Arc::new(FfmpegCli::new(
            config.ffmpeg_path.clone(),
            config.ffprobe_path.clone(),
        ));

        Ok(Self::with_parts(
            config,
            http,
            engine,
            speech,
            lookup,
            Arc::new(SystemClock),
        ))
    }

    /// Assemble state around injected collaborators
    pub fn with_parts(
        config: ServerConfig,
        http: Arc<dyn HttpFetch>,
        engine: Arc<dyn MediaEngine>,
        speech: Option<Arc<dyn SpeechProvider>>,
        lookup: Arc<dyn ManifestLookup>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = Arc::new(JobStore::new(
            config.workspace_root.clone(),
            config.jobs.ttl(),
            clock,
        ));
        let pipeline = Arc::new(Pipeline::new(
            PipelineDeps {
                http,
                engine,
                speech,
                lookup,
                store: store.clone(),
            },
            &config,
        ));

        Self {
            config,
            store,
            pipeline,
            shutdown: CancellationToken::new(),
        }
    }

    /// Start the periodic expiry sweep
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        self.store
            .clone()
            .spawn_sweeper(self.config.jobs.sweep_interval(), self.shutdown.clone())
    }

    /// Signal shutdown
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config(root: &std::path::Path) -> ServerConfig {
        ServerConfig {
            workspace_root: root.to_path_buf(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_app_state_creation() {
        let root = tempdir().unwrap();
        let state = AppState::from_config(config(root.path())).unwrap();
        assert!(state.store.is_empty());
        assert!(!state.pipeline.can_transcribe());
        assert!(!state.shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_transcription_enabled_with_key() {
        let root = tempdir().unwrap();
        let mut cfg = config(root.path());
        cfg.transcription.api_key = Some("dg".to_string());
        let state = AppState::from_config(cfg).unwrap();
        assert!(state.pipeline.can_transcribe());
    }

    #[tokio::test]
    async fn test_invalid_lookup_endpoint_rejected() {
        let root = tempdir().unwrap();
        let mut cfg = config(root.path());
        cfg.lookup.endpoint = Some("not a url".to_string());
        assert!(matches!(
            AppState::from_config(cfg),
            Err(JobError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_stops_sweeper() {
        let root = tempdir().unwrap();
        let state = AppState::from_config(config(root.path())).unwrap();
        let handle = state.spawn_sweeper();
        state.shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(state.shutdown.is_cancelled());
    }
}
