//! Job pipeline
//!
//! One job runs its stages strictly in sequence:
//! lookup/resolve -> fetch -> assemble -> transcode -> (transcribe).
//! The job's workspace is created before resolution. On success the job is
//! registered Ready with an expiry; on any error the workspace is deleted
//! before the error is handed back.

use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::ServerConfig;
use crate::error::{JobError, ResolutionError, Result};
use crate::ffmpeg::{AudioTarget, MediaEngine, ProgressFn};
use crate::job::workspace::remove_dir;
use crate::job::{Artifact, ArtifactKind, Job, JobId, JobState, JobStore, Workspace};
use crate::lookup::{parse_reference, JobInput, ManifestLookup};
use crate::net::HttpFetch;
use crate::playlist::{Manifest, ManifestResolver};
use crate::segment::{DownloadedSegment, SegmentFetcher};
use crate::transcode::{Assembler, Transcoder};
use crate::transcribe::{SpeechProvider, Transcriber, TranscriptionOptions};

/// Collaborators injected into the pipeline
pub struct PipelineDeps {
    pub http: Arc<dyn HttpFetch>,
    pub engine: Arc<dyn MediaEngine>,
    /// `None` disables transcription
    pub speech: Option<Arc<dyn SpeechProvider>>,
    pub lookup: Arc<dyn ManifestLookup>,
    pub store: Arc<JobStore>,
}

/// An accepted job that has not run yet
#[derive(Debug)]
pub struct JobHandle {
    pub id: JobId,
    input: JobInput,
    transcribe: bool,
    cancel: CancellationToken,
}

pub struct Pipeline {
    lookup: Arc<dyn ManifestLookup>,
    resolver: ManifestResolver,
    fetcher: SegmentFetcher,
    assembler: Assembler,
    transcoder: Transcoder,
    transcriber: Option<Transcriber>,
    store: Arc<JobStore>,
}

impl Pipeline {
    pub fn new(deps: PipelineDeps, config: &ServerConfig) -> Self {
        let transcriber = deps.speech.map(|provider| {
            Transcriber::new(
                provider,
                deps.engine.clone(),
                TranscriptionOptions::from(&config.transcription),
            )
        });

        Self {
            lookup: deps.lookup,
            resolver: ManifestResolver::new(deps.http.clone()),
            fetcher: SegmentFetcher::new(
                deps.http,
                config.fetch.max_concurrent_downloads,
                config.fetch.retry_policy(),
            ),
            assembler: Assembler::new(deps.engine.clone()),
            transcoder: Transcoder::new(deps.engine, AudioTarget::from(&config.audio)),
            transcriber,
            store: deps.store,
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn can_transcribe(&self) -> bool {
        self.transcriber.is_some()
    }

    /// Validate the input and register a Pending job
    pub fn submit(&self, input: &str, transcribe: bool) -> Result<JobHandle> {
        let input = parse_reference(input)?;
        if transcribe && self.transcriber.is_none() {
            return Err(JobError::InputValidation(
                "transcription is not configured on this server".to_string(),
            ));
        }
        let (id, cancel) = self.store.create(&input.reference());
        Ok(JobHandle {
            id,
            input,
            transcribe,
            cancel,
        })
    }

    /// Submit and run to completion
    pub async fn process(&self, input: &str, transcribe: bool) -> Result<Job> {
        let handle = self.submit(input, transcribe)?;
        self.run(handle).await
    }

    /// Run an accepted job on its own task. A run that panics still fails
    /// the job and removes its workspace.
    pub fn spawn(self: Arc<Self>, handle: JobHandle) -> JoinHandle<Result<Job>> {
        let id = handle.id;
        let pipeline = self.clone();
        let run = tokio::spawn(async move { pipeline.run(handle).await });
        tokio::spawn(async move {
            match run.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(job_id = %id, error = %e, "Job task aborted");
                    self.discard(&id).await;
                    Err(JobError::Internal(format!("job {} aborted: {}", id, e)))
                }
            }
        })
    }

    async fn discard(&self, id: &JobId) {
        let dir = Workspace::dir_for(self.store.workspace_root(), id);
        if let Err(e) = remove_dir(&dir).await {
            tracing::warn!(job_id = %id, dir = %dir.display(), error = %e, "Failed to remove workspace of aborted job");
        }
        self.store.fail(id);
    }

    /// Run an accepted job. Returns the Ready job, or the error of the
    /// first failing stage after the workspace has been removed.
    pub async fn run(&self, handle: JobHandle) -> Result<Job> {
        let id = handle.id;

        let workspace = match Workspace::create(self.store.workspace_root(), &id).await {
            Ok(ws) => ws,
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "Failed to create workspace");
                self.store.fail(&id);
                return Err(e.into());
            }
        };

        let result = match self.execute(&handle, &workspace).await {
            Ok(artifacts) => self.store.complete(&id, artifacts),
            Err(e) => Err(e),
        };

        match result {
            Ok(job) => Ok(job),
            Err(e) => {
                tracing::error!(job_id = %id, kind = e.kind(), error = %e, "Job failed");
                if let Err(cleanup) = workspace.remove().await {
                    tracing::warn!(
                        job_id = %id,
                        dir = %workspace.path().display(),
                        error = %cleanup,
                        "Failed to remove workspace of failed job"
                    );
                }
                self.store.fail(&id);
                Err(e)
            }
        }
    }

    async fn execute(&self, handle: &JobHandle, workspace: &Workspace) -> Result<Vec<Artifact>> {
        let id = handle.id;
        let cancel = &handle.cancel;

        self.advance(&id, JobState::Resolving, cancel, 5)?;
        let manifests = self.resolve(&id, &handle.input, cancel).await?;

        self.advance(&id, JobState::Fetching, cancel, 10)?;
        let mut segments: Vec<DownloadedSegment> = Vec::new();
        for (index, manifest) in manifests.iter().enumerate() {
            let fetched = self.fetcher.fetch_all(index, manifest, workspace, cancel).await?;
            segments.extend(fetched);
        }

        self.advance(&id, JobState::Assembling, cancel, 60)?;
        let merged = stage(cancel, "assembly", self.assembler.assemble(&segments, workspace)).await?;
        let merged_size = tokio::fs::metadata(&merged).await?.len();

        self.advance(&id, JobState::Transcoding, cancel, 70)?;
        let (audio, audio_size) = stage(
            cancel,
            "transcoding",
            self.transcoder.transcode(&merged, workspace, Some(self.progress_sink(id))),
        )
        .await?;

        let mut artifacts = vec![
            Artifact::file(ArtifactKind::AssembledVideo, merged, merged_size),
            Artifact::file(ArtifactKind::EncodedAudio, audio.clone(), audio_size),
        ];

        if handle.transcribe {
            if let Some(transcriber) = &self.transcriber {
                self.advance(&id, JobState::Transcribing, cancel, 90)?;
                let mime = self.transcoder.target().mime_type();
                let text = stage(cancel, "transcription", transcriber.transcribe(&audio, mime, workspace)).await?;
                artifacts.push(Artifact::text(ArtifactKind::TranscriptText, text));
            }
        }

        Ok(artifacts)
    }

    async fn resolve(&self, id: &JobId, input: &JobInput, cancel: &CancellationToken) -> Result<Vec<Manifest>> {
        let urls: Vec<Url> = match input {
            JobInput::Manifest(url) => vec![url.clone()],
            JobInput::Reference(reference) => {
                stage(cancel, "lookup", self.lookup.manifest_urls(reference)).await?
            }
        };

        let mut manifests = Vec::new();
        for (n, url) in urls.iter().enumerate() {
            let resolved = stage(cancel, "resolution", async {
                self.resolver.resolve(url).await.map_err(JobError::from)
            })
            .await;

            match resolved {
                Ok(found) => {
                    tracing::info!(job_id = %id, url = %url, manifests = found.len(), "Manifest resolved");
                    manifests.extend(found);
                }
                Err(JobError::Resolution(e)) if e.is_empty() => {
                    tracing::warn!(job_id = %id, manifest = n, url = %url, "No segments in manifest, skipping");
                }
                Err(e) => return Err(e),
            }
        }

        if manifests.is_empty() {
            return Err(ResolutionError::NoSegments {
                manifests: urls.len(),
            }
            .into());
        }
        Ok(manifests)
    }

    fn advance(&self, id: &JobId, next: JobState, cancel: &CancellationToken, progress: u8) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(JobError::Cancelled(format!("job {} cancelled before {}", id, next)));
        }
        if !self.store.transition(id, next) {
            return Err(JobError::Cancelled(format!("job {} is no longer active", id)));
        }
        self.store.set_progress(id, progress);
        Ok(())
    }

    /// Map transcode progress onto the 70..90 band of overall job progress
    fn progress_sink(&self, id: JobId) -> ProgressFn {
        let store = self.store.clone();
        Arc::new(move |percent| store.set_progress(&id, 70 + percent.min(100) / 5))
    }
}

/// Run one stage, abandoning it if the job is cancelled
async fn stage<T, F>(cancel: &CancellationToken, name: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(JobError::Cancelled(format!("cancelled during {}", name))),
        result = fut => result,
    }
}
