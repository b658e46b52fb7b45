//! Concurrent job store with TTL expiry
//!
//! Jobs are keyed by id in a `DashMap`. Ready jobs carry an expiry
//! timestamp; a background sweep evicts expired jobs, deleting their
//! workspace and leaving a tombstone so late retrievals report expiry
//! rather than "unknown job". Job directories left behind by a previous
//! process are purged at startup.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::workspace::{remove_dir, Workspace};
use super::{Artifact, ArtifactKind, ArtifactPayload, Job, JobId, JobState};
use crate::clock::Clock;
use crate::error::{JobError, Result};

/// Artifact content ready to be sent
#[derive(Debug)]
pub enum ArtifactBody {
    Text(Bytes),
    /// Open file handle with its length; streamed rather than buffered
    File { file: tokio::fs::File, len: u64 },
}

struct JobEntry {
    job: Job,
    cancel: CancellationToken,
}

/// Store of live jobs (job_id -> Job)
pub struct JobStore {
    jobs: DashMap<JobId, JobEntry>,
    /// Tombstones of swept jobs (job_id -> expiry time)
    expired: DashMap<JobId, DateTime<Utc>>,
    workspace_root: PathBuf,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl JobStore {
    /// `workspace_root` is made absolute against the current directory.
    pub fn new(workspace_root: PathBuf, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let workspace_root = std::path::absolute(&workspace_root).unwrap_or_else(|e| {
            tracing::warn!(
                dir = %workspace_root.display(),
                error = %e,
                "Cannot make workspace root absolute"
            );
            workspace_root
        });
        Self {
            jobs: DashMap::new(),
            expired: DashMap::new(),
            workspace_root,
            ttl,
            clock,
        }
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    fn ttl_delta(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::days(365))
    }

    /// Register a new pending job and hand back its cancellation token
    pub fn create(&self, reference: &str) -> (JobId, CancellationToken) {
        let id = JobId::new();
        let cancel = CancellationToken::new();
        let job = Job::new(
            id,
            reference.to_string(),
            Workspace::dir_for(&self.workspace_root, &id),
            self.clock.now(),
        );
        self.jobs.insert(
            id,
            JobEntry {
                job,
                cancel: cancel.clone(),
            },
        );
        tracing::info!(job_id = %id, reference, "Job accepted");
        (id, cancel)
    }

    /// Move a job to its next state. Returns false if the job is gone or
    /// the transition is not allowed.
    pub fn transition(&self, id: &JobId, next: JobState) -> bool {
        let Some(mut entry) = self.jobs.get_mut(id) else {
            return false;
        };
        let current = entry.job.state;
        if !current.can_transition_to(next) {
            tracing::warn!(job_id = %id, from = %current, to = %next, "Rejected job state transition");
            return false;
        }
        entry.job.state = next;
        tracing::debug!(job_id = %id, from = %current, to = %next, "Job state changed");
        true
    }

    pub fn set_progress(&self, id: &JobId, percent: u8) {
        if let Some(mut entry) = self.jobs.get_mut(id) {
            entry.job.progress = percent.min(100);
        }
    }

    /// Mark a job Ready with its artifacts and start its TTL
    pub fn complete(&self, id: &JobId, artifacts: Vec<Artifact>) -> Result<Job> {
        let mut entry = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| JobError::NotFound(format!("job {}", id)))?;
        let current = entry.job.state;
        if !current.can_transition_to(JobState::Ready) {
            return Err(JobError::NotReady {
                job_id: id.to_string(),
                state: current,
            });
        }

        let now = self.clock.now();
        entry.job.state = JobState::Ready;
        entry.job.completed_at = Some(now);
        entry.job.expires_at = Some(now + self.ttl_delta());
        entry.job.artifacts = artifacts;
        entry.job.progress = 100;

        tracing::info!(
            job_id = %id,
            artifacts = entry.job.artifacts.len(),
            ttl_secs = self.ttl.as_secs(),
            "Job ready"
        );
        Ok(entry.job.clone())
    }

    /// Drop a failed job from the store. The caller owns workspace cleanup.
    pub fn fail(&self, id: &JobId) -> Option<Job> {
        self.jobs.remove(id).map(|(_, mut entry)| {
            let previous = entry.job.state;
            entry.job.state = JobState::Failed;
            tracing::debug!(job_id = %id, from = %previous, "Job failed");
            entry.job
        })
    }

    /// Snapshot of a job
    pub fn get(&self, id: &JobId) -> Result<Job> {
        let now = self.clock.now();
        if let Some(entry) = self.jobs.get(id) {
            if entry.job.is_expired(now) {
                return Err(JobError::WorkspaceExpired(id.to_string()));
            }
            return Ok(entry.job.clone());
        }
        if self.expired.contains_key(id) {
            return Err(JobError::WorkspaceExpired(id.to_string()));
        }
        Err(JobError::NotFound(format!("job {}", id)))
    }

    /// Look up a servable artifact
    pub fn artifact(&self, id: &JobId, kind: ArtifactKind) -> Result<Artifact> {
        let job = self.get(id)?;
        if job.state != JobState::Ready {
            return Err(JobError::NotReady {
                job_id: id.to_string(),
                state: job.state,
            });
        }
        job.artifact(kind)
            .cloned()
            .ok_or_else(|| JobError::NotFound(format!("{} artifact for job {}", kind, id)))
    }

    /// Open an artifact for sending. A file deleted between lookup and
    /// open reports expiry.
    pub async fn open_artifact(&self, id: &JobId, kind: ArtifactKind) -> Result<(Artifact, ArtifactBody)> {
        let artifact = self.artifact(id, kind)?;
        let body = match &artifact.payload {
            ArtifactPayload::Text(text) => ArtifactBody::Text(Bytes::from(text.clone())),
            ArtifactPayload::File(path) => {
                let file = match tokio::fs::File::open(path).await {
                    Ok(file) => file,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        return Err(JobError::WorkspaceExpired(id.to_string()));
                    }
                    Err(e) => return Err(e.into()),
                };
                let len = file.metadata().await?.len();
                ArtifactBody::File { file, len }
            }
        };
        Ok((artifact, body))
    }

    /// Load an artifact's bytes
    #[cfg(test)]
    pub async fn read_artifact(&self, id: &JobId, kind: ArtifactKind) -> Result<(Artifact, Bytes)> {
        use tokio::io::AsyncReadExt;

        let (artifact, body) = self.open_artifact(id, kind).await?;
        let data = match body {
            ArtifactBody::Text(text) => text,
            ArtifactBody::File { mut file, len } => {
                let mut buf = Vec::with_capacity(len as usize);
                file.read_to_end(&mut buf).await?;
                Bytes::from(buf)
            }
        };
        Ok((artifact, data))
    }

    /// Cancel a running job, or expire a ready one immediately
    pub async fn cancel(&self, id: &JobId) -> Result<JobState> {
        let state = self.get(id)?.state;
        if state.is_processing() {
            if let Some(entry) = self.jobs.get(id) {
                entry.cancel.cancel();
            }
            tracing::info!(job_id = %id, state = %state, "Job cancellation requested");
            return Ok(state);
        }

        match self.jobs.remove_if(id, |_, e| e.job.state == JobState::Ready) {
            Some((_, entry)) => {
                self.retire(entry, self.clock.now()).await;
                Ok(JobState::Expired)
            }
            None => Err(JobError::NotFound(format!("job {}", id))),
        }
    }

    /// All live jobs
    pub fn list(&self) -> Vec<Job> {
        self.jobs.iter().map(|e| e.job.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Evict every expired job. Returns the number of jobs removed.
    pub async fn sweep(&self) -> usize {
        let now = self.clock.now();
        let due: Vec<JobId> = self
            .jobs
            .iter()
            .filter(|e| e.job.is_expired(now))
            .map(|e| *e.key())
            .collect();

        let mut removed = 0;
        for id in due {
            // remove_if re-checks under the shard lock, so concurrent sweeps
            // never evict the same job twice
            if let Some((_, entry)) = self.jobs.remove_if(&id, |_, e| e.job.is_expired(now)) {
                self.retire(entry, now).await;
                removed += 1;
            }
        }

        let ttl = self.ttl_delta();
        self.expired.retain(|_, expired_at| now - *expired_at < ttl);

        removed
    }

    /// Remove job directories under the workspace root that no live job
    /// owns. Returns the number of directories removed.
    pub async fn purge_orphans(&self) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.workspace_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
            Err(e) => {
                tracing::warn!(
                    dir = %self.workspace_root.display(),
                    error = %e,
                    "Cannot scan workspace root"
                );
                return 0;
            }
        };

        let mut removed = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Workspace root scan aborted");
                    break;
                }
            };
            // Only directories named like a job id are ours
            let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<JobId>().ok())
            else {
                continue;
            };
            if self.jobs.contains_key(&id) {
                continue;
            }
            if !entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }

            let dir = entry.path();
            match remove_dir(&dir).await {
                Ok(()) => {
                    tracing::info!(job_id = %id, dir = %dir.display(), "Removed orphaned workspace");
                    removed += 1;
                }
                Err(e) => tracing::warn!(
                    job_id = %id,
                    dir = %dir.display(),
                    error = %e,
                    "Failed to remove orphaned workspace"
                ),
            }
        }
        removed
    }

    async fn retire(&self, mut entry: JobEntry, now: DateTime<Utc>) {
        let id = entry.job.id;
        entry.job.state = JobState::Expired;
        self.expired
            .insert(id, entry.job.expires_at.unwrap_or(now).min(now));

        if let Err(e) = remove_dir(&entry.job.workspace).await {
            tracing::warn!(
                job_id = %id,
                dir = %entry.job.workspace.display(),
                error = %e,
                "Failed to remove expired workspace"
            );
        }
        tracing::info!(job_id = %id, "Job expired");
    }

    /// Background task running `sweep` every `every` until `shutdown` fires
    pub fn spawn_sweeper(
        self: Arc<Self>,
        every: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let removed = self.sweep().await;
                        if removed > 0 {
                            tracing::info!("Evicted {} expired job(s)", removed);
                        }
                    }
                }
            }
            tracing::debug!("Job sweeper stopped");
        })
    }
}
