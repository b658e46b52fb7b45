//! Job records, lifecycle states and artifacts

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::JobError;

/// Opaque unique job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(JobId)
            .map_err(|_| JobError::NotFound(format!("job {}", s)))
    }
}

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Resolving,
    Fetching,
    Assembling,
    Transcoding,
    Transcribing,
    Ready,
    Expired,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Resolving => "resolving",
            JobState::Fetching => "fetching",
            JobState::Assembling => "assembling",
            JobState::Transcoding => "transcoding",
            JobState::Transcribing => "transcribing",
            JobState::Ready => "ready",
            JobState::Expired => "expired",
            JobState::Failed => "failed",
        }
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Expired | Failed, _) => false,
            (_, Failed) => true,
            (Pending, Resolving)
            | (Resolving, Fetching)
            | (Fetching, Assembling)
            | (Assembling, Transcoding)
            | (Transcoding, Transcribing)
            | (Transcoding, Ready)
            | (Transcribing, Ready)
            | (Ready, Expired) => true,
            _ => false,
        }
    }

    /// Still working through pipeline stages
    pub fn is_processing(self) -> bool {
        !matches!(self, JobState::Ready | JobState::Expired | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of artifact produced by a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    AssembledVideo,
    EncodedAudio,
    TranscriptText,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::AssembledVideo => "assembled-video",
            ArtifactKind::EncodedAudio => "encoded-audio",
            ArtifactKind::TranscriptText => "transcript-text",
        }
    }

    /// Short name used in URLs and download file names
    pub fn short_name(&self) -> &'static str {
        match self {
            ArtifactKind::AssembledVideo => "video",
            ArtifactKind::EncodedAudio => "audio",
            ArtifactKind::TranscriptText => "transcript",
        }
    }
}

impl FromStr for ArtifactKind {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "video" | "assembled-video" => Ok(ArtifactKind::AssembledVideo),
            "audio" | "encoded-audio" => Ok(ArtifactKind::EncodedAudio),
            "transcript" | "transcript-text" => Ok(ArtifactKind::TranscriptText),
            other => Err(JobError::NotFound(format!("artifact kind {}", other))),
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an artifact's bytes live
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactPayload {
    File(PathBuf),
    Text(String),
}

/// A finished, immutable job output
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub payload: ArtifactPayload,
    pub size_bytes: u64,
}

impl Artifact {
    pub fn file(kind: ArtifactKind, path: PathBuf, size_bytes: u64) -> Self {
        Self {
            kind,
            payload: ArtifactPayload::File(path),
            size_bytes,
        }
    }

    pub fn text(kind: ArtifactKind, text: String) -> Self {
        let size_bytes = text.len() as u64;
        Self {
            kind,
            payload: ArtifactPayload::Text(text),
            size_bytes,
        }
    }

    /// File extension used for downloads
    pub fn extension(&self) -> String {
        match &self.payload {
            ArtifactPayload::File(path) => path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("bin")
                .to_string(),
            ArtifactPayload::Text(_) => "txt".to_string(),
        }
    }

    /// MIME type served for this artifact
    pub fn content_type(&self) -> &'static str {
        match self.extension().as_str() {
            "ts" => "video/mp2t",
            "mp4" | "m4v" => "video/mp4",
            "mkv" => "video/x-matroska",
            "mp3" => "audio/mpeg",
            "m4a" | "aac" => "audio/mp4",
            "wav" => "audio/wav",
            "ogg" | "opus" => "audio/ogg",
            "flac" => "audio/flac",
            "txt" => "text/plain; charset=utf-8",
            _ => "application/octet-stream",
        }
    }
}

/// One conversion request and everything it produced
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub reference: String,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub workspace: PathBuf,
    pub artifacts: Vec<Artifact>,
    pub progress: u8,
}

impl Job {
    pub fn new(id: JobId, reference: String, workspace: PathBuf, now: DateTime<Utc>) -> Self {
        Self {
            id,
            reference,
            state: JobState::Pending,
            created_at: now,
            completed_at: None,
            expires_at: None,
            workspace,
            artifacts: Vec::new(),
            progress: 0,
        }
    }

    /// Ready and past its expiry timestamp
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Ready && self.expires_at.map(|at| now >= at).unwrap_or(false)
    }

    pub fn artifact(&self, kind: ArtifactKind) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.kind == kind)
    }

    pub fn transcript(&self) -> Option<&str> {
        self.artifact(ArtifactKind::TranscriptText)
            .and_then(|a| match &a.payload {
                ArtifactPayload::Text(text) => Some(text.as_str()),
                ArtifactPayload::File(_) => None,
            })
    }
}
