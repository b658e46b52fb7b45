//! HTTP request handlers
//!
//! Implements handlers for the job endpoints.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::io::ReaderStream;

use crate::error::JobError;
use crate::job::{ArtifactBody, ArtifactKind, Job, JobId, JobState};
use crate::state::AppState;

/// HTTP error type
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl HttpError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: "internal",
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.kind,
            "message": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<JobError> for HttpError {
    fn from(err: JobError) -> Self {
        let status = match &err {
            JobError::InputValidation(_) => StatusCode::BAD_REQUEST,
            JobError::NotFound(_) => StatusCode::NOT_FOUND,
            JobError::WorkspaceExpired(_) => StatusCode::GONE,
            JobError::NotReady { .. } | JobError::Cancelled(_) => StatusCode::CONFLICT,
            JobError::Lookup(_)
            | JobError::Resolution(_)
            | JobError::Fetch(_)
            | JobError::Transcription(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// POST /jobs body
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    /// Manifest URL, recording id or session page URL
    pub input: String,
    #[serde(default)]
    pub transcribe: bool,
    /// Respond once the job finished (default) or right after acceptance
    #[serde(default = "default_wait")]
    pub wait: bool,
}

fn default_wait() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct ArtifactSummary {
    pub kind: ArtifactKind,
    pub size_bytes: u64,
    pub content_type: &'static str,
    pub url: String,
}

/// Job status as returned by the API
#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub id: JobId,
    pub reference: String,
    pub state: JobState,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub artifacts: Vec<ArtifactSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            reference: job.reference.clone(),
            state: job.state,
            progress: job.progress,
            created_at: job.created_at,
            completed_at: job.completed_at,
            expires_at: job.expires_at,
            artifacts: job
                .artifacts
                .iter()
                .map(|a| ArtifactSummary {
                    kind: a.kind,
                    size_bytes: a.size_bytes,
                    content_type: a.content_type(),
                    url: format!("/jobs/{}/artifacts/{}", job.id, a.kind.short_name()),
                })
                .collect(),
            transcript: job.transcript().map(str::to_string),
        }
    }
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "OK"
}

/// Version endpoint
pub async fn version_check() -> &'static str {
    concat!("hls-assembler v", env!("CARGO_PKG_VERSION"))
}

/// Submit a job
/// POST /jobs
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateJobRequest>,
) -> Result<Response, HttpError> {
    let handle = state.pipeline.submit(&req.input, req.transcribe)?;
    let id = handle.id;
    let accepted = state.store.get(&id)?;

    // Detached: the job outlives a dropped connection
    let task = state.pipeline.clone().spawn(handle);

    if !req.wait {
        return Ok((StatusCode::ACCEPTED, Json(JobSummary::from(&accepted))).into_response());
    }

    let job = task
        .await
        .map_err(|e| HttpError::internal(format!("job {} panicked: {}", id, e)))??;
    Ok((StatusCode::OK, Json(JobSummary::from(&job))).into_response())
}

/// Job status
/// GET /jobs/{id}
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobSummary>, HttpError> {
    let id: JobId = job_id.parse()?;
    let job = state.store.get(&id)?;
    Ok(Json(JobSummary::from(&job)))
}

/// Artifact download
/// GET /jobs/{id}/artifacts/{kind}
pub async fn get_artifact(
    State(state): State<Arc<AppState>>,
    Path((job_id, kind)): Path<(String, String)>,
) -> Result<Response, HttpError> {
    let id: JobId = job_id.parse()?;
    let kind: ArtifactKind = kind.parse()?;
    let (artifact, body) = state.store.open_artifact(&id, kind).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(artifact.content_type()),
    );
    let disposition = format!(
        "attachment; filename=\"{}-{}.{}\"",
        id,
        kind.short_name(),
        artifact.extension()
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    let body = match body {
        ArtifactBody::Text(text) => {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(text.len()));
            Body::from(text)
        }
        ArtifactBody::File { file, len } => {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
            Body::from_stream(ReaderStream::new(file))
        }
    };

    Ok((headers, body).into_response())
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub id: JobId,
    pub state: JobState,
}

/// Cancel a running job or expire a ready one
/// DELETE /jobs/{id}
pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<CancelResponse>, HttpError> {
    let id: JobId = job_id.parse()?;
    let job_state = state.store.cancel(&id).await?;
    Ok(Json(CancelResponse {
        id,
        state: job_state,
    }))
}

/// Live jobs
/// GET /debug/jobs
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobSummary>> {
    let mut jobs = state.store.list();
    jobs.sort_by_key(|j| j.created_at);
    Json(jobs.iter().map(JobSummary::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResolutionError;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (JobError::InputValidation("x".into()), StatusCode::BAD_REQUEST),
            (JobError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (JobError::WorkspaceExpired("x".into()), StatusCode::GONE),
            (JobError::Cancelled("x".into()), StatusCode::CONFLICT),
            (
                JobError::NotReady {
                    job_id: "x".into(),
                    state: JobState::Fetching,
                },
                StatusCode::CONFLICT,
            ),
            (JobError::Lookup("x".into()), StatusCode::BAD_GATEWAY),
            (
                ResolutionError::NoSegments { manifests: 1 }.into(),
                StatusCode::BAD_GATEWAY,
            ),
            (JobError::Transcription("x".into()), StatusCode::BAD_GATEWAY),
            (JobError::Transcode("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (JobError::Assembly("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (JobError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            let kind = err.kind();
            assert_eq!(HttpError::from(err).status(), status, "{}", kind);
        }
    }

    #[test]
    fn test_request_defaults() {
        let req: CreateJobRequest = serde_json::from_str(r#"{"input":"1234"}"#).unwrap();
        assert!(!req.transcribe);
        assert!(req.wait);
    }
}
