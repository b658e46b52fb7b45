use thiserror::Error;

use crate::job::JobState;

/// Main error type for assembly jobs
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Invalid job input: {0}")]
    InputValidation(String),

    #[error("Reference lookup failed: {0}")]
    Lookup(String),

    #[error("Manifest resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Segment download failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Assembly failed: {0}")]
    Assembly(String),

    #[error("Transcoding failed: {0}")]
    Transcode(String),

    #[error("Transcription failed: {0}")]
    Transcription(String),

    #[error("Workspace expired for job: {0}")]
    WorkspaceExpired(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Job {job_id} is not ready (state: {state})")]
    NotReady { job_id: String, state: JobState },

    #[error("Job cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Short machine-readable name of the error class
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::InputValidation(_) => "input_validation",
            JobError::Lookup(_) => "lookup",
            JobError::Resolution(_) => "resolution",
            JobError::Fetch(_) => "fetch",
            JobError::Assembly(_) => "assembly",
            JobError::Transcode(_) => "transcode",
            JobError::Transcription(_) => "transcription",
            JobError::WorkspaceExpired(_) => "workspace_expired",
            JobError::NotFound(_) => "not_found",
            JobError::NotReady { .. } => "not_ready",
            JobError::Cancelled(_) => "cancelled",
            JobError::Io(_) => "io",
            JobError::Config(_) => "config",
            JobError::Internal(_) => "internal",
        }
    }
}

/// Manifest fetch/parse failures
#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("failed to fetch manifest {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: NetError,
    },

    #[error("failed to parse manifest {url}: {reason}")]
    Parse { url: String, reason: String },

    #[error("manifest {url} contains no entries")]
    Empty { url: String },

    #[error("invalid URI {uri} in manifest {url}: {reason}")]
    InvalidUri {
        url: String,
        uri: String,
        reason: String,
    },

    #[error("variant nesting deeper than {max_depth} levels at {url}")]
    TooDeep { url: String, max_depth: usize },

    #[error("no segments found in any of {manifests} manifest(s)")]
    NoSegments { manifests: usize },
}

impl ResolutionError {
    /// Whether this failure only means "nothing to download here"
    pub fn is_empty(&self) -> bool {
        matches!(self, ResolutionError::Empty { .. })
    }
}

/// Segment download failures
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("manifest={manifest}, segment={segment}, url={url}: {source}")]
    Download {
        manifest: usize,
        segment: usize,
        url: String,
        #[source]
        source: NetError,
    },

    #[error("manifest={manifest}, segment={segment}: failed to write {path}: {source}")]
    Write {
        manifest: usize,
        segment: usize,
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// HTTP client errors
#[derive(Error, Debug, Clone)]
pub enum NetError {
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {message}")]
    Transport {
        url: String,
        message: String,
    },

    #[error("invalid response body from {url}: {message}")]
    Body { url: String, message: String },
}

impl NetError {
    /// Transport failures, throttling and server errors are worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            NetError::Status { status, .. } => *status == 429 || *status >= 500,
            NetError::Transport { .. } => true,
            NetError::Body { .. } => false,
        }
    }

    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return NetError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            };
        }
        NetError::Transport {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

/// ffmpeg/ffprobe process errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Unsupported output format: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Speech provider errors
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Transport(String),

    #[error("provider returned {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, JobError>;
