//! Job lifecycle module
//!
//! This module handles everything a job owns while it is live:
//! - Job records, lifecycle states and artifacts
//! - Per-job workspace directories and their on-disk layout
//! - The concurrent job store with TTL expiry and the periodic sweep

pub mod model;
pub mod store;
pub mod workspace;

pub use model::{Artifact, ArtifactKind, ArtifactPayload, Job, JobId, JobState};
pub use store::{ArtifactBody, JobStore};
pub use workspace::Workspace;
