//! Per-job workspace directories
//!
//! Layout under `<workspace-root>/<job-id>/`:
//! - `segment_<manifest>_<segment>.<ext>` downloaded segments
//! - `filelist.txt` ordered concat list
//! - `merged.<ext>` assembled container
//! - `audio.<ext>` encoded audio
//! - `transcribe.wav` transient provider input

use std::io;
use std::path::{Path, PathBuf};

use super::JobId;

pub const FILE_LIST_NAME: &str = "filelist.txt";
pub const TRANSCRIBE_SCRATCH_NAME: &str = "transcribe.wav";

/// A directory exclusively owned by one job
#[derive(Debug, Clone)]
pub struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    /// Workspace directory for a job, without touching the filesystem
    pub fn dir_for(root: &Path, job_id: &JobId) -> PathBuf {
        root.join(job_id.to_string())
    }

    /// Create the job directory. Fails if it already exists.
    pub async fn create(root: &Path, job_id: &JobId) -> io::Result<Self> {
        tokio::fs::create_dir_all(root).await?;
        let dir = Self::dir_for(root, job_id);
        tokio::fs::create_dir(&dir).await?;
        tracing::debug!(job_id = %job_id, dir = %dir.display(), "Created workspace");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn segment_path(&self, manifest: usize, segment: usize, ext: &str) -> PathBuf {
        self.dir.join(format!("segment_{}_{}.{}", manifest, segment, ext))
    }

    pub fn file_list_path(&self) -> PathBuf {
        self.dir.join(FILE_LIST_NAME)
    }

    pub fn merged_path(&self, ext: &str) -> PathBuf {
        self.dir.join(format!("merged.{}", ext))
    }

    pub fn audio_path(&self, ext: &str) -> PathBuf {
        self.dir.join(format!("audio.{}", ext))
    }

    pub fn transcribe_scratch_path(&self) -> PathBuf {
        self.dir.join(TRANSCRIBE_SCRATCH_NAME)
    }

    /// Recursively delete the whole workspace
    pub async fn remove(&self) -> io::Result<()> {
        remove_dir(&self.dir).await
    }
}

/// Remove a workspace directory tree; a directory that is already gone is fine
pub async fn remove_dir(dir: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {
            tracing::debug!(dir = %dir.display(), "Removed workspace");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Remove a single file; a file that is already gone is fine
pub async fn remove_file(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
