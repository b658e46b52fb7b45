use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::non_empty_size;
use crate::error::{JobError, Result};
use crate::ffmpeg::MediaEngine;
use crate::job::Workspace;
use crate::segment::DownloadedSegment;

/// Concatenates segments, in the order given, into `merged.<ext>`
pub struct Assembler {
    engine: Arc<dyn MediaEngine>,
}

impl Assembler {
    pub fn new(engine: Arc<dyn MediaEngine>) -> Self {
        Self { engine }
    }

    /// `segments` must already be in manifest-then-index order.
    pub async fn assemble(&self, segments: &[DownloadedSegment], workspace: &Workspace) -> Result<PathBuf> {
        let first = segments
            .first()
            .ok_or_else(|| JobError::Assembly("no segments to assemble".to_string()))?;

        let ext = first
            .path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("ts");
        let list_path = workspace.file_list_path();
        let output = workspace.merged_path(ext);

        tokio::fs::write(&list_path, file_list(segments)).await?;

        self.engine
            .concat(&list_path, &output)
            .await
            .map_err(|e| JobError::Assembly(e.to_string()))?;

        let size = non_empty_size(&output).await.ok_or_else(|| {
            JobError::Assembly(format!("concatenation produced no output at {}", output.display()))
        })?;

        tracing::info!(segments = segments.len(), bytes = size, output = %output.display(), "Segments assembled");
        Ok(output)
    }
}

/// Concat demuxer list: one `file '<path>'` line per segment
pub fn file_list(segments: &[DownloadedSegment]) -> String {
    segments
        .iter()
        .map(|seg| format!("file '{}'\n", quote(&seg.path)))
        .collect()
}

fn quote(path: &Path) -> String {
    path.to_string_lossy().replace('\'', r"'\''")
}
