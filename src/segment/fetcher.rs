use futures::stream::{FuturesUnordered, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::DownloadedSegment;
use crate::error::{FetchError, JobError, Result};
use crate::job::Workspace;
use crate::net::{HttpFetch, RetryPolicy};
use crate::playlist::{Manifest, SegmentRef};

/// Downloads the segments of one manifest at a time
pub struct SegmentFetcher {
    http: Arc<dyn HttpFetch>,
    max_concurrent: usize,
    retry: RetryPolicy,
}

impl SegmentFetcher {
    pub fn new(http: Arc<dyn HttpFetch>, max_concurrent: usize, retry: RetryPolicy) -> Self {
        Self {
            http,
            max_concurrent: max_concurrent.max(1),
            retry,
        }
    }

    /// Download every segment of `manifest` into `workspace`.
    ///
    /// At most `max_concurrent` requests are in flight at once. The result is
    /// ordered by segment index no matter which download finished first. The
    /// first failure aborts the call and drops the downloads still running.
    pub async fn fetch_all(
        &self,
        manifest_index: usize,
        manifest: &Manifest,
        workspace: &Workspace,
        cancel: &CancellationToken,
    ) -> Result<Vec<DownloadedSegment>> {
        let limiter = Semaphore::new(self.max_concurrent);

        let mut downloads: FuturesUnordered<_> = manifest
            .segments
            .iter()
            .map(|seg| {
                let path = workspace.segment_path(manifest_index, seg.index, seg.extension());
                self.download(&limiter, manifest_index, seg, path)
            })
            .collect();

        tracing::debug!(
            manifest = manifest_index,
            url = %manifest.url,
            segments = manifest.segments.len(),
            duration_secs = manifest.total_duration().as_secs_f64(),
            limit = self.max_concurrent,
            "Downloading segments"
        );

        let mut done = Vec::with_capacity(manifest.segments.len());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(JobError::Cancelled(format!(
                        "segment download of manifest {} cancelled",
                        manifest_index
                    )));
                }
                next = downloads.next() => match next {
                    Some(result) => done.push(result?),
                    None => break,
                },
            }
        }

        done.sort_by_key(|seg| seg.index);
        let bytes: u64 = done.iter().map(|s| s.size).sum();
        tracing::info!(manifest = manifest_index, segments = done.len(), bytes, "Segments downloaded");
        Ok(done)
    }

    async fn download(
        &self,
        limiter: &Semaphore,
        manifest_index: usize,
        seg: &SegmentRef,
        path: PathBuf,
    ) -> Result<DownloadedSegment> {
        let _permit = limiter
            .acquire()
            .await
            .map_err(|_| JobError::Cancelled("download limiter closed".to_string()))?;

        let body = self
            .retry
            .run(|| self.http.get_bytes(&seg.url))
            .await
            .map_err(|source| FetchError::Download {
                manifest: manifest_index,
                segment: seg.index,
                url: seg.url.to_string(),
                source,
            })?;

        tokio::fs::write(&path, &body)
            .await
            .map_err(|source| FetchError::Write {
                manifest: manifest_index,
                segment: seg.index,
                path: path.display().to_string(),
                source,
            })?;

        tracing::trace!(manifest = manifest_index, segment = seg.index, bytes = body.len(), "Segment stored");
        Ok(DownloadedSegment {
            manifest: manifest_index,
            index: seg.index,
            path,
            size: body.len() as u64,
        })
    }
}
