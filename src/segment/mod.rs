//! Segment download module
//!
//! Downloads every segment of a manifest into the job workspace with a
//! bounded number of requests in flight.

pub mod fetcher;

use std::path::PathBuf;

pub use fetcher::SegmentFetcher;

/// A segment stored in the workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedSegment {
    /// Position of the manifest within the job
    pub manifest: usize,
    /// Position of the segment within its manifest
    pub index: usize,
    pub path: PathBuf,
    pub size: u64,
}
