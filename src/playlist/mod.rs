//! Manifest resolution
//!
//! This module turns manifest URLs into ordered segment lists:
//! - Parsing of media and master playlists (parser.rs)
//! - Recursive variant resolution with URI joining (resolver.rs)

pub mod parser;
pub mod resolver;

use std::time::Duration;
use url::Url;

pub use resolver::ManifestResolver;

/// A media playlist with all segment URIs made absolute
#[derive(Debug, Clone)]
pub struct Manifest {
    /// URL the playlist was retrieved from
    pub url: Url,
    pub segments: Vec<SegmentRef>,
}

impl Manifest {
    pub fn total_duration(&self) -> Duration {
        self.segments.iter().filter_map(|s| s.duration).sum()
    }
}

/// One segment reference, in playlist order
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRef {
    /// Position in the playlist; the only ordering key
    pub index: usize,
    /// URI as written in the playlist
    pub uri: String,
    /// URI resolved against the playlist URL
    pub url: Url,
    pub duration: Option<Duration>,
}

impl SegmentRef {
    /// File extension for the local copy, taken from the URL path
    pub fn extension(&self) -> &str {
        self.url
            .path_segments()
            .and_then(|mut segs| segs.next_back())
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or("ts")
    }
}
