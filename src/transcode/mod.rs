//! Assembly and audio transcoding
//!
//! This module turns downloaded segments into job artifacts:
//! - Ordered concat list + lossless concatenation into one container
//! - Audio re-encode of the container to the configured target
//!
//! Both stages check the output on disk themselves; an engine that reports
//! success but leaves an empty file still fails the stage.

pub mod assembler;
pub mod encoder;

use std::path::Path;

pub use assembler::Assembler;
pub use encoder::Transcoder;

/// Size of a produced file, `None` if it is missing or empty
pub async fn non_empty_size(path: &Path) -> Option<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Some(meta.len()),
        _ => None,
    }
}
