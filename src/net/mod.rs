//! HTTP fetching
//!
//! Manifests, segments and lookup documents are all fetched through the
//! `HttpFetch` trait so the pipeline can run against fakes in tests.

pub mod client;
pub mod retry;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::error::NetError;

pub use client::HttpClient;
pub use retry::RetryPolicy;

#[async_trait]
pub trait HttpFetch: Send + Sync {
    /// Get the whole body of a URL
    async fn get_bytes(&self, url: &Url) -> Result<Bytes, NetError>;

    /// Get a URL and decode it as UTF-8 text
    async fn get_text(&self, url: &Url) -> Result<String, NetError> {
        let body = self.get_bytes(url).await?;
        String::from_utf8(body.to_vec()).map_err(|e| NetError::Body {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    /// Get a URL and decode it as JSON
    async fn get_json(&self, url: &Url) -> Result<serde_json::Value, NetError> {
        let body = self.get_bytes(url).await?;
        serde_json::from_slice(&body).map_err(|e| NetError::Body {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}
