use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use url::Url;

use super::HttpFetch;
use crate::error::{JobError, NetError};

const USER_AGENT: &str = concat!("hls-assembler/", env!("CARGO_PKG_VERSION"));

/// reqwest-backed fetcher
#[derive(Clone, Debug)]
pub struct HttpClient {
    inner: reqwest::Client,
}

impl HttpClient {
    /// Build a client. `request_timeout` of `None` keeps the transport default.
    pub fn new(request_timeout: Option<Duration>) -> Result<Self, JobError> {
        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        let inner = builder
            .build()
            .map_err(|e| JobError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { inner })
    }

    pub fn inner(&self) -> &reqwest::Client {
        &self.inner
    }
}

#[async_trait]
impl HttpFetch for HttpClient {
    async fn get_bytes(&self, url: &Url) -> Result<Bytes, NetError> {
        let resp = self
            .inner
            .get(url.clone())
            .send()
            .await
            .map_err(|e| NetError::from_reqwest(url.as_str(), e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(NetError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        resp.bytes()
            .await
            .map_err(|e| NetError::from_reqwest(url.as_str(), e))
    }
}
