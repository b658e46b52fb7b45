//! Job input -> manifest URLs
//!
//! A job is submitted either with a manifest URL or with a recording
//! reference (a numeric id, or a class session page URL that contains one).
//! References are turned into manifest URLs by a `ManifestLookup`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

use crate::config::LookupConfig;
use crate::error::{JobError, Result};
use crate::net::HttpFetch;

macro_rules! regex {
    ($re:literal $(,)?) => {{
        static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
        RE.get_or_init(|| regex::Regex::new($re).unwrap())
    }};
}

/// Parsed job input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobInput {
    /// Direct link to an HLS playlist
    Manifest(Url),
    /// Recording id to be resolved by the lookup service
    Reference(String),
}

impl JobInput {
    /// Label stored on the job
    pub fn reference(&self) -> String {
        match self {
            JobInput::Manifest(url) => url.to_string(),
            JobInput::Reference(id) => id.clone(),
        }
    }
}

/// Accepts a playlist URL, a bare numeric id, or a URL containing
/// `class/<id>/session`.
pub fn parse_reference(input: &str) -> Result<JobInput> {
    let input = input.trim();
    if input.is_empty() {
        return Err(JobError::InputValidation(
            "please provide a recording URL or id".to_string(),
        ));
    }

    if regex!(r"^\d+$").is_match(input) {
        return Ok(JobInput::Reference(input.to_string()));
    }
    if let Some(caps) = regex!(r"class/(\d+)/session").captures(input) {
        return Ok(JobInput::Reference(caps[1].to_string()));
    }
    if let Ok(url) = Url::parse(input) {
        if matches!(url.scheme(), "http" | "https") && url.path().ends_with(".m3u8") {
            return Ok(JobInput::Manifest(url));
        }
    }

    Err(JobError::InputValidation(format!(
        "could not extract a recording id from {:?}",
        input
    )))
}

#[async_trait]
pub trait ManifestLookup: Send + Sync {
    /// Manifest URLs for a reference, in recording order. Never empty.
    async fn manifest_urls(&self, reference: &str) -> Result<Vec<Url>>;
}

/// Queries a metadata endpoint; manifest URLs are the first column of
/// `data.rows`.
pub struct HttpLookup {
    http: Arc<dyn HttpFetch>,
    endpoint: Url,
    param: String,
}

impl HttpLookup {
    pub fn new(http: Arc<dyn HttpFetch>, endpoint: Url, param: impl Into<String>) -> Self {
        Self {
            http,
            endpoint,
            param: param.into(),
        }
    }

    fn query_url(&self, reference: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair(&self.param, reference);
        url
    }
}

#[async_trait]
impl ManifestLookup for HttpLookup {
    async fn manifest_urls(&self, reference: &str) -> Result<Vec<Url>> {
        let url = self.query_url(reference);
        let body = self
            .http
            .get_json(&url)
            .await
            .map_err(|e| JobError::Lookup(e.to_string()))?;

        let rows = body
            .pointer("/data/rows")
            .and_then(|r| r.as_array())
            .ok_or_else(|| JobError::Lookup("response has no data.rows".to_string()))?;

        let mut urls = Vec::with_capacity(rows.len());
        for row in rows {
            let raw = row
                .get(0)
                .and_then(|v| v.as_str())
                .ok_or_else(|| JobError::Lookup(format!("unexpected row {}", row)))?;
            let parsed = Url::parse(raw)
                .map_err(|e| JobError::Lookup(format!("invalid manifest URL {:?}: {}", raw, e)))?;
            urls.push(parsed);
        }

        tracing::debug!(reference, manifests = urls.len(), "Looked up manifests");
        non_empty(reference, urls)
    }
}

/// Fixed reference -> URLs table
#[derive(Debug, Default, Clone)]
pub struct StaticLookup {
    entries: HashMap<String, Vec<Url>>,
}

impl StaticLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reference: impl Into<String>, urls: Vec<Url>) -> Self {
        self.entries.insert(reference.into(), urls);
        self
    }
}

#[async_trait]
impl ManifestLookup for StaticLookup {
    async fn manifest_urls(&self, reference: &str) -> Result<Vec<Url>> {
        let urls = self.entries.get(reference).cloned().unwrap_or_default();
        non_empty(reference, urls)
    }
}

fn non_empty(reference: &str, urls: Vec<Url>) -> Result<Vec<Url>> {
    if urls.is_empty() {
        return Err(JobError::InputValidation(format!(
            "no manifests found for reference {}",
            reference
        )));
    }
    Ok(urls)
}

/// Build the lookup described by the configuration
pub fn from_config(cfg: &LookupConfig, http: Arc<dyn HttpFetch>) -> Result<Arc<dyn ManifestLookup>> {
    if let Some(endpoint) = &cfg.endpoint {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| JobError::Config(format!("invalid lookup endpoint {:?}: {}", endpoint, e)))?;
        return Ok(Arc::new(HttpLookup::new(http, endpoint, cfg.param.clone())));
    }

    let mut lookup = StaticLookup::new();
    for (reference, raw_urls) in &cfg.references {
        let urls = raw_urls
            .iter()
            .map(|u| {
                Url::parse(u).map_err(|e| JobError::Config(format!("invalid manifest URL {:?}: {}", u, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        lookup = lookup.with(reference.clone(), urls);
    }
    Ok(Arc::new(lookup))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::fixtures::FakeHttp;

    #[test]
    fn test_parse_reference() {
        assert_eq!(
            parse_reference("1234").unwrap(),
            JobInput::Reference("1234".into())
        );
        assert_eq!(
            parse_reference(" https://www.example.com/academy/mentee-dashboard/class/98765/session?joinSession=1 ").unwrap(),
            JobInput::Reference("98765".into())
        );
        assert_eq!(
            parse_reference("https://cdn.example/vod/index.m3u8?sig=abc").unwrap(),
            JobInput::Manifest(Url::parse("https://cdn.example/vod/index.m3u8?sig=abc").unwrap())
        );
    }

    #[test]
    fn test_parse_reference_rejects() {
        for input in ["", "   ", "abc", "12a", "https://example.com/class/x/session", "ftp://cdn/a.m3u8"] {
            let err = parse_reference(input).unwrap_err();
            assert!(matches!(err, JobError::InputValidation(_)), "input {:?}", input);
        }
    }

    #[tokio::test]
    async fn test_http_lookup_reads_first_column() {
        let http = Arc::new(FakeHttp::new());
        http.serve(
            "http://meta.example/query?sbat_id=1234",
            r#"{"data":{"rows":[["http://cdn.example/a.m3u8", 1],["http://cdn.example/b.m3u8", 2]]}}"#,
        );
        let lookup = HttpLookup::new(
            http.clone(),
            Url::parse("http://meta.example/query").unwrap(),
            "sbat_id",
        );

        let urls = lookup.manifest_urls("1234").await.unwrap();
        assert_eq!(
            urls.iter().map(|u| u.as_str()).collect::<Vec<_>>(),
            vec!["http://cdn.example/a.m3u8", "http://cdn.example/b.m3u8"]
        );
    }

    #[tokio::test]
    async fn test_http_lookup_no_rows_is_input_error() {
        let http = Arc::new(FakeHttp::new());
        http.serve("http://meta.example/query?sbat_id=1", r#"{"data":{"rows":[]}}"#);
        let lookup = HttpLookup::new(http, Url::parse("http://meta.example/query").unwrap(), "sbat_id");

        let err = lookup.manifest_urls("1").await.unwrap_err();
        assert!(matches!(err, JobError::InputValidation(_)));
    }

    #[tokio::test]
    async fn test_http_lookup_failure_is_lookup_error() {
        let http = Arc::new(FakeHttp::new());
        http.fail("http://meta.example/query?sbat_id=1", 500);
        let lookup = HttpLookup::new(http, Url::parse("http://meta.example/query").unwrap(), "sbat_id");

        let err = lookup.manifest_urls("1").await.unwrap_err();
        assert!(matches!(err, JobError::Lookup(_)));
    }

    #[tokio::test]
    async fn test_static_lookup() {
        let lookup = StaticLookup::new().with("7", vec![Url::parse("http://cdn/7.m3u8").unwrap()]);
        assert_eq!(lookup.manifest_urls("7").await.unwrap().len(), 1);
        assert!(matches!(
            lookup.manifest_urls("8").await.unwrap_err(),
            JobError::InputValidation(_)
        ));
    }
}
