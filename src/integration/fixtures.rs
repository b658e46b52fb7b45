//! Test fixtures
//!
//! Fakes standing in for the CDN, ffmpeg and the speech provider so jobs can
//! run end to end without network access or media binaries.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use url::Url;

use crate::error::{EngineError, NetError, ProviderError};
use crate::ffmpeg::{AudioTarget, MediaEngine, ProgressFn};
use crate::net::HttpFetch;
use crate::transcribe::{SpeechProvider, TranscriptionRequest};

/// A media playlist listing `uris`, 4 seconds each
pub fn media_playlist(uris: &[&str]) -> String {
    let mut out = String::from(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n#EXT-X-MEDIA-SEQUENCE:0\n",
    );
    for uri in uris {
        out.push_str("#EXTINF:4.000,\n");
        out.push_str(uri);
        out.push('\n');
    }
    out.push_str("#EXT-X-ENDLIST\n");
    out
}

#[derive(Clone)]
enum Reply {
    Body(Bytes),
    Status(u16),
}

#[derive(Clone)]
struct Route {
    reply: Reply,
    delay: Duration,
    /// Status returned for the next `n` requests before `reply`
    flaky: Option<(u16, usize)>,
}

/// In-memory HTTP origin. Unknown URLs answer 404.
#[derive(Default)]
pub struct FakeHttp {
    routes: Mutex<HashMap<String, Route>>,
    requests: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

fn key(url: &str) -> String {
    Url::parse(url).map(|u| u.to_string()).unwrap_or_else(|_| url.to_string())
}

impl FakeHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, body: impl Into<Bytes>) {
        self.serve_delayed(url, body, Duration::ZERO);
    }

    pub fn serve_delayed(&self, url: &str, body: impl Into<Bytes>, delay: Duration) {
        self.routes.lock().insert(
            key(url),
            Route {
                reply: Reply::Body(body.into()),
                delay,
                flaky: None,
            },
        );
    }

    pub fn fail(&self, url: &str, status: u16) {
        self.routes.lock().insert(
            key(url),
            Route {
                reply: Reply::Status(status),
                delay: Duration::ZERO,
                flaky: None,
            },
        );
    }

    /// Fail the next `times` requests with `status`, then serve normally
    pub fn fail_times(&self, url: &str, status: u16, times: usize) {
        let mut routes = self.routes.lock();
        let route = routes.entry(key(url)).or_insert(Route {
            reply: Reply::Status(404),
            delay: Duration::ZERO,
            flaky: None,
        });
        route.flaky = Some((status, times));
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests.lock().get(&key(url)).copied().unwrap_or(0)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_reply(&self, key: &str) -> (Reply, Duration) {
        let mut routes = self.routes.lock();
        let Some(route) = routes.get_mut(key) else {
            return (Reply::Status(404), Duration::ZERO);
        };
        if let Some((status, left)) = route.flaky {
            route.flaky = (left > 1).then(|| (status, left - 1));
            if left > 0 {
                return (Reply::Status(status), route.delay);
            }
        }
        (route.reply.clone(), route.delay)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl HttpFetch for FakeHttp {
    async fn get_bytes(&self, url: &Url) -> Result<Bytes, NetError> {
        let key = url.to_string();
        *self.requests.lock().entry(key.clone()).or_default() += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let (reply, delay) = self.next_reply(&key);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match reply {
            Reply::Body(body) => Ok(body),
            Reply::Status(status) => Err(NetError::Status { url: key, status }),
        }
    }
}

/// Media engine that concatenates bytes and writes a deterministic
/// "encoding" of its input
#[derive(Default)]
pub struct FakeEngine {
    fail_concat: bool,
    panic_concat: bool,
    fail_transcode: bool,
    empty_audio: bool,
    last_target: Mutex<Option<AudioTarget>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_concat(mut self) -> Self {
        self.fail_concat = true;
        self
    }

    pub fn panicking_concat(mut self) -> Self {
        self.panic_concat = true;
        self
    }

    pub fn failing_transcode(mut self) -> Self {
        self.fail_transcode = true;
        self
    }

    /// Succeed but leave a zero-byte output
    pub fn empty_audio(mut self) -> Self {
        self.empty_audio = true;
        self
    }

    pub fn last_target(&self) -> Option<AudioTarget> {
        self.last_target.lock().clone()
    }
}

fn failed(stderr: &str) -> EngineError {
    EngineError::Failed {
        program: "ffmpeg".to_string(),
        status: "exit status: 1".to_string(),
        stderr: stderr.to_string(),
    }
}

#[async_trait]
impl MediaEngine for FakeEngine {
    async fn concat(&self, file_list: &Path, output: &Path) -> Result<(), EngineError> {
        if self.fail_concat {
            return Err(failed("Invalid data found when processing input"));
        }
        if self.panic_concat {
            panic!("media engine crashed");
        }
        let list = tokio::fs::read_to_string(file_list).await?;
        let mut merged = Vec::new();
        for line in list.lines() {
            let Some(quoted) = line.strip_prefix("file '").and_then(|l| l.strip_suffix('\'')) else {
                continue;
            };
            let path = quoted.replace("'\\''", "'");
            merged.extend(tokio::fs::read(&path).await?);
        }
        tokio::fs::write(output, merged).await?;
        Ok(())
    }

    async fn transcode_audio(
        &self,
        input: &Path,
        output: &Path,
        target: &AudioTarget,
        progress: Option<ProgressFn>,
    ) -> Result<(), EngineError> {
        *self.last_target.lock() = Some(target.clone());
        if self.fail_transcode {
            return Err(failed("Output file does not contain any stream"));
        }

        let source = tokio::fs::read(input).await?;
        let encoded = if self.empty_audio {
            Vec::new()
        } else {
            let mut out = format!(
                "{}/{}ch/{}Hz/{:?}|",
                target.codec, target.channels, target.sample_rate, target.bitrate_kbps
            )
            .into_bytes();
            out.extend(source);
            out
        };
        if let Some(progress) = &progress {
            progress(50);
        }
        tokio::fs::write(output, encoded).await?;
        if let Some(progress) = &progress {
            progress(100);
        }
        Ok(())
    }
}

/// Speech provider with a canned reply
pub struct FakeSpeech {
    reply: Result<String, ProviderError>,
    last_request: Mutex<Option<TranscriptionRequest>>,
}

impl FakeSpeech {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            last_request: Mutex::new(None),
        }
    }

    pub fn failing(err: ProviderError) -> Self {
        Self {
            reply: Err(err),
            last_request: Mutex::new(None),
        }
    }

    pub fn last_request(&self) -> Option<TranscriptionRequest> {
        self.last_request.lock().clone()
    }
}

#[async_trait]
impl SpeechProvider for FakeSpeech {
    fn name(&self) -> &str {
        "fake"
    }

    async fn transcribe(&self, request: TranscriptionRequest) -> Result<String, ProviderError> {
        *self.last_request.lock() = Some(request);
        self.reply.clone()
    }
}
