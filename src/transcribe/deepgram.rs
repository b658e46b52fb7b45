//! Deepgram pre-recorded transcription
//!
//! `POST /v1/listen` with the raw audio as body and the options as query
//! parameters. Error bodies look like
//! `{"err_code": "...", "err_msg": "...", "request_id": "..."}`; newer API
//! versions use `category`/`message` instead.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use url::Url;

use super::{SpeechProvider, TranscriptionRequest};
use crate::error::ProviderError;

pub const DEFAULT_BASE_URL: &str = "https://api.deepgram.com";

const PARAGRAPHS_TRANSCRIPT: &str = "/results/channels/0/alternatives/0/paragraphs/transcript";
const PLAIN_TRANSCRIPT: &str = "/results/channels/0/alternatives/0/transcript";

pub struct DeepgramProvider {
    client: reqwest::Client,
    base_url: Url,
    api_key: String,
}

impl DeepgramProvider {
    pub fn new(client: reqwest::Client, base_url: Url, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url,
            api_key: api_key.into(),
        }
    }

    pub fn listen_url(&self, request: &TranscriptionRequest) -> Result<Url, ProviderError> {
        let mut url = self
            .base_url
            .join("v1/listen")
            .map_err(|e| ProviderError::Transport(format!("invalid base URL {}: {}", self.base_url, e)))?;
        url.query_pairs_mut()
            .append_pair("model", &request.model)
            .append_pair("language", &request.language)
            .append_pair("smart_format", bool_param(request.smart_format))
            .append_pair("punctuate", bool_param(request.punctuate));
        Ok(url)
    }
}

fn bool_param(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

#[async_trait]
impl SpeechProvider for DeepgramProvider {
    fn name(&self) -> &str {
        "deepgram"
    }

    async fn transcribe(&self, request: TranscriptionRequest) -> Result<String, ProviderError> {
        let url = self.listen_url(&request)?;

        let resp = self
            .client
            .post(url)
            .header(AUTHORIZATION, format!("Token {}", self.api_key))
            .header(CONTENT_TYPE, request.mime_type.as_str())
            .body(request.audio)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        let body = resp
            .bytes()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        parse_response(status, &body)
    }
}

/// Extract the transcript from a response, or the error it reports
pub fn parse_response(status: u16, body: &[u8]) -> Result<String, ProviderError> {
    let json: Option<Value> = serde_json::from_slice(body).ok();

    if let Some(err) = json.as_ref().and_then(|v| api_error(status, v)) {
        return Err(err);
    }

    if !(200..300).contains(&status) {
        return Err(ProviderError::Api {
            status,
            code: "http_error".to_string(),
            message: String::from_utf8_lossy(body).trim().to_string(),
        });
    }

    let json = json.ok_or_else(|| ProviderError::MalformedResponse("body is not JSON".to_string()))?;

    json.pointer(PARAGRAPHS_TRANSCRIPT)
        .or_else(|| json.pointer(PLAIN_TRANSCRIPT))
        .and_then(Value::as_str)
        .map(|t| t.trim().to_string())
        .ok_or_else(|| ProviderError::MalformedResponse("no transcript in response".to_string()))
}

fn api_error(status: u16, v: &Value) -> Option<ProviderError> {
    let field = |name: &str| v.get(name).and_then(Value::as_str).map(str::to_string);

    let code = field("err_code").or_else(|| field("category"));
    let message = field("err_msg").or_else(|| field("message"));
    if code.is_none() && message.is_none() {
        return None;
    }
    Some(ProviderError::Api {
        status,
        code: code.unwrap_or_else(|| "unknown".to_string()),
        message: message.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Bytes as AxumBytes,
        extract::RawQuery,
        http::{HeaderMap, StatusCode},
        routing::post,
        Json, Router,
    };
    use bytes::Bytes;
    use serde_json::json;

    fn request() -> TranscriptionRequest {
        TranscriptionRequest {
            audio: Bytes::from_static(b"RIFF....WAVE"),
            mime_type: "audio/wav".into(),
            language: "en".into(),
            model: "nova-2".into(),
            smart_format: true,
            punctuate: true,
        }
    }

    #[test]
    fn test_paragraphs_preferred() {
        let body = json!({
            "results": { "channels": [ { "alternatives": [ {
                "transcript": "hello world how are you",
                "paragraphs": { "transcript": "\nHello world.\n\nHow are you?" }
            } ] } ] }
        });
        let text = parse_response(200, body.to_string().as_bytes()).unwrap();
        assert_eq!(text, "Hello world.\n\nHow are you?");
    }

    #[test]
    fn test_plain_transcript_fallback() {
        let body = json!({
            "results": { "channels": [ { "alternatives": [ { "transcript": "Hello." } ] } ] }
        });
        assert_eq!(parse_response(200, body.to_string().as_bytes()).unwrap(), "Hello.");
    }

    #[test]
    fn test_error_object_in_success_body() {
        let body = json!({ "err_code": "Bad Request", "err_msg": "corrupt audio" });
        let err = parse_response(200, body.to_string().as_bytes()).unwrap_err();
        match err {
            ProviderError::Api { status, code, message } => {
                assert_eq!(status, 200);
                assert_eq!(code, "Bad Request");
                assert_eq!(message, "corrupt audio");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_http_error_with_plain_body() {
        let err = parse_response(502, b"bad gateway").unwrap_err();
        assert!(matches!(err, ProviderError::Api { status: 502, .. }));
    }

    #[test]
    fn test_missing_transcript_is_malformed() {
        let body = json!({ "metadata": {}, "results": { "channels": [] } });
        let err = parse_response(200, body.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse(_)));
        let err = parse_response(200, b"<html>").unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse(_)));
    }

    #[test]
    fn test_listen_url() {
        let provider = DeepgramProvider::new(
            reqwest::Client::new(),
            Url::parse(DEFAULT_BASE_URL).unwrap(),
            "key",
        );
        let url = provider.listen_url(&request()).unwrap();
        assert_eq!(url.path(), "/v1/listen");
        let query = url.query().unwrap();
        assert!(query.contains("model=nova-2"));
        assert!(query.contains("language=en"));
        assert!(query.contains("smart_format=true"));
        assert!(query.contains("punctuate=true"));
    }

    async fn listen(headers: HeaderMap, RawQuery(query): RawQuery, body: AxumBytes) -> (StatusCode, Json<Value>) {
        let auth = headers.get("authorization").and_then(|v| v.to_str().ok());
        if auth != Some("Token secret") {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "err_code": "INVALID_AUTH", "err_msg": "Invalid credentials." })),
            );
        }
        let transcript = format!(
            "{} bytes of {}; {}",
            body.len(),
            headers.get("content-type").and_then(|v| v.to_str().ok()).unwrap_or(""),
            query.unwrap_or_default()
        );
        (
            StatusCode::OK,
            Json(json!({ "results": { "channels": [ { "alternatives": [ { "transcript": transcript } ] } ] } })),
        )
    }

    async fn serve_fake_deepgram() -> Url {
        let app = Router::new().route("/v1/listen", post(listen));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Url::parse(&format!("http://{}/", addr)).unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_against_local_server() {
        let base = serve_fake_deepgram().await;

        let provider = DeepgramProvider::new(reqwest::Client::new(), base.clone(), "secret");
        let text = provider.transcribe(request()).await.unwrap();
        assert!(text.starts_with("12 bytes of audio/wav;"));
        assert!(text.contains("model=nova-2"));

        let provider = DeepgramProvider::new(reqwest::Client::new(), base, "wrong");
        let err = provider.transcribe(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Api { status: 401, ref code, .. } if code == "INVALID_AUTH"));
    }
}
