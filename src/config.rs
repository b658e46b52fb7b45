//! Server configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::net::RetryPolicy;

/// Segment download configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Maximum segment downloads in flight per manifest
    pub max_concurrent_downloads: usize,

    /// Extra attempts per segment after a retryable failure (0 = none)
    pub max_retries: u32,

    /// First retry delay in milliseconds, doubled per attempt
    pub retry_base_delay_ms: u64,

    /// Upper bound for the retry delay in milliseconds
    pub retry_max_delay_ms: u64,

    /// Per-request timeout in seconds (transport default when unset)
    pub request_timeout_secs: Option<u64>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 5,
            max_retries: 0,
            retry_base_delay_ms: 250,
            retry_max_delay_ms: 2000,
            request_timeout_secs: None,
        }
    }
}

impl FetchConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

/// Audio artifact format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// ffmpeg audio encoder
    pub codec: String,

    pub channels: u16,

    pub sample_rate: u32,

    /// Bitrate in kbit/s, unset for PCM
    pub bitrate_kbps: Option<u32>,

    /// ffmpeg output format
    pub format: String,

    /// File extension of the audio artifact
    pub extension: String,

    /// Strip container metadata headers
    pub strip_metadata: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            codec: "libmp3lame".to_string(),
            channels: 2,
            sample_rate: 44_100,
            bitrate_kbps: Some(192),
            format: "mp3".to_string(),
            extension: "mp3".to_string(),
            strip_metadata: false,
        }
    }
}

/// Job lifetime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// How long artifacts stay retrievable after completion, in seconds
    pub ttl_secs: u64,

    /// Expiry sweep period in seconds
    pub sweep_interval_secs: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 30 * 60,
            sweep_interval_secs: 5 * 60,
        }
    }
}

impl JobConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Speech-to-text configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Allow jobs to request a transcript
    pub enabled: bool,

    /// Provider API key; transcription is unavailable without one
    pub api_key: Option<String>,

    /// Provider base URL
    pub base_url: String,

    pub language: String,

    pub model: String,

    pub smart_format: bool,

    pub punctuate: bool,

    /// Send a mono 16 kHz WAV copy instead of the audio artifact
    pub reformat_to_wav: bool,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            base_url: crate::transcribe::deepgram::DEFAULT_BASE_URL.to_string(),
            language: "en".to_string(),
            model: "nova-2".to_string(),
            smart_format: true,
            punctuate: true,
            reformat_to_wav: true,
        }
    }
}

impl TranscriptionConfig {
    pub fn is_available(&self) -> bool {
        self.enabled && self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

impl fmt::Debug for TranscriptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscriptionConfig")
            .field("enabled", &self.enabled)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("language", &self.language)
            .field("model", &self.model)
            .field("smart_format", &self.smart_format)
            .field("punctuate", &self.punctuate)
            .field("reformat_to_wav", &self.reformat_to_wav)
            .finish()
    }
}

/// Reference -> manifest lookup configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupConfig {
    /// Metadata endpoint queried with `?<param>=<reference>`
    pub endpoint: Option<String>,

    /// Query parameter carrying the reference
    pub param: String,

    /// Fixed references, used when no endpoint is set
    pub references: HashMap<String, Vec<String>>,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            param: "sbat_id".to_string(),
            references: HashMap::new(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Directory holding one workspace per job
    pub workspace_root: PathBuf,

    pub ffmpeg_path: String,

    pub ffprobe_path: String,

    pub fetch: FetchConfig,

    pub audio: AudioConfig,

    pub jobs: JobConfig,

    pub transcription: TranscriptionConfig,

    pub lookup: LookupConfig,

    /// Enable CORS
    pub cors_enabled: bool,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Log output format (pretty, json)
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            workspace_root: std::env::temp_dir().join("hls-assembler"),
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            fetch: FetchConfig::default(),
            audio: AudioConfig::default(),
            jobs: JobConfig::default(),
            transcription: TranscriptionConfig::default(),
            lookup: LookupConfig::default(),
            cors_enabled: true,
            log_level: "debug".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl ServerConfig {
    /// Get the socket address string
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Apply `DEEPGRAM_API_KEY`, `HOST`, `PORT` and `WORKSPACE_ROOT`
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides<F>(&mut self, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = get("DEEPGRAM_API_KEY").filter(|k| !k.is_empty()) {
            self.transcription.api_key = Some(key);
        }
        if let Some(host) = get("HOST").filter(|h| !h.is_empty()) {
            self.host = host;
        }
        if let Some(port) = get("PORT") {
            match port.parse() {
                Ok(port) => self.port = port,
                Err(_) => tracing::warn!(port = %port, "Ignoring invalid PORT"),
            }
        }
        if let Some(root) = get("WORKSPACE_ROOT").filter(|r| !r.is_empty()) {
            self.workspace_root = PathBuf::from(root);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.fetch.max_concurrent_downloads, 5);
        assert_eq!(config.fetch.max_retries, 0);
        assert_eq!(config.audio.codec, "libmp3lame");
        assert_eq!(config.jobs.ttl(), Duration::from_secs(1800));
        assert_eq!(config.jobs.sweep_interval(), Duration::from_secs(300));
        assert!(!config.transcription.is_available());
    }

    #[test]
    fn test_socket_addr() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Default::default()
        };
        assert_eq!(config.socket_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ServerConfig::default();
        config.apply_overrides(|key| match key {
            "DEEPGRAM_API_KEY" => Some("dg-key".to_string()),
            "PORT" => Some("8081".to_string()),
            "WORKSPACE_ROOT" => Some("/srv/jobs".to_string()),
            _ => None,
        });
        assert_eq!(config.port, 8081);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.workspace_root, PathBuf::from("/srv/jobs"));
        assert!(config.transcription.is_available());
    }

    #[test]
    fn test_invalid_port_ignored() {
        let mut config = ServerConfig::default();
        config.apply_overrides(|key| (key == "PORT").then(|| "not-a-port".to_string()));
        assert_eq!(config.port, 3000);
    }

    #[test]
    fn test_api_key_redacted_in_debug() {
        let transcription = TranscriptionConfig {
            api_key: Some("super-secret".to_string()),
            ..Default::default()
        };
        let printed = format!("{:?}", transcription);
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn test_retry_policy_from_config() {
        let fetch = FetchConfig {
            max_retries: 3,
            ..Default::default()
        };
        let policy = fetch.retry_policy();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(250));
    }
}
