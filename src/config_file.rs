//! Configuration file support
//!
//! Loads server configuration from TOML files. Every section except
//! `[server]` is optional; missing keys take their defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::{
    AudioConfig, FetchConfig, JobConfig, LookupConfig, ServerConfig, TranscriptionConfig,
};

/// Configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Server settings
    pub server: ServerSettings,
    /// Download settings
    pub fetch: Option<FetchSettings>,
    /// Audio output settings
    pub audio: Option<AudioSettings>,
    /// Job lifetime settings
    pub jobs: Option<JobSettings>,
    /// Speech-to-text settings
    pub transcription: Option<TranscriptionSettings>,
    /// Reference lookup settings
    pub lookup: Option<LookupSettings>,
    /// Logging settings
    pub logging: Option<LoggingSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Enable CORS
    pub cors_enabled: Option<bool>,
    /// Directory for job workspaces
    pub workspace_root: Option<PathBuf>,
    /// ffmpeg executable
    pub ffmpeg_path: Option<String>,
    /// ffprobe executable
    pub ffprobe_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchSettings {
    pub max_concurrent_downloads: Option<usize>,
    pub max_retries: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
    pub retry_max_delay_ms: Option<u64>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioSettings {
    pub codec: Option<String>,
    pub channels: Option<u16>,
    pub sample_rate: Option<u32>,
    pub bitrate_kbps: Option<u32>,
    pub format: Option<String>,
    pub extension: Option<String>,
    pub strip_metadata: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobSettings {
    /// Artifact retention after completion, in seconds
    pub ttl_secs: Option<u64>,
    /// Expiry sweep period, in seconds
    pub sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptionSettings {
    pub enabled: Option<bool>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub language: Option<String>,
    pub model: Option<String>,
    pub smart_format: Option<bool>,
    pub punctuate: Option<bool>,
    pub reformat_to_wav: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LookupSettings {
    /// Metadata endpoint URL
    pub endpoint: Option<String>,
    /// Query parameter name
    pub param: Option<String>,
    /// Fixed reference table
    pub references: Option<HashMap<String, Vec<String>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: Option<String>,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: ConfigFile = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Generate default configuration file
    pub fn default_config() -> Self {
        let defaults = ServerConfig::default();
        Self {
            server: ServerSettings {
                host: defaults.host,
                port: defaults.port,
                cors_enabled: Some(defaults.cors_enabled),
                workspace_root: Some(defaults.workspace_root),
                ffmpeg_path: Some(defaults.ffmpeg_path),
                ffprobe_path: Some(defaults.ffprobe_path),
            },
            fetch: Some(FetchSettings {
                max_concurrent_downloads: Some(defaults.fetch.max_concurrent_downloads),
                max_retries: Some(defaults.fetch.max_retries),
                retry_base_delay_ms: Some(defaults.fetch.retry_base_delay_ms),
                retry_max_delay_ms: Some(defaults.fetch.retry_max_delay_ms),
                request_timeout_secs: None,
            }),
            audio: Some(AudioSettings {
                codec: Some(defaults.audio.codec),
                channels: Some(defaults.audio.channels),
                sample_rate: Some(defaults.audio.sample_rate),
                bitrate_kbps: defaults.audio.bitrate_kbps,
                format: Some(defaults.audio.format),
                extension: Some(defaults.audio.extension),
                strip_metadata: Some(defaults.audio.strip_metadata),
            }),
            jobs: Some(JobSettings {
                ttl_secs: Some(defaults.jobs.ttl_secs),
                sweep_interval_secs: Some(defaults.jobs.sweep_interval_secs),
            }),
            transcription: Some(TranscriptionSettings {
                enabled: Some(defaults.transcription.enabled),
                api_key: None,
                base_url: Some(defaults.transcription.base_url),
                language: Some(defaults.transcription.language),
                model: Some(defaults.transcription.model),
                smart_format: Some(defaults.transcription.smart_format),
                punctuate: Some(defaults.transcription.punctuate),
                reformat_to_wav: Some(defaults.transcription.reformat_to_wav),
            }),
            lookup: Some(LookupSettings {
                endpoint: None,
                param: Some(defaults.lookup.param),
                references: None,
            }),
            logging: Some(LoggingSettings {
                level: defaults.log_level,
                format: Some(defaults.log_format),
            }),
        }
    }

    /// Convert to ServerConfig
    pub fn into_server_config(self) -> ServerConfig {
        let d = ServerConfig::default();

        let fetch = self.fetch.unwrap_or_default();
        let audio = self.audio.unwrap_or_default();
        let jobs = self.jobs.unwrap_or_default();
        let tr = self.transcription.unwrap_or_default();
        let lookup = self.lookup.unwrap_or_default();

        ServerConfig {
            host: self.server.host,
            port: self.server.port,
            workspace_root: self.server.workspace_root.unwrap_or(d.workspace_root),
            ffmpeg_path: self.server.ffmpeg_path.unwrap_or(d.ffmpeg_path),
            ffprobe_path: self.server.ffprobe_path.unwrap_or(d.ffprobe_path),
            fetch: FetchConfig {
                max_concurrent_downloads: fetch
                    .max_concurrent_downloads
                    .unwrap_or(d.fetch.max_concurrent_downloads),
                max_retries: fetch.max_retries.unwrap_or(d.fetch.max_retries),
                retry_base_delay_ms: fetch.retry_base_delay_ms.unwrap_or(d.fetch.retry_base_delay_ms),
                retry_max_delay_ms: fetch.retry_max_delay_ms.unwrap_or(d.fetch.retry_max_delay_ms),
                request_timeout_secs: fetch.request_timeout_secs.or(d.fetch.request_timeout_secs),
            },
            audio: AudioConfig {
                codec: audio.codec.unwrap_or(d.audio.codec),
                channels: audio.channels.unwrap_or(d.audio.channels),
                sample_rate: audio.sample_rate.unwrap_or(d.audio.sample_rate),
                bitrate_kbps: audio.bitrate_kbps.or(d.audio.bitrate_kbps),
                format: audio.format.unwrap_or(d.audio.format),
                extension: audio.extension.unwrap_or(d.audio.extension),
                strip_metadata: audio.strip_metadata.unwrap_or(d.audio.strip_metadata),
            },
            jobs: JobConfig {
                ttl_secs: jobs.ttl_secs.unwrap_or(d.jobs.ttl_secs),
                sweep_interval_secs: jobs.sweep_interval_secs.unwrap_or(d.jobs.sweep_interval_secs),
            },
            transcription: TranscriptionConfig {
                enabled: tr.enabled.unwrap_or(d.transcription.enabled),
                api_key: tr.api_key.or(d.transcription.api_key),
                base_url: tr.base_url.unwrap_or(d.transcription.base_url),
                language: tr.language.unwrap_or(d.transcription.language),
                model: tr.model.unwrap_or(d.transcription.model),
                smart_format: tr.smart_format.unwrap_or(d.transcription.smart_format),
                punctuate: tr.punctuate.unwrap_or(d.transcription.punctuate),
                reformat_to_wav: tr.reformat_to_wav.unwrap_or(d.transcription.reformat_to_wav),
            },
            lookup: LookupConfig {
                endpoint: lookup.endpoint.or(d.lookup.endpoint),
                param: lookup.param.unwrap_or(d.lookup.param),
                references: lookup.references.unwrap_or(d.lookup.references),
            },
            cors_enabled: self.server.cors_enabled.unwrap_or(d.cors_enabled),
            log_level: self
                .logging
                .as_ref()
                .map(|l| l.level.clone())
                .unwrap_or(d.log_level),
            log_format: self
                .logging
                .and_then(|l| l.format)
                .unwrap_or(d.log_format),
        }
    }
}

/// Load the config file at `path`, falling back to defaults when it is
/// missing or invalid, then apply environment overrides.
///
/// Runs before logging is configured, so a load failure is handed back as
/// a message for the caller to log.
pub fn load_server_config(path: &str) -> (ServerConfig, Option<String>) {
    let (mut config, warning) = if Path::new(path).exists() {
        match ConfigFile::from_file(path) {
            Ok(cf) => (cf.into_server_config(), None),
            Err(e) => (
                ServerConfig::default(),
                Some(format!("Failed to load config file {}: {}. Using defaults.", path, e)),
            ),
        }
    } else {
        (ServerConfig::default(), None)
    };
    config.apply_env();
    (config, warning)
}

/// Generate default configuration file at the specified path
pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigFile::default_config();
    config.to_file(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = ConfigFile::default_config();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.fetch.as_ref().unwrap().max_concurrent_downloads, Some(5));
        assert_eq!(config.jobs.as_ref().unwrap().ttl_secs, Some(1800));
    }

    #[test]
    fn test_config_file_roundtrip() {
        let config = ConfigFile::default_config();

        let mut temp_file = NamedTempFile::new().unwrap();
        let content = toml::to_string_pretty(&config).unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();

        let loaded = ConfigFile::from_file(temp_file.path()).unwrap();
        assert_eq!(loaded.server.port, config.server.port);
        assert_eq!(
            loaded.audio.as_ref().unwrap().codec,
            config.audio.as_ref().unwrap().codec
        );
    }

    #[test]
    fn test_minimal_file_uses_defaults() {
        let text = r#"
[server]
host = "127.0.0.1"
port = 8080

[fetch]
max_concurrent_downloads = 20

[audio]
channels = 1
sample_rate = 16000
bitrate_kbps = 64

[lookup]
[lookup.references]
"1234" = ["https://cdn.example/1234/index.m3u8"]
"#;
        let config: ConfigFile = toml::from_str(text).unwrap();
        let server = config.into_server_config();

        assert_eq!(server.socket_addr(), "127.0.0.1:8080");
        assert_eq!(server.fetch.max_concurrent_downloads, 20);
        assert_eq!(server.fetch.max_retries, 0);
        assert_eq!(server.audio.channels, 1);
        assert_eq!(server.audio.sample_rate, 16_000);
        assert_eq!(server.audio.codec, "libmp3lame");
        assert_eq!(server.jobs.ttl_secs, 1800);
        assert_eq!(server.lookup.param, "sbat_id");
        assert_eq!(server.lookup.references["1234"].len(), 1);
    }

    #[test]
    fn test_into_server_config() {
        let server_config = ConfigFile::default_config().into_server_config();
        assert_eq!(server_config.port, 3000);
        assert_eq!(server_config.audio.bitrate_kbps, Some(192));
        assert_eq!(server_config.transcription.model, "nova-2");
    }

    #[test]
    fn test_generate_default_config() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_path_buf();

        generate_default_config(&path).unwrap();

        assert!(path.exists());
        let loaded = ConfigFile::from_file(&path).unwrap();
        assert_eq!(loaded.server.port, 3000);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let (config, warning) = load_server_config("/nonexistent/hls-assembler.toml");
        assert_eq!(config.jobs.ttl_secs, 1800);
        assert!(warning.is_none());
    }

    #[test]
    fn test_invalid_file_falls_back_to_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"this is = = not toml").unwrap();
        let (config, warning) = load_server_config(temp_file.path().to_str().unwrap());
        assert_eq!(config.fetch.max_concurrent_downloads, 5);
        assert!(warning.unwrap().contains("Using defaults"));
    }
}
