//! # Configuration Management
//!
//! Loads the interpreter backend configuration from several layered sources:
//! - Built-in defaults (the `Default` impl below)
//! - An optional `config.toml` next to the binary
//! - Environment variables prefixed with `APP__` (double underscore separates sections)
//! - Well-known deployment variables (`HOST`, `PORT`, `DEEPGRAM_API_KEY`, `OPENAI_API_KEY`)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Well-known deployment variables
//! 2. `APP__SECTION__FIELD` environment variables (e.g. `APP__PIPELINE__IDLE_FLUSH_MS=800`)
//! 3. Configuration file (config.toml)
//! 4. Default values
//!
//! ## Sections:
//! - **server**: bind address
//! - **recognizer**: streaming speech-to-text connection parameters
//! - **translator**: chat-completion translation endpoint
//! - **synthesizer**: streamed speech synthesis endpoint
//! - **pipeline**: segmentation, keep-alive and batching knobs of each session
//! - **performance**: capacity limits and client heartbeat

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Each external provider gets its own section so credentials and endpoints
/// can be swapped independently (e.g. pointing the recognizer at a proxy
/// without touching translation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub recognizer: RecognizerConfig,
    pub translator: TranslatorConfig,
    pub synthesizer: SynthesizerConfig,
    pub pipeline: PipelineConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Streaming speech recognition (Deepgram live transcription).
///
/// ## Fixed audio format:
/// The wire format is always 16-bit linear PCM, 16 kHz, mono. Only the knobs a
/// deployment may reasonably tune are exposed here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizerConfig {
    /// API key; sessions report audio as unavailable when missing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub url: String,
    pub model: String,
    /// Recognition language used when a session declares none
    pub language: String,
    pub endpointing_ms: u32,
    pub interim_results: bool,
}

/// Translation through an OpenAI-compatible chat completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatorConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

/// Speech synthesis (Deepgram Speak). The response body is streamed back
/// chunk by chunk as raw PCM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesizerConfig {
    /// Falls back to the recognizer key when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub url: String,
    pub model: String,
    pub encoding: String,
    pub sample_rate: u32,
    pub container: String,
    /// Longest wait for the next audio chunk (or the response itself) before
    /// the utterance is abandoned
    pub chunk_timeout_ms: u64,
}

impl SynthesizerConfig {
    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }
}

/// Per-session pipeline behavior.
///
/// ## Fields:
/// - `idle_flush_ms`: silence after the last final fragment before the
///   transcript buffer is flushed to translation
/// - `keepalive_secs`: period of recognizer keep-alive messages
/// - `connect_timeout_secs`: how long to wait for the recognizer to report
///   open before warning
/// - `recognizer_chunk_bytes`: largest single write to the recognizer (even)
/// - `forward_interim`: relay interim transcripts to peers for live captions
/// - `default_language`: assumed spoken/target language when nobody declared one
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub idle_flush_ms: u64,
    pub keepalive_secs: u64,
    pub connect_timeout_secs: u64,
    pub recognizer_chunk_bytes: usize,
    pub forward_interim: bool,
    pub default_language: String,
}

/// Capacity and liveness tuning.
///
/// ## Tuning guidelines:
/// Every session holds one recognizer socket open for its whole lifetime,
/// so `max_concurrent_sessions` is effectively a cap on provider connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
}

/// A credential counts as configured when it is set and not blank.
pub fn configured_key(key: Option<&str>) -> Option<&str> {
    key.filter(|key| !key.trim().is_empty())
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            recognizer: RecognizerConfig {
                api_key: None,
                url: "wss://api.deepgram.com/v1/listen".to_string(),
                model: "nova-2".to_string(),
                language: "en-US".to_string(),
                endpointing_ms: 200,
                interim_results: true,
            },
            translator: TranslatorConfig {
                api_key: None,
                base_url: "https://api.openai.com/v1".to_string(),
                model: "gpt-4o-mini".to_string(),
                timeout_secs: 30,
            },
            synthesizer: SynthesizerConfig {
                api_key: None,
                url: "https://api.deepgram.com/v1/speak".to_string(),
                model: "aura-asteria-en".to_string(),
                encoding: "linear16".to_string(),
                sample_rate: 16000,
                container: "none".to_string(),
                chunk_timeout_ms: 10_000,
            },
            pipeline: PipelineConfig {
                idle_flush_ms: 1000,
                keepalive_secs: 5,
                connect_timeout_secs: 5,
                recognizer_chunk_bytes: 4096,
                forward_interim: true,
                default_language: "English".to_string(),
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 100,
                heartbeat_interval_secs: 30,
                client_timeout_secs: 60,
            },
        }
    }
}

impl PipelineConfig {
    pub fn idle_flush(&self) -> Duration {
        Duration::from_millis(self.idle_flush_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP__SERVER__PORT=3000`: Override server port
    /// - `APP__RECOGNIZER__MODEL=nova-3`: Override recognition model
    /// - `DEEPGRAM_API_KEY=...`: Recognizer (and synthesizer) credential
    /// - `OPENAI_API_KEY=...`: Translator credential
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(key) = env::var("DEEPGRAM_API_KEY") {
            settings = settings.set_override("recognizer.api_key", key)?;
        }

        if let Ok(key) = env::var("OPENAI_API_KEY") {
            settings = settings.set_override("translator.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - At least one session may be active
    /// - Idle flush, keep-alive and synthesis chunk timeouts are non-zero
    /// - Recognizer writes are a positive, even number of bytes (whole samples)
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.pipeline.idle_flush_ms == 0 {
            return Err(anyhow::anyhow!("Idle flush period must be greater than 0"));
        }

        if self.pipeline.keepalive_secs == 0 {
            return Err(anyhow::anyhow!("Recognizer keep-alive period must be greater than 0"));
        }

        if self.synthesizer.chunk_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Synthesis chunk timeout must be greater than 0"));
        }

        let chunk = self.pipeline.recognizer_chunk_bytes;
        if chunk == 0 || chunk % 2 != 0 {
            return Err(anyhow::anyhow!(
                "Recognizer chunk size must be a positive even number of bytes, got {}",
                chunk
            ));
        }

        Ok(())
    }

    /// Key used for speech synthesis: its own, else the recognizer's.
    pub fn synthesizer_api_key(&self) -> Option<String> {
        self.synthesizer
            .api_key
            .clone()
            .or_else(|| self.recognizer.api_key.clone())
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// ## Partial updates:
    /// Only the fields present are changed. For example `{"pipeline": {"idle_flush_ms": 700}}`
    /// shortens the debounce for sessions started afterwards. Credentials and provider
    /// endpoints are deliberately not updatable at runtime.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = u16::try_from(port)
                    .map_err(|_| anyhow::anyhow!("Server port out of range: {}", port))?;
            }
        }

        if let Some(pipeline) = partial_config.get("pipeline") {
            if let Some(ms) = pipeline.get("idle_flush_ms").and_then(|v| v.as_u64()) {
                self.pipeline.idle_flush_ms = ms;
            }
            if let Some(secs) = pipeline.get("keepalive_secs").and_then(|v| v.as_u64()) {
                self.pipeline.keepalive_secs = secs;
            }
            if let Some(secs) = pipeline.get("connect_timeout_secs").and_then(|v| v.as_u64()) {
                self.pipeline.connect_timeout_secs = secs;
            }
            if let Some(bytes) = pipeline.get("recognizer_chunk_bytes").and_then(|v| v.as_u64()) {
                self.pipeline.recognizer_chunk_bytes = bytes as usize;
            }
            if let Some(forward) = pipeline.get("forward_interim").and_then(|v| v.as_bool()) {
                self.pipeline.forward_interim = forward;
            }
            if let Some(language) = pipeline.get("default_language").and_then(|v| v.as_str()) {
                self.pipeline.default_language = language.to_string();
            }
        }

        if let Some(synthesizer) = partial_config.get("synthesizer") {
            if let Some(ms) = synthesizer.get("chunk_timeout_ms").and_then(|v| v.as_u64()) {
                self.synthesizer.chunk_timeout_ms = ms;
            }
        }

        if let Some(performance) = partial_config.get("performance") {
            if let Some(sessions) = performance.get("max_concurrent_sessions").and_then(|v| v.as_u64()) {
                self.performance.max_concurrent_sessions = sessions as usize;
            }
            if let Some(secs) = performance.get("heartbeat_interval_secs").and_then(|v| v.as_u64()) {
                self.performance.heartbeat_interval_secs = secs;
            }
            if let Some(secs) = performance.get("client_timeout_secs").and_then(|v| v.as_u64()) {
                self.performance.client_timeout_secs = secs;
            }
        }

        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.pipeline.idle_flush(), Duration::from_millis(1000));
        assert_eq!(config.pipeline.default_language, "English");
        assert!(config.recognizer.api_key.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.pipeline.recognizer_chunk_bytes = 4095;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.pipeline.idle_flush_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.synthesizer.chunk_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"server": {"port": 9090}, "pipeline": {"idle_flush_ms": 750}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.pipeline.idle_flush_ms, 750);
        assert_eq!(config.server.host, "127.0.0.1");

        assert!(config
            .update_from_json(r#"{"synthesizer": {"chunk_timeout_ms": 2500, "url": "http://evil"}}"#)
            .is_ok());
        assert_eq!(config.synthesizer.chunk_timeout(), Duration::from_millis(2500));
        assert_eq!(config.synthesizer.url, "https://api.deepgram.com/v1/speak");
    }

    #[test]
    fn test_config_update_rejects_invalid_values() {
        let mut config = AppConfig::default();
        assert!(config.update_from_json(r#"{"server": {"port": 70000}}"#).is_err());
        assert!(config
            .update_from_json(r#"{"pipeline": {"recognizer_chunk_bytes": 3}}"#)
            .is_err());
    }

    #[test]
    fn test_blank_keys_are_not_configured() {
        assert_eq!(configured_key(Some("dg-key")), Some("dg-key"));
        assert_eq!(configured_key(Some("   ")), None);
        assert_eq!(configured_key(None), None);
    }

    #[test]
    fn test_synthesizer_key_falls_back_to_recognizer() {
        let mut config = AppConfig::default();
        assert!(config.synthesizer_api_key().is_none());

        config.recognizer.api_key = Some("dg-key".to_string());
        assert_eq!(config.synthesizer_api_key().as_deref(), Some("dg-key"));

        config.synthesizer.api_key = Some("speak-key".to_string());
        assert_eq!(config.synthesizer_api_key().as_deref(), Some("speak-key"));
    }
}
