//! # Deepgram Speak
//!
//! Text-to-speech over `POST /v1/speak`. The response body is raw PCM
//! (`container=none`) and is handed back as a stream of network chunks
//! without buffering; chunk boundaries are arbitrary and may split samples.

use super::{AudioStream, ProviderError, Synthesizer};
use crate::config::{configured_key, SynthesizerConfig};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Url;
use serde_json::json;
use tracing::debug;

pub struct DeepgramSpeak {
    http: reqwest::Client,
    config: SynthesizerConfig,
    api_key: Option<String>,
}

impl DeepgramSpeak {
    /// `api_key` is resolved by the caller (own key, else the recognizer's).
    pub fn new(http: reqwest::Client, config: SynthesizerConfig, api_key: Option<String>) -> Self {
        Self {
            http,
            config,
            api_key,
        }
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        configured_key(self.api_key.as_deref())
            .ok_or(ProviderError::MissingCredential("DEEPGRAM_API_KEY"))
    }

    pub fn speak_url(&self) -> Result<Url, ProviderError> {
        let sample_rate = self.config.sample_rate.to_string();
        Url::parse_with_params(
            &self.config.url,
            &[
                ("model", self.config.model.as_str()),
                ("encoding", self.config.encoding.as_str()),
                ("sample_rate", sample_rate.as_str()),
                ("container", self.config.container.as_str()),
            ],
        )
        .map_err(|e| ProviderError::Connection(format!("invalid speak url: {}", e)))
    }
}

#[async_trait]
impl Synthesizer for DeepgramSpeak {
    fn preflight(&self) -> Result<(), ProviderError> {
        self.api_key().map(|_| ())
    }

    async fn synthesize(&self, text: &str) -> Result<AudioStream, ProviderError> {
        let key = self.api_key()?;
        let response = self
            .http
            .post(self.speak_url()?)
            .header("Authorization", format!("Token {}", key))
            .json(&json!({ "text": text }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            });
        }

        debug!(chars = text.len(), "Speech stream opened");
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(ProviderError::from))
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_speak_url() {
        let config = AppConfig::default();
        let speak = DeepgramSpeak::new(reqwest::Client::new(), config.synthesizer, None);
        let url = speak.speak_url().unwrap();
        let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(url.path(), "/v1/speak");
        assert_eq!(query["encoding"], "linear16");
        assert_eq!(query["sample_rate"], "16000");
        assert_eq!(query["container"], "none");
        assert_eq!(query["model"], "aura-asteria-en");
    }

    #[test]
    fn test_preflight_uses_resolved_key() {
        let mut config = AppConfig::default();
        let speak = DeepgramSpeak::new(
            reqwest::Client::new(),
            config.synthesizer.clone(),
            config.synthesizer_api_key(),
        );
        assert!(speak.preflight().is_err());

        config.recognizer.api_key = Some("dg-key".to_string());
        let speak = DeepgramSpeak::new(
            reqwest::Client::new(),
            config.synthesizer.clone(),
            config.synthesizer_api_key(),
        );
        assert!(speak.preflight().is_ok());
    }
}
