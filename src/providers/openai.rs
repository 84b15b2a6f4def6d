//! # Chat-Completion Translation
//!
//! Translates a segment with one `POST {base_url}/chat/completions` call.
//! Any OpenAI-compatible endpoint works; the base URL and model come from the
//! `translator` config section.

use super::{ProviderError, Translator};
use crate::config::{configured_key, TranslatorConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub struct OpenAiTranslator {
    http: reqwest::Client,
    config: TranslatorConfig,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// System prompt for spoken input: fillers and false starts are dropped,
/// fragments completed, and only the translation is returned.
pub fn system_prompt(target_language: &str) -> String {
    format!(
        "You are a professional interpreter. Translate what the user says into clear, \
         grammatically correct {target}. Leave out filler words, repetitions, false starts \
         and interruptions. If a sentence is cut off, complete it sensibly. Keep the \
         speaker's intent and tone. Reply with the {target} translation only.",
        target = target_language
    )
}

impl OpenAiTranslator {
    pub fn new(http: reqwest::Client, config: TranslatorConfig) -> Self {
        Self { http, config }
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        configured_key(self.config.api_key.as_deref())
            .ok_or(ProviderError::MissingCredential("OPENAI_API_KEY"))
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Translator for OpenAiTranslator {
    fn preflight(&self) -> Result<(), ProviderError> {
        self.api_key().map(|_| ())
    }

    async fn translate(&self, text: &str, target_language: &str) -> Result<String, ProviderError> {
        let key = self.api_key()?;
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt(target_language),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: text.to_string(),
                },
            ],
            temperature: 0.2,
        };

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(key)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .json(&request)
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

        let parsed: ChatResponse = response.json().await?;
        let translated = extract_translation(parsed)?;
        debug!(
            target_language,
            chars = translated.len(),
            "Translation received"
        );
        Ok(translated)
    }
}

fn extract_translation(response: ChatResponse) -> Result<String, ProviderError> {
    response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content.trim().to_string())
        .filter(|text| !text.is_empty())
        .ok_or_else(|| ProviderError::Protocol("completion contained no text".to_string()))
}
