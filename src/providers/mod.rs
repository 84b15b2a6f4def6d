//! # External Providers
//!
//! Capability traits for the three external services a session talks to,
//! plus their production implementations.
//!
//! ## Capabilities:
//! - **Recognizer**: bidirectional streaming speech-to-text ([`deepgram`])
//! - **Translator**: request/response text translation ([`openai`])
//! - **Synthesizer**: text-to-speech returning a byte stream ([`speak`])
//!
//! ## Threading:
//! Providers are shared by every session through `Arc<dyn Trait>`, so they
//! must be `Send + Sync`. Their futures run on the session's arbiter; the only
//! background work is the recognizer socket pump, which is bound to the
//! session's `CancellationToken`.

pub mod deepgram;
pub mod language;
pub mod openai;
pub mod speak;

#[cfg(test)]
pub mod fake;

use crate::config::AppConfig;
use actix::Message;
use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// Failures local to one provider call or connection.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("unexpected provider response: {0}")]
    Protocol(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("no data from provider within {0:?}")]
    Timeout(std::time::Duration),
}

/// Fixed and per-session parameters for one recognition stream.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionParams {
    /// Recognition language code (e.g. `en-US`, `hi`)
    pub language: String,
    pub model: String,
    pub sample_rate: u32,
    pub channels: u8,
    pub interim_results: bool,
    pub endpointing_ms: u32,
    /// Largest single binary write on the socket
    pub max_write_bytes: usize,
}

/// What the session sends down an open recognizer link.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognizerCommand {
    Audio(Vec<u8>),
    KeepAlive,
    Close,
}

/// What a recognizer link reports back.
#[derive(Debug, Clone, PartialEq, Message)]
#[rtype(result = "()")]
pub enum RecognizerEvent {
    Transcript {
        text: String,
        is_final: bool,
        confidence: f64,
    },
    Error(String),
    Closed,
}

/// An established recognizer connection: a command channel in, an event stream out.
pub struct RecognizerConnection {
    pub commands: UnboundedSender<RecognizerCommand>,
    pub events: BoxStream<'static, RecognizerEvent>,
}

impl std::fmt::Debug for RecognizerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecognizerConnection").finish_non_exhaustive()
    }
}

/// Streaming speech-to-text.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Cheap configuration check run when a session starts.
    fn preflight(&self) -> Result<(), ProviderError>;

    /// Open one streaming connection. Resolves once the provider accepted it.
    async fn connect(
        &self,
        params: RecognitionParams,
        cancel: CancellationToken,
    ) -> Result<RecognizerConnection, ProviderError>;
}

/// Text translation.
#[async_trait]
pub trait Translator: Send + Sync {
    fn preflight(&self) -> Result<(), ProviderError>;

    async fn translate(&self, text: &str, target_language: &str) -> Result<String, ProviderError>;
}

/// Chunks of synthesized audio, in arrival order.
pub type AudioStream = BoxStream<'static, Result<Vec<u8>, ProviderError>>;

/// Text-to-speech returning a readable byte stream.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    fn preflight(&self) -> Result<(), ProviderError>;

    async fn synthesize(&self, text: &str) -> Result<AudioStream, ProviderError>;
}

/// The provider set every session is wired to.
#[derive(Clone)]
pub struct Providers {
    pub recognizer: Arc<dyn Recognizer>,
    pub translator: Arc<dyn Translator>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Providers").finish_non_exhaustive()
    }
}

impl Providers {
    /// Build the Deepgram/OpenAI providers from configuration.
    ///
    /// Missing credentials are not an error here; they surface per session
    /// through `preflight`.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("interpreter-backend/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            recognizer: Arc::new(deepgram::DeepgramRecognizer::new(config.recognizer.clone())),
            translator: Arc::new(openai::OpenAiTranslator::new(
                http.clone(),
                config.translator.clone(),
            )),
            synthesizer: Arc::new(speak::DeepgramSpeak::new(
                http,
                config.synthesizer.clone(),
                config.synthesizer_api_key(),
            )),
        })
    }
}
