//! In-process providers for actor tests.

use super::{
    AudioStream, ProviderError, Providers, RecognitionParams, Recognizer, RecognizerCommand,
    RecognizerConnection, RecognizerEvent, Synthesizer, Translator,
};
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

/// Commands a recognizer connection has received.
#[derive(Debug, Default)]
pub struct LinkLog {
    pub audio: Vec<u8>,
    pub keepalives: usize,
    pub closed: bool,
}

/// Test side of one recognizer connection.
pub struct FakeLink {
    pub params: RecognitionParams,
    pub commands: mpsc::UnboundedReceiver<RecognizerCommand>,
    pub events: mpsc::UnboundedSender<RecognizerEvent>,
}

impl FakeLink {
    pub fn final_transcript(&self, text: &str) {
        let _ = self.events.send(RecognizerEvent::Transcript {
            text: text.to_string(),
            is_final: true,
            confidence: 0.95,
        });
    }

    pub fn interim_transcript(&self, text: &str) {
        let _ = self.events.send(RecognizerEvent::Transcript {
            text: text.to_string(),
            is_final: false,
            confidence: 0.5,
        });
    }

    /// Everything received since the last drain.
    pub fn drain_commands(&mut self) -> LinkLog {
        let mut log = LinkLog::default();
        while let Ok(command) = self.commands.try_recv() {
            match command {
                RecognizerCommand::Audio(bytes) => log.audio.extend(bytes),
                RecognizerCommand::KeepAlive => log.keepalives += 1,
                RecognizerCommand::Close => log.closed = true,
            }
        }
        log
    }
}

pub struct FakeRecognizer {
    links: mpsc::UnboundedSender<FakeLink>,
    missing_key: bool,
}

impl FakeRecognizer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FakeLink>) {
        let (links, rx) = mpsc::unbounded_channel();
        (
            Self {
                links,
                missing_key: false,
            },
            rx,
        )
    }

    pub fn without_key() -> Self {
        let (mut recognizer, _rx) = Self::new();
        recognizer.missing_key = true;
        recognizer
    }
}

#[async_trait]
impl Recognizer for FakeRecognizer {
    fn preflight(&self) -> Result<(), ProviderError> {
        if self.missing_key {
            Err(ProviderError::MissingCredential("DEEPGRAM_API_KEY"))
        } else {
            Ok(())
        }
    }

    async fn connect(
        &self,
        params: RecognitionParams,
        _cancel: CancellationToken,
    ) -> Result<RecognizerConnection, ProviderError> {
        self.preflight()?;
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        self.links
            .send(FakeLink {
                params,
                commands: command_rx,
                events: event_tx,
            })
            .map_err(|_| ProviderError::Connection("test dropped the link receiver".to_string()))?;

        Ok(RecognizerConnection {
            commands: command_tx,
            events: UnboundedReceiverStream::new(event_rx).boxed(),
        })
    }
}

/// Prefixes text with the target language; texts containing `fail_on` error out.
#[derive(Default)]
pub struct FakeTranslator {
    pub calls: Mutex<Vec<(String, String)>>,
    pub fail_on: Option<String>,
    pub delay: Option<Duration>,
}

#[async_trait]
impl Translator for FakeTranslator {
    fn preflight(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn translate(&self, text: &str, target_language: &str) -> Result<String, ProviderError> {
        self.calls
            .lock()
            .push((text.to_string(), target_language.to_string()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(marker) = &self.fail_on {
            if text.contains(marker.as_str()) {
                return Err(ProviderError::Http {
                    status: 500,
                    body: "translation backend down".to_string(),
                });
            }
        }
        Ok(format!("[{}] {}", target_language, text))
    }
}

/// Test side of one synthesis stream when the synthesizer is in manual mode.
pub struct FakeSpeech {
    pub text: String,
    pub chunks: mpsc::UnboundedSender<Result<Vec<u8>, ProviderError>>,
}

pub enum SpeechScript {
    /// Every utterance streams these chunks and ends
    Chunks(Vec<Vec<u8>>),
    /// Every utterance is handed to the test, which feeds and ends the stream
    Manual(mpsc::UnboundedSender<FakeSpeech>),
}

pub struct FakeSynthesizer {
    script: SpeechScript,
    /// Texts containing this marker fail before any audio is produced
    fail_on: Option<String>,
    pub spoken: Mutex<Vec<String>>,
}

impl FakeSynthesizer {
    pub fn chunks(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            script: SpeechScript::Chunks(chunks),
            fail_on: None,
            spoken: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(mut self, marker: &str) -> Self {
        self.fail_on = Some(marker.to_string());
        self
    }

    pub fn manual() -> (Self, mpsc::UnboundedReceiver<FakeSpeech>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                script: SpeechScript::Manual(tx),
                fail_on: None,
                spoken: Mutex::new(Vec::new()),
            },
            rx,
        )
    }
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    fn preflight(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn synthesize(&self, text: &str) -> Result<AudioStream, ProviderError> {
        self.spoken.lock().push(text.to_string());
        if let Some(marker) = &self.fail_on {
            if text.contains(marker.as_str()) {
                return Err(ProviderError::Http {
                    status: 503,
                    body: "speech backend unavailable".to_string(),
                });
            }
        }
        match &self.script {
            SpeechScript::Chunks(chunks) => {
                let items: Vec<Result<Vec<u8>, ProviderError>> =
                    chunks.iter().cloned().map(Ok).collect();
                Ok(stream::iter(items).boxed())
            }
            SpeechScript::Manual(handoff) => {
                let (tx, rx) = mpsc::unbounded_channel();
                handoff
                    .send(FakeSpeech {
                        text: text.to_string(),
                        chunks: tx,
                    })
                    .map_err(|_| ProviderError::Connection("test dropped speech receiver".to_string()))?;
                Ok(UnboundedReceiverStream::new(rx).boxed())
            }
        }
    }
}

pub fn providers(
    recognizer: FakeRecognizer,
    translator: FakeTranslator,
    synthesizer: FakeSynthesizer,
) -> (Providers, Arc<FakeTranslator>, Arc<FakeSynthesizer>) {
    let translator = Arc::new(translator);
    let synthesizer = Arc::new(synthesizer);
    (
        Providers {
            recognizer: Arc::new(recognizer),
            translator: translator.clone(),
            synthesizer: synthesizer.clone(),
        },
        translator,
        synthesizer,
    )
}
