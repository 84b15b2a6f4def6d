//! # Deepgram Live Transcription
//!
//! Streams 16-bit PCM to `wss://api.deepgram.com/v1/listen` and turns the
//! `Results` messages coming back into [`RecognizerEvent`]s.
//!
//! ## Connection Flow:
//! 1. `connect()` builds the listen URL, authenticates with `Authorization: Token <key>`
//!    and completes the WebSocket handshake
//! 2. A pump task is spawned that owns the socket: it writes audio / keep-alive /
//!    close commands and reads transcript messages
//! 3. The pump ends when the server closes, on a socket error, or when the
//!    session's cancellation token fires
//!
//! ## Control Messages:
//! - `{"type":"KeepAlive"}` keeps an idle stream from timing out
//! - `{"type":"CloseStream"}` asks the server to flush and close

use super::{
    ProviderError, RecognitionParams, Recognizer, RecognizerCommand, RecognizerConnection,
    RecognizerEvent,
};
use crate::audio::batcher::split_for_send;
use crate::config::{configured_key, RecognizerConfig};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
    MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const KEEP_ALIVE: &str = r#"{"type":"KeepAlive"}"#;
const CLOSE_STREAM: &str = r#"{"type":"CloseStream"}"#;

/// Upper bound for the WebSocket handshake itself
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

type DeepgramSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct DeepgramRecognizer {
    config: RecognizerConfig,
}

impl DeepgramRecognizer {
    pub fn new(config: RecognizerConfig) -> Self {
        Self { config }
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        configured_key(self.config.api_key.as_deref())
            .ok_or(ProviderError::MissingCredential("DEEPGRAM_API_KEY"))
    }

    /// Listen URL with every recognition parameter as a query pair.
    pub fn listen_url(&self, params: &RecognitionParams) -> Result<Url, ProviderError> {
        let sample_rate = params.sample_rate.to_string();
        let channels = params.channels.to_string();
        let endpointing = params.endpointing_ms.to_string();
        let interim = params.interim_results.to_string();

        Url::parse_with_params(
            &self.config.url,
            &[
                ("encoding", "linear16"),
                ("sample_rate", sample_rate.as_str()),
                ("channels", channels.as_str()),
                ("model", params.model.as_str()),
                ("language", params.language.as_str()),
                ("punctuate", "true"),
                ("smart_format", "true"),
                ("interim_results", interim.as_str()),
                ("endpointing", endpointing.as_str()),
                ("vad_events", "true"),
            ],
        )
        .map_err(|e| ProviderError::Connection(format!("invalid listen url: {}", e)))
    }
}

#[async_trait]
impl Recognizer for DeepgramRecognizer {
    fn preflight(&self) -> Result<(), ProviderError> {
        self.api_key().map(|_| ())
    }

    async fn connect(
        &self,
        params: RecognitionParams,
        cancel: CancellationToken,
    ) -> Result<RecognizerConnection, ProviderError> {
        let key = self.api_key()?;
        let url = self.listen_url(&params)?;

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ProviderError::Connection(e.to_string()))?;
        request.headers_mut().insert(
            "Authorization",
            HeaderValue::from_str(&format!("Token {}", key))
                .map_err(|e| ProviderError::Connection(e.to_string()))?,
        );

        debug!(model = %params.model, language = %params.language, "Connecting to Deepgram");

        let (socket, _response) = timeout(HANDSHAKE_TIMEOUT, connect_async(request))
            .await
            .map_err(|_| ProviderError::Connection("handshake timed out".to_string()))?
            .map_err(|e| ProviderError::Connection(e.to_string()))?;

        info!(language = %params.language, "Deepgram stream open");

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_pump(
            socket,
            command_rx,
            event_tx,
            params.max_write_bytes,
            cancel,
        ));

        Ok(RecognizerConnection {
            commands: command_tx,
            events: UnboundedReceiverStream::new(event_rx).boxed(),
        })
    }
}

/// Own the socket until it closes. Every exit path reports `Closed` or `Error`.
async fn run_pump(
    socket: DeepgramSocket,
    mut commands: mpsc::UnboundedReceiver<RecognizerCommand>,
    events: mpsc::UnboundedSender<RecognizerEvent>,
    max_write_bytes: usize,
    cancel: CancellationToken,
) {
    let (mut sink, mut stream) = socket.split();
    let mut commands_open = true;

    loop {
        // Queued commands (final audio, Close) go out before cancellation
        tokio::select! {
            biased;

            command = commands.recv(), if commands_open => {
                let outcome = match command {
                    Some(RecognizerCommand::Audio(batch)) => {
                        let mut result = Ok(());
                        for piece in split_for_send(&batch, max_write_bytes) {
                            result = sink.send(Message::Binary(piece.to_vec())).await;
                            if result.is_err() {
                                break;
                            }
                        }
                        result
                    }
                    Some(RecognizerCommand::KeepAlive) => {
                        sink.send(Message::Text(KEEP_ALIVE.to_string())).await
                    }
                    Some(RecognizerCommand::Close) | None => {
                        // Keep reading so late finals still arrive before the server closes
                        commands_open = false;
                        sink.send(Message::Text(CLOSE_STREAM.to_string())).await
                    }
                };
                if let Err(e) = outcome {
                    let _ = events.send(RecognizerEvent::Error(e.to_string()));
                    return;
                }
            }
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Text(CLOSE_STREAM.to_string())).await;
                let _ = sink.close().await;
                debug!("Deepgram pump cancelled");
                return;
            }
            message = stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = parse_message(&text) {
                            if events.send(event).is_err() {
                                return;
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "Deepgram closed the stream");
                        let _ = events.send(RecognizerEvent::Closed);
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Deepgram socket error");
                        let _ = events.send(RecognizerEvent::Error(e.to_string()));
                        return;
                    }
                    None => {
                        let _ = events.send(RecognizerEvent::Closed);
                        return;
                    }
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListenMessage {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    is_final: bool,
    #[serde(default)]
    channel: Option<ListenChannel>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListenChannel {
    #[serde(default)]
    alternatives: Vec<ListenAlternative>,
}

#[derive(Debug, Deserialize)]
struct ListenAlternative {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    confidence: f64,
}

/// Map one server text message to an event. Metadata, VAD and utterance-end
/// messages carry no transcript and yield `None`.
pub fn parse_message(text: &str) -> Option<RecognizerEvent> {
    let message: ListenMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "Unparseable Deepgram message");
            return None;
        }
    };

    match message.kind.as_str() {
        "Results" => {
            let alternative = message.channel?.alternatives.into_iter().next()?;
            Some(RecognizerEvent::Transcript {
                text: alternative.transcript,
                is_final: message.is_final,
                confidence: alternative.confidence,
            })
        }
        "Error" => Some(RecognizerEvent::Error(
            message
                .description
                .unwrap_or_else(|| "unspecified Deepgram error".to_string()),
        )),
        _ => None,
    }
}
