//! # Session Controller
//!
//! One actix actor per connected client. It owns the whole per-session
//! pipeline and is the only code that mutates it:
//!
//! ```text
//! AudioFrame ─► AudioBatcher ─► RecognizerLink ─► LinkEvent(transcript)
//!      │                                               │
//!      └─► relay ChunkReassembler ─► peers             ▼
//!                                         TranscriptAggregator ─► TranslationDispatcher
//!                                                                        │
//!                 peers ◄─ speech ChunkReassembler ◄─ SpeechEvent ◄─ SpeechPlaybackQueue
//! ```
//!
//! ## Concurrency:
//! Handlers run one at a time on the actor's arbiter. Provider calls are
//! spawned into the actor context and come back as discrete events, either
//! through the `map` continuation of a spawned future or as items of a stream
//! attached to the context: recognizer events with `add_message_stream`,
//! synthesized audio with `add_stream` so the utterance can be cancelled
//! through its `SpawnHandle`. Timers (idle flush, keep-alive, connect
//! timeout) are context timers cancelled the same way.
//!
//! A synthesis call that does not answer, or a stream that goes quiet for
//! longer than `synthesizer.chunk_timeout_ms`, fails the utterance so the
//! playback queue moves on.
//!
//! ## Teardown:
//! `Disconnect` (or the actor stopping) flushes pending audio to a live link,
//! closes the link and cancels every timer and stream. An utterance cut off
//! mid-stream still gets its `audio:stream:stop`. Then all queues are cleared,
//! the session's `CancellationToken` fires and the session leaves its room
//! and personal room. Once the phase is
//! `Closed` every late continuation is ignored, so nothing more is emitted on
//! behalf of the session.

use crate::audio::{self, AudioBatcher, ChunkReassembler};
use crate::config::AppConfig;
use crate::pipeline::{
    AggregatorAction, Segment, SpeechPlaybackQueue, TranscriptAggregator, TranslationDispatcher,
};
use crate::protocol::{self, ClientEvent, ServerEvent};
use crate::providers::{
    language, AudioStream, ProviderError, RecognitionParams, RecognizerConnection,
    RecognizerEvent,
};
use crate::session::link::{Handshake, RecognizerLink};
use crate::session::manager::SessionSnapshot;
use crate::state::{AppState, PipelineEvent};
use actix::prelude::*;
use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A parsed text frame from the session's own client.
#[derive(Message)]
#[rtype(result = "()")]
pub struct ClientCommand(pub ClientEvent);

/// One binary audio frame from the session's own client.
#[derive(Message)]
#[rtype(result = "()")]
pub struct AudioFrame(pub Vec<u8>);

/// The client connection is gone.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Disconnect;

#[cfg(test)]
#[derive(Message)]
#[rtype(result = "SessionSnapshot")]
pub struct GetSnapshot;

/// Recognizer event tagged with the link generation that produced it.
#[derive(Message)]
#[rtype(result = "()")]
struct LinkEvent {
    generation: u64,
    event: RecognizerEvent,
}

struct SpeechEvent {
    utterance: u64,
    kind: SpeechEventKind,
}

enum SpeechEventKind {
    Chunk(Vec<u8>),
    Failed(String),
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Active,
    Closed,
}

pub struct SessionController {
    session_id: String,
    state: AppState,
    /// Configuration as of session start
    config: AppConfig,
    /// The session's own client
    outbox: Recipient<ServerEvent>,
    phase: Phase,

    room: Option<String>,
    language: String,
    language_declared: bool,
    recognition_available: bool,
    translation_available: bool,

    batcher: AudioBatcher,
    link: RecognizerLink,
    keepalive: Option<SpawnHandle>,
    aggregator: TranscriptAggregator,
    idle_flush: Option<SpawnHandle>,
    dispatcher: TranslationDispatcher,
    playback: SpeechPlaybackQueue,
    speech_stream: Option<SpawnHandle>,
    speech_reassembler: ChunkReassembler,
    relay_reassembler: ChunkReassembler,
    cancel: CancellationToken,

    audio_bytes_forwarded: u64,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl SessionController {
    pub fn new(session_id: String, state: AppState, outbox: Recipient<ServerEvent>) -> Self {
        let config = state.get_config();
        let now = Utc::now();
        Self {
            session_id,
            language: config.pipeline.default_language.clone(),
            config,
            state,
            outbox,
            phase: Phase::Active,
            room: None,
            language_declared: false,
            recognition_available: true,
            translation_available: true,
            batcher: AudioBatcher::new(),
            link: RecognizerLink::new(),
            keepalive: None,
            aggregator: TranscriptAggregator::new(),
            idle_flush: None,
            dispatcher: TranslationDispatcher::new(),
            playback: SpeechPlaybackQueue::new(),
            speech_stream: None,
            speech_reassembler: ChunkReassembler::new(),
            relay_reassembler: ChunkReassembler::new(),
            cancel: CancellationToken::new(),
            audio_bytes_forwarded: 0,
            created_at: now,
            last_activity: now,
        }
    }

    // ----- rooms and client events -------------------------------------

    fn join_room(&mut self, room: String, ctx: &mut Context<Self>) {
        if self.room.as_deref() == Some(room.as_str()) {
            self.state
                .rooms
                .join(&room, &self.session_id, &self.language, self.outbox.clone());
            self.outbox.do_send(ServerEvent::RoomJoined { room });
            return;
        }

        if self.room.is_some() {
            self.leave_room(true, ctx);
        }

        let peers = self
            .state
            .rooms
            .join(&room, &self.session_id, &self.language, self.outbox.clone());
        self.state.rooms.broadcast(
            &room,
            Some(&self.session_id),
            ServerEvent::UserJoined {
                user: self.session_id.clone(),
            },
        );
        self.outbox.do_send(ServerEvent::RoomJoined { room: room.clone() });

        info!(session_id = %self.session_id, room = %room, peers = peers.len(), "Joined room");
        self.room = Some(room);
    }

    /// Speech still queued was translated for this room's listeners and is
    /// dropped with it.
    fn leave_room(&mut self, notify_self: bool, ctx: &mut Context<Self>) {
        if self.room.is_none() {
            return;
        }
        self.interrupt_speech(ctx);
        self.playback.clear();

        let Some(room) = self.room.take() else {
            return;
        };

        self.relay_reassembler.finish();
        self.state.rooms.leave(&room, &self.session_id);
        self.state.rooms.broadcast(
            &room,
            None,
            ServerEvent::UserLeft {
                user: self.session_id.clone(),
            },
        );
        if notify_self {
            self.outbox.do_send(ServerEvent::RoomLeft { room: room.clone() });
        }
        info!(session_id = %self.session_id, room = %room, "Left room");
    }

    /// A live or opening link is reopened when the recognition code changes.
    fn set_language(&mut self, language: String, ctx: &mut Context<Self>) {
        debug!(session_id = %self.session_id, language = %language, "Language declared");
        let previous = self.recognition_params().language;

        if let Some(room) = &self.room {
            self.state
                .rooms
                .set_language(room, &self.session_id, &language);
        }
        self.language = language;
        self.language_declared = true;

        let current = self.recognition_params().language;
        if current != previous && (self.link.is_connected() || self.link.is_connecting()) {
            info!(
                session_id = %self.session_id,
                from = %previous,
                to = %current,
                "Recognition language changed, reopening recognizer link"
            );
            self.flush_audio(false, ctx);
            self.link.close();
            self.stop_keepalive(ctx);
            self.open_link(ctx);
        }
    }

    /// Send `event` to everyone in the session's room except the session itself.
    fn broadcast(&self, event: ServerEvent) {
        if let Some(room) = &self.room {
            self.state
                .rooms
                .broadcast(room, Some(&self.session_id), event);
        }
    }

    fn reject(&self, code: &str, message: impl Into<String>) {
        let message = message.into();
        warn!(session_id = %self.session_id, code, message = %message, "Rejected client event");
        self.outbox.do_send(ServerEvent::error(code, message));
    }

    // ----- audio batching and the recognizer link ----------------------

    /// Forward queued audio. With `open_if_idle`, an idle link is (re)opened
    /// when audio is waiting; a connecting link keeps the audio queued.
    fn flush_audio(&mut self, open_if_idle: bool, ctx: &mut Context<Self>) {
        if !self.recognition_available {
            self.batcher.clear();
            return;
        }

        if self.link.is_connected() {
            let Some(batch) = self.batcher.take_batch() else {
                return;
            };
            let len = batch.len() as u64;
            match self.link.send_audio(batch) {
                Ok(()) => {
                    self.audio_bytes_forwarded += len;
                    self.state.record(PipelineEvent::AudioForwarded(len));
                }
                Err((e, batch)) => {
                    warn!(session_id = %self.session_id, error = %e, "Recognizer send failed, audio requeued");
                    self.batcher.requeue(batch);
                    self.stop_keepalive(ctx);
                }
            }
        } else if !self.link.is_connecting() && open_if_idle && !self.batcher.is_empty() {
            self.open_link(ctx);
        }
    }

    fn recognition_params(&self) -> RecognitionParams {
        let recognizer = &self.config.recognizer;
        let language = if self.language_declared {
            language::recognition_code(&self.language, &recognizer.language)
        } else {
            recognizer.language.clone()
        };

        RecognitionParams {
            language,
            model: recognizer.model.clone(),
            sample_rate: audio::SAMPLE_RATE,
            channels: audio::CHANNELS,
            interim_results: recognizer.interim_results,
            endpointing_ms: recognizer.endpointing_ms,
            max_write_bytes: self.config.pipeline.recognizer_chunk_bytes,
        }
    }

    fn open_link(&mut self, ctx: &mut Context<Self>) {
        let generation = match self.link.begin_open() {
            Ok(generation) => generation,
            Err(e) => {
                debug!(session_id = %self.session_id, error = %e, "Recognizer open skipped");
                return;
            }
        };

        let params = self.recognition_params();
        info!(
            session_id = %self.session_id,
            generation,
            language = %params.language,
            "Opening recognizer link"
        );

        let timeout = self.config.pipeline.connect_timeout();
        ctx.run_later(timeout, move |act, _ctx| {
            if act.link.is_connecting_generation(generation) {
                warn!(
                    session_id = %act.session_id,
                    generation,
                    "Recognizer did not open within {:?}",
                    timeout
                );
            }
        });

        let recognizer = self.state.providers.recognizer.clone();
        let cancel = self.cancel.child_token();
        ctx.spawn(
            async move { recognizer.connect(params, cancel).await }
                .into_actor(self)
                .map(move |result, act, ctx| act.on_link_opened(generation, result, ctx)),
        );
    }

    fn on_link_opened(
        &mut self,
        generation: u64,
        result: Result<RecognizerConnection, ProviderError>,
        ctx: &mut Context<Self>,
    ) {
        match result {
            Ok(RecognizerConnection { commands, events }) => {
                match self.link.connected(generation, commands) {
                    Handshake::Connected => {
                        info!(session_id = %self.session_id, generation, "Recognizer link open");
                        self.state.record(PipelineEvent::RecognizerOpened);
                        self.start_keepalive(ctx);
                        ctx.add_message_stream(
                            events.map(move |event| LinkEvent { generation, event }),
                        );
                        self.flush_audio(true, ctx);
                    }
                    outcome => {
                        debug!(session_id = %self.session_id, generation, ?outcome, "Discarded recognizer connection");
                    }
                }
            }
            Err(e) => {
                if self.link.fail(generation) {
                    error!(session_id = %self.session_id, generation, error = %e, "Recognizer connection failed");
                }
            }
        }
        self.publish();
    }

    fn start_keepalive(&mut self, ctx: &mut Context<Self>) {
        self.stop_keepalive(ctx);
        let interval = self.config.pipeline.keepalive_interval();
        self.keepalive = Some(ctx.run_interval(interval, |act, ctx| {
            if let Err(e) = act.link.keep_alive() {
                debug!(session_id = %act.session_id, error = %e, "Keep-alive stopped");
                act.stop_keepalive(ctx);
            }
        }));
    }

    fn stop_keepalive(&mut self, ctx: &mut Context<Self>) {
        if let Some(handle) = self.keepalive.take() {
            ctx.cancel_future(handle);
        }
    }

    // ----- transcripts and segmentation ---------------------------------

    fn on_transcript(&mut self, text: &str, is_final: bool, confidence: f64, ctx: &mut Context<Self>) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        if is_final || self.config.pipeline.forward_interim {
            if let Some(room) = &self.room {
                self.state.rooms.broadcast(
                    room,
                    Some(&self.session_id),
                    ServerEvent::TranscriptReceived {
                        speaker: self.session_id.clone(),
                        room: room.clone(),
                        text: text.to_string(),
                        is_final,
                        confidence,
                        timestamp: Utc::now().timestamp_millis(),
                    },
                );
            }
        }

        if !is_final {
            return;
        }

        match self.aggregator.push_final(text) {
            AggregatorAction::Ignored => {}
            AggregatorAction::Flush(segment) => {
                self.cancel_idle_flush(ctx);
                self.submit_segment(segment, ctx);
            }
            AggregatorAction::ScheduleIdleFlush => self.schedule_idle_flush(ctx),
        }
    }

    fn schedule_idle_flush(&mut self, ctx: &mut Context<Self>) {
        self.cancel_idle_flush(ctx);
        let idle = self.config.pipeline.idle_flush();
        self.idle_flush = Some(ctx.run_later(idle, |act, ctx| {
            act.idle_flush = None;
            if act.phase == Phase::Closed {
                return;
            }
            if let Some(segment) = act.aggregator.flush() {
                debug!(session_id = %act.session_id, "Idle flush");
                act.submit_segment(segment, ctx);
            }
            act.publish();
        }));
    }

    fn cancel_idle_flush(&mut self, ctx: &mut Context<Self>) {
        if let Some(handle) = self.idle_flush.take() {
            ctx.cancel_future(handle);
        }
    }

    // ----- translation ---------------------------------------------------

    fn submit_segment(&mut self, text: String, ctx: &mut Context<Self>) {
        if self.room.is_none() {
            debug!(session_id = %self.session_id, "No room to translate for, segment dropped");
            self.state.record(PipelineEvent::SegmentDropped);
            return;
        }
        if !self.translation_available {
            self.state.record(PipelineEvent::SegmentDropped);
            return;
        }

        if let Some(segment) = self.dispatcher.submit(text) {
            self.start_translation(segment, ctx);
        }
    }

    fn start_translation(&mut self, segment: Segment, ctx: &mut Context<Self>) {
        let Some(room) = self.room.clone() else {
            self.state.record(PipelineEvent::SegmentDropped);
            self.translation_finished(segment.id, ctx);
            return;
        };

        let declared = self.state.rooms.peer_language(
            &room,
            &self.session_id,
            &self.config.pipeline.default_language,
        );
        let target = language::display_name(&declared);
        debug!(session_id = %self.session_id, segment = segment.id, target = %target, "Translating segment");

        let translator = self.state.providers.translator.clone();
        let text = segment.text.clone();
        let call_target = target.clone();
        ctx.spawn(
            async move { translator.translate(&text, &call_target).await }
                .into_actor(self)
                .map(move |result, act, ctx| act.on_translation(segment, target, result, ctx)),
        );
    }

    fn on_translation(
        &mut self,
        segment: Segment,
        target: String,
        result: Result<String, ProviderError>,
        ctx: &mut Context<Self>,
    ) {
        if self.phase == Phase::Closed {
            return;
        }

        match result {
            Ok(translated) if !translated.trim().is_empty() => {
                self.state.record(PipelineEvent::SegmentTranslated);
                info!(
                    session_id = %self.session_id,
                    segment = segment.id,
                    target = %target,
                    latency_ms = segment.flushed_at.elapsed().as_millis() as u64,
                    "Segment translated"
                );
                self.broadcast(ServerEvent::TranslationReceived {
                    speaker: self.session_id.clone(),
                    text: translated.clone(),
                    language: target.clone(),
                    timestamp: Utc::now().timestamp_millis(),
                });
                self.playback.enqueue(translated, target);
                self.pump_playback(ctx);
            }
            Ok(_) => {
                warn!(session_id = %self.session_id, segment = segment.id, "Empty translation, segment dropped");
                self.state.record(PipelineEvent::SegmentDropped);
            }
            Err(e) => {
                warn!(session_id = %self.session_id, segment = segment.id, error = %e, "Translation failed, segment dropped");
                self.state.record(PipelineEvent::SegmentDropped);
            }
        }

        self.translation_finished(segment.id, ctx);
        self.publish();
    }

    fn translation_finished(&mut self, id: u64, ctx: &mut Context<Self>) {
        if let Some(next) = self.dispatcher.complete(id) {
            self.start_translation(next, ctx);
        }
    }

    // ----- speech playback -----------------------------------------------

    fn pump_playback(&mut self, ctx: &mut Context<Self>) {
        if self.phase == Phase::Closed {
            return;
        }
        let Some(utterance) = self.playback.pump() else {
            return;
        };

        self.broadcast(ServerEvent::SpeechStart {
            speaker: self.session_id.clone(),
            language: utterance.language.clone(),
        });

        let synthesizer = self.state.providers.synthesizer.clone();
        let id = utterance.id;
        let wait = self.config.synthesizer.chunk_timeout();
        ctx.spawn(
            async move {
                tokio::time::timeout(wait, synthesizer.synthesize(&utterance.text))
                    .await
                    .unwrap_or_else(|_| Err(ProviderError::Timeout(wait)))
            }
            .into_actor(self)
            .map(move |result, act, ctx| act.on_speech_opened(id, result, ctx)),
        );
    }

    fn on_speech_opened(
        &mut self,
        utterance: u64,
        result: Result<AudioStream, ProviderError>,
        ctx: &mut Context<Self>,
    ) {
        if self.phase == Phase::Closed || self.playback.current() != Some(utterance) {
            return;
        }

        match result {
            Ok(chunks) => {
                self.speech_reassembler = ChunkReassembler::new();
                let gap = self.config.synthesizer.chunk_timeout();
                let events = tokio_stream::StreamExt::timeout(chunks, gap)
                    .map(move |chunk| SpeechEvent {
                        utterance,
                        kind: match chunk {
                            Ok(Ok(bytes)) => SpeechEventKind::Chunk(bytes),
                            Ok(Err(e)) => SpeechEventKind::Failed(e.to_string()),
                            Err(_) => SpeechEventKind::Failed(ProviderError::Timeout(gap).to_string()),
                        },
                    })
                    .chain(stream::once(async move {
                        SpeechEvent {
                            utterance,
                            kind: SpeechEventKind::Finished,
                        }
                    }));
                self.speech_stream = Some(ctx.add_stream(events));
            }
            Err(e) => {
                warn!(session_id = %self.session_id, utterance, error = %e, "Speech synthesis failed");
                self.finish_utterance(utterance, false, ctx);
            }
        }
    }

    /// Abandon the utterance being spoken, if any, and tell the room it stopped.
    fn interrupt_speech(&mut self, ctx: &mut Context<Self>) {
        if let Some(handle) = self.speech_stream.take() {
            ctx.cancel_future(handle);
        }
        let Some(utterance) = self.playback.current() else {
            return;
        };

        debug!(session_id = %self.session_id, utterance, "Speech interrupted");
        self.speech_reassembler.finish();
        self.broadcast(ServerEvent::SpeechStop {
            speaker: self.session_id.clone(),
        });
        self.playback.finish(utterance);
        self.state.record(PipelineEvent::UtteranceFailed);
    }

    fn finish_utterance(&mut self, utterance: u64, spoken: bool, ctx: &mut Context<Self>) {
        if self.speech_reassembler.finish().is_some() {
            debug!(session_id = %self.session_id, utterance, "Dropped unpaired trailing byte");
        }
        self.broadcast(ServerEvent::SpeechStop {
            speaker: self.session_id.clone(),
        });
        self.playback.finish(utterance);
        self.state.record(if spoken {
            PipelineEvent::UtteranceSpoken
        } else {
            PipelineEvent::UtteranceFailed
        });

        self.pump_playback(ctx);
        self.publish();
    }

    // ----- lifecycle -------------------------------------------------------

    fn teardown(&mut self, ctx: &mut Context<Self>) {
        if self.phase == Phase::Closed {
            return;
        }

        self.flush_audio(false, ctx);
        self.phase = Phase::Closed;

        self.link.close();
        self.stop_keepalive(ctx);
        if let Some(handle) = self.idle_flush.take() {
            ctx.cancel_future(handle);
        }
        self.interrupt_speech(ctx);

        self.aggregator.discard();
        self.dispatcher.clear();
        self.playback.clear();
        self.batcher.clear();
        self.relay_reassembler.finish();
        self.cancel.cancel();

        self.leave_room(false, ctx);
        self.state.rooms.disconnect(&self.session_id);
        self.state.sessions.remove(&self.session_id);
        info!(session_id = %self.session_id, "Session closed");
    }

    fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            room: self.room.clone(),
            language: self.language.clone(),
            recognizer: self.link.state_name(),
            recognizer_opens: self.link.opens(),
            recognition_available: self.recognition_available,
            translation_available: self.translation_available,
            speaking: self.playback.is_speaking(),
            buffered_audio_bytes: self.batcher.queued_bytes(),
            audio_bytes_forwarded: self.audio_bytes_forwarded,
            pending_transcript: !self.aggregator.pending_text().is_empty(),
            translation_in_flight: self.dispatcher.in_flight().is_some(),
            queued_segments: self.dispatcher.queued(),
            queued_utterances: self.playback.queued(),
            created_at: self.created_at,
            last_activity: self.last_activity,
        }
    }

    fn publish(&self) {
        if self.phase == Phase::Active {
            self.state.sessions.update(self.snapshot());
        }
    }
}

impl Actor for SessionController {
    type Context = Context<Self>;

    /// The personal room is assigned and provider preflight runs before any
    /// client event is handled.
    fn started(&mut self, _ctx: &mut Self::Context) {
        self.state.record(PipelineEvent::SessionStarted);

        self.state
            .rooms
            .connect(&self.session_id, self.outbox.clone());
        self.outbox.do_send(ServerEvent::RoomAssigned {
            room: self.session_id.clone(),
        });

        if let Err(e) = self.state.providers.recognizer.preflight() {
            warn!(session_id = %self.session_id, error = %e, "Speech recognition unavailable");
            self.recognition_available = false;
            self.outbox.do_send(ServerEvent::error(
                protocol::AUDIO_UNAVAILABLE,
                format!("Audio processing is unavailable: {}", e),
            ));
        }

        let providers = &self.state.providers;
        if let Err(e) = providers
            .translator
            .preflight()
            .and_then(|_| providers.synthesizer.preflight())
        {
            warn!(session_id = %self.session_id, error = %e, "Translation unavailable");
            self.translation_available = false;
            self.outbox.do_send(ServerEvent::error(
                protocol::TRANSLATION_UNAVAILABLE,
                format!("Translated speech is unavailable: {}", e),
            ));
        }

        info!(session_id = %self.session_id, "Session started");
        self.publish();
    }

    fn stopped(&mut self, ctx: &mut Self::Context) {
        self.teardown(ctx);
    }
}

impl Handler<ClientCommand> for SessionController {
    type Result = ();

    fn handle(&mut self, msg: ClientCommand, ctx: &mut Self::Context) {
        if self.phase == Phase::Closed {
            return;
        }
        self.touch();

        match msg.0 {
            ClientEvent::JoinRoom { room } => self.join_room(room, ctx),
            ClientEvent::LeaveRoom { room } => {
                if self.room.as_deref() == Some(room.as_str()) {
                    self.leave_room(true, ctx);
                } else {
                    self.reject(protocol::INVALID_EVENT, format!("not a member of room '{}'", room));
                }
            }
            ClientEvent::SetLanguage { language } => self.set_language(language, ctx),
            ClientEvent::StartAudio { room } => {
                if let Some(room) = room {
                    self.join_room(room, ctx);
                }
                if !self.recognition_available {
                    self.reject(protocol::AUDIO_UNAVAILABLE, "speech recognition is not configured");
                } else if !self.link.is_connected() && !self.link.is_connecting() {
                    self.open_link(ctx);
                }
            }
            ClientEvent::Silence => {
                self.flush_audio(true, ctx);
                self.broadcast(ServerEvent::Silence {
                    user: self.session_id.clone(),
                });
            }
            ClientEvent::StopAudio => {
                self.flush_audio(true, ctx);
                self.relay_reassembler.finish();
                debug!(session_id = %self.session_id, "Audio stopped, recognizer kept open");
            }
            ClientEvent::Online { user } => {
                self.state
                    .rooms
                    .broadcast_all(Some(&self.session_id), ServerEvent::UserActive(user));
            }
            ClientEvent::Offline { user } => {
                self.state
                    .rooms
                    .broadcast_all(Some(&self.session_id), ServerEvent::UserDeactive(user));
            }
            ClientEvent::SendMessage { room, message } => {
                let delivered = self.state.rooms.deliver(
                    &room,
                    ServerEvent::IncomingMessage {
                        room: room.clone(),
                        from: self.session_id.clone(),
                        message,
                    },
                );
                debug!(session_id = %self.session_id, room = %room, delivered, "Message sent");
            }
            ClientEvent::Pong { .. } => {}
        }

        self.publish();
    }
}

impl Handler<AudioFrame> for SessionController {
    type Result = ();

    fn handle(&mut self, msg: AudioFrame, ctx: &mut Self::Context) {
        if self.phase == Phase::Closed || msg.0.is_empty() {
            return;
        }
        self.touch();

        if let Some(room) = &self.room {
            if let Some(payload) = self.relay_reassembler.push(&msg.0) {
                self.state.rooms.broadcast(
                    room,
                    Some(&self.session_id),
                    ServerEvent::audio(&self.session_id, &payload, false),
                );
            }
        }

        if self.recognition_available {
            self.batcher.push(msg.0);
            self.flush_audio(true, ctx);
        }
        self.publish();
    }
}

impl Handler<LinkEvent> for SessionController {
    type Result = ();

    fn handle(&mut self, msg: LinkEvent, ctx: &mut Self::Context) {
        if self.phase == Phase::Closed || !self.link.is_current(msg.generation) {
            return;
        }

        match msg.event {
            RecognizerEvent::Transcript {
                text,
                is_final,
                confidence,
            } => self.on_transcript(&text, is_final, confidence, ctx),
            RecognizerEvent::Error(reason) => {
                warn!(session_id = %self.session_id, generation = msg.generation, reason = %reason, "Recognizer link error");
                self.link.fail(msg.generation);
                self.stop_keepalive(ctx);
            }
            RecognizerEvent::Closed => {
                info!(session_id = %self.session_id, generation = msg.generation, "Recognizer link closed by provider");
                self.link.fail(msg.generation);
                self.stop_keepalive(ctx);
            }
        }
        self.publish();
    }
}

impl StreamHandler<SpeechEvent> for SessionController {
    fn handle(&mut self, msg: SpeechEvent, ctx: &mut Self::Context) {
        if self.phase == Phase::Closed || self.playback.current() != Some(msg.utterance) {
            return;
        }

        match msg.kind {
            SpeechEventKind::Chunk(bytes) => {
                if let Some(payload) = self.speech_reassembler.push(&bytes) {
                    self.broadcast(ServerEvent::audio(&self.session_id, &payload, true));
                }
            }
            SpeechEventKind::Failed(reason) => {
                warn!(session_id = %self.session_id, utterance = msg.utterance, reason = %reason, "Speech stream failed");
                if let Some(handle) = self.speech_stream.take() {
                    ctx.cancel_future(handle);
                }
                self.finish_utterance(msg.utterance, false, ctx);
            }
            SpeechEventKind::Finished => {
                self.speech_stream = None;
                self.finish_utterance(msg.utterance, true, ctx);
            }
        }
    }

    /// The end of an utterance is handled through `SpeechEventKind::Finished`;
    /// the session outlives its speech streams.
    fn finished(&mut self, _ctx: &mut Self::Context) {}
}

impl Handler<Disconnect> for SessionController {
    type Result = ();

    fn handle(&mut self, _msg: Disconnect, ctx: &mut Self::Context) {
        self.teardown(ctx);
        ctx.stop();
    }
}

#[cfg(test)]
impl Handler<GetSnapshot> for SessionController {
    type Result = MessageResult<GetSnapshot>;

    fn handle(&mut self, _msg: GetSnapshot, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.snapshot())
    }
}
