//! # Session Event Protocol
//!
//! The vocabulary spoken over `/ws`. Every text frame is a JSON envelope
//! `{"event": "<name>", "data": <payload>}`; binary frames are raw audio
//! (16-bit little-endian PCM, 16 kHz, mono).
//!
//! ## Client → Server:
//! - `room:join`: `data` is either the room name or `{"room": "..."}`
//! - `room:leave`: same payload shapes as `room:join`
//! - `language:set`: `{"language": "Hindi"}`
//! - `audio:start`: optional `{"room": "..."}`; opens recognition eagerly
//! - `audio:silence`, `audio:stop`: payload ignored
//! - `user:online`, `user:disconnect`: the user's name or `{"email": "..."}`;
//!   announced to every other connected client
//! - `message:send`: `{"room": "...", "message": "..."}`, or a bare string
//!   used as both room and message
//! - `pong`: heartbeat reply
//!
//! ## Server → Client:
//! See [`ServerEvent`]. Audio payloads are base64 encoded.

use actix::Message;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const AUDIO_UNAVAILABLE: &str = "audio_unavailable";
pub const TRANSLATION_UNAVAILABLE: &str = "translation_unavailable";
pub const INVALID_EVENT: &str = "invalid_event";

/// Why an inbound frame was rejected. The session state is left untouched.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed event envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown event '{0}'")]
    UnknownEvent(String),

    #[error("invalid payload for '{event}': {reason}")]
    InvalidPayload { event: String, reason: String },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RoomRef {
    Name(String),
    Object { room: String },
}

#[derive(Debug, Default, Deserialize)]
struct OptionalRoom {
    #[serde(default)]
    room: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UserRef {
    Name(String),
    Object {
        #[serde(alias = "email")]
        user: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MessageRef {
    Text(String),
    Object { room: String, message: String },
}

#[derive(Debug, Deserialize)]
struct LanguagePayload {
    language: String,
}

#[derive(Debug, Deserialize)]
struct PongPayload {
    #[serde(default)]
    timestamp: u64,
}

/// Events a client may send as JSON text frames.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    JoinRoom { room: String },
    LeaveRoom { room: String },
    SetLanguage { language: String },
    StartAudio { room: Option<String> },
    Silence,
    StopAudio,
    Online { user: String },
    Offline { user: String },
    SendMessage { room: String, message: String },
    Pong { timestamp: u64 },
}

impl ClientEvent {
    /// Parse one text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let event = envelope.event.as_str();

        match event {
            "room:join" => Ok(ClientEvent::JoinRoom {
                room: room_from(event, envelope.data)?,
            }),
            "room:leave" => Ok(ClientEvent::LeaveRoom {
                room: room_from(event, envelope.data)?,
            }),
            "language:set" => {
                let payload: LanguagePayload = payload_from(event, envelope.data)?;
                let language = payload.language.trim().to_string();
                if language.is_empty() {
                    return Err(invalid(event, "language must not be empty"));
                }
                Ok(ClientEvent::SetLanguage { language })
            }
            "audio:start" => {
                let payload: OptionalRoom = if envelope.data.is_null() {
                    OptionalRoom::default()
                } else {
                    payload_from(event, envelope.data)?
                };
                let room = payload
                    .room
                    .map(|room| room.trim().to_string())
                    .filter(|room| !room.is_empty());
                Ok(ClientEvent::StartAudio { room })
            }
            "audio:silence" => Ok(ClientEvent::Silence),
            "audio:stop" => Ok(ClientEvent::StopAudio),
            "user:online" => Ok(ClientEvent::Online {
                user: user_from(event, envelope.data)?,
            }),
            "user:disconnect" => Ok(ClientEvent::Offline {
                user: user_from(event, envelope.data)?,
            }),
            "message:send" => {
                let (room, message) = match payload_from::<MessageRef>(event, envelope.data) {
                    Ok(MessageRef::Text(text)) => (text.clone(), text),
                    Ok(MessageRef::Object { room, message }) => (room, message),
                    Err(_) => return Err(invalid(event, "room and message are required")),
                };
                let room = room.trim().to_string();
                if room.is_empty() {
                    return Err(invalid(event, "room is required"));
                }
                Ok(ClientEvent::SendMessage { room, message })
            }
            "pong" => {
                let payload: PongPayload = if envelope.data.is_null() {
                    PongPayload { timestamp: 0 }
                } else {
                    payload_from(event, envelope.data)?
                };
                Ok(ClientEvent::Pong {
                    timestamp: payload.timestamp,
                })
            }
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }
}

fn invalid(event: &str, reason: impl Into<String>) -> ProtocolError {
    ProtocolError::InvalidPayload {
        event: event.to_string(),
        reason: reason.into(),
    }
}

fn payload_from<T: serde::de::DeserializeOwned>(
    event: &str,
    data: serde_json::Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|e| invalid(event, e.to_string()))
}

fn room_from(event: &str, data: serde_json::Value) -> Result<String, ProtocolError> {
    let room = match payload_from::<RoomRef>(event, data) {
        Ok(RoomRef::Name(room)) | Ok(RoomRef::Object { room }) => room,
        Err(_) => return Err(invalid(event, "room is required")),
    };
    let room = room.trim();
    if room.is_empty() {
        return Err(invalid(event, "room is required"));
    }
    Ok(room.to_string())
}

fn user_from(event: &str, data: serde_json::Value) -> Result<String, ProtocolError> {
    let user = match payload_from::<UserRef>(event, data) {
        Ok(UserRef::Name(user)) | Ok(UserRef::Object { user }) => user,
        Err(_) => return Err(invalid(event, "user is required")),
    };
    let user = user.trim();
    if user.is_empty() {
        return Err(invalid(event, "user is required"));
    }
    Ok(user.to_string())
}

/// Events sent to clients. Most are fanned out to the peers of a room; a few
/// (`room:assigned`, `room:joined`, `room:left`, `error`, `ping`) only go to the
/// session's own client.
#[derive(Debug, Clone, PartialEq, Serialize, Message)]
#[rtype(result = "()")]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// The session's personal room, joined on connect
    #[serde(rename = "room:assigned")]
    RoomAssigned { room: String },

    #[serde(rename = "room:joined")]
    RoomJoined { room: String },

    #[serde(rename = "room:left")]
    RoomLeft { room: String },

    #[serde(rename = "user:joined")]
    UserJoined { user: String },

    #[serde(rename = "user:left")]
    UserLeft { user: String },

    #[serde(rename = "user:active")]
    UserActive(String),

    #[serde(rename = "user:deactive")]
    UserDeactive(String),

    #[serde(rename = "incoming:message")]
    IncomingMessage {
        room: String,
        from: String,
        message: String,
    },

    /// Recognized speech of a peer, interim or final
    #[serde(rename = "transcript:received")]
    TranscriptReceived {
        speaker: String,
        room: String,
        text: String,
        is_final: bool,
        confidence: f64,
        timestamp: i64,
    },

    /// A flushed segment after translation into `language`
    #[serde(rename = "translation:received")]
    TranslationReceived {
        speaker: String,
        text: String,
        language: String,
        timestamp: i64,
    },

    /// Audio bytes, either relayed raw from a speaker or synthesized speech
    #[serde(rename = "audio:stream")]
    AudioStream {
        speaker: String,
        audio: String,
        synthesized: bool,
    },

    #[serde(rename = "audio:stream:start")]
    SpeechStart { speaker: String, language: String },

    #[serde(rename = "audio:stream:stop")]
    SpeechStop { speaker: String },

    #[serde(rename = "audio:silence")]
    Silence { user: String },

    #[serde(rename = "error")]
    Error { code: String, message: String },

    #[serde(rename = "ping")]
    Ping { timestamp: u64 },
}

impl ServerEvent {
    pub fn audio(speaker: &str, bytes: &[u8], synthesized: bool) -> Self {
        ServerEvent::AudioStream {
            speaker: speaker.to_string(),
            audio: BASE64.encode(bytes),
            synthesized,
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// Wire name of the event, handy for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::RoomAssigned { .. } => "room:assigned",
            ServerEvent::RoomJoined { .. } => "room:joined",
            ServerEvent::RoomLeft { .. } => "room:left",
            ServerEvent::UserJoined { .. } => "user:joined",
            ServerEvent::UserLeft { .. } => "user:left",
            ServerEvent::UserActive(_) => "user:active",
            ServerEvent::UserDeactive(_) => "user:deactive",
            ServerEvent::IncomingMessage { .. } => "incoming:message",
            ServerEvent::TranscriptReceived { .. } => "transcript:received",
            ServerEvent::TranslationReceived { .. } => "translation:received",
            ServerEvent::AudioStream { .. } => "audio:stream",
            ServerEvent::SpeechStart { .. } => "audio:stream:start",
            ServerEvent::SpeechStop { .. } => "audio:stream:stop",
            ServerEvent::Silence { .. } => "audio:silence",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Ping { .. } => "ping",
        }
    }
}

/// Decode a base64 audio payload (HTTP broadcast endpoint, tests).
pub fn decode_audio(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64.decode(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_accepts_string_and_object() {
        let plain = ClientEvent::parse(r#"{"event":"room:join","data":"lobby"}"#).unwrap();
        let object = ClientEvent::parse(r#"{"event":"room:join","data":{"room":"lobby"}}"#).unwrap();
        assert_eq!(plain, ClientEvent::JoinRoom { room: "lobby".to_string() });
        assert_eq!(plain, object);
    }

    #[test]
    fn test_join_without_room_is_rejected() {
        for text in [
            r#"{"event":"room:join"}"#,
            r#"{"event":"room:join","data":{}}"#,
            r#"{"event":"room:join","data":"  "}"#,
        ] {
            let err = ClientEvent::parse(text).unwrap_err();
            assert!(matches!(err, ProtocolError::InvalidPayload { .. }), "{}", text);
        }
    }

    #[test]
    fn test_unit_events_ignore_payload() {
        assert_eq!(
            ClientEvent::parse(r#"{"event":"audio:stop","data":{"room":"lobby"}}"#).unwrap(),
            ClientEvent::StopAudio
        );
        assert_eq!(
            ClientEvent::parse(r#"{"event":"audio:silence"}"#).unwrap(),
            ClientEvent::Silence
        );
    }

    #[test]
    fn test_audio_start_room_is_optional() {
        assert_eq!(
            ClientEvent::parse(r#"{"event":"audio:start"}"#).unwrap(),
            ClientEvent::StartAudio { room: None }
        );
        assert_eq!(
            ClientEvent::parse(r#"{"event":"audio:start","data":{"room":"r1"}}"#).unwrap(),
            ClientEvent::StartAudio { room: Some("r1".to_string()) }
        );
    }

    #[test]
    fn test_unknown_and_malformed() {
        assert!(matches!(
            ClientEvent::parse(r#"{"event":"user:typing","data":"a@b.c"}"#),
            Err(ProtocolError::UnknownEvent(name)) if name == "user:typing"
        ));
        assert!(matches!(
            ClientEvent::parse("not json"),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_presence_and_message_payloads() {
        assert_eq!(
            ClientEvent::parse(r#"{"event":"user:online","data":"a@b.c"}"#).unwrap(),
            ClientEvent::Online { user: "a@b.c".to_string() }
        );
        assert_eq!(
            ClientEvent::parse(r#"{"event":"user:disconnect","data":{"email":"a@b.c"}}"#).unwrap(),
            ClientEvent::Offline { user: "a@b.c".to_string() }
        );
        assert_eq!(
            ClientEvent::parse(r#"{"event":"message:send","data":{"room":"r1","message":"hi"}}"#).unwrap(),
            ClientEvent::SendMessage { room: "r1".to_string(), message: "hi".to_string() }
        );
        assert_eq!(
            ClientEvent::parse(r#"{"event":"message:send","data":"lobby"}"#).unwrap(),
            ClientEvent::SendMessage { room: "lobby".to_string(), message: "lobby".to_string() }
        );
        assert!(ClientEvent::parse(r#"{"event":"user:online"}"#).is_err());
        assert!(ClientEvent::parse(r#"{"event":"message:send","data":{"message":"hi"}}"#).is_err());

        let json = serde_json::to_value(ServerEvent::UserActive("a@b.c".to_string())).unwrap();
        assert_eq!(json["event"], "user:active");
        assert_eq!(json["data"], "a@b.c");
    }

    #[test]
    fn test_server_event_wire_format() {
        let event = ServerEvent::audio("alice", &[1, 2, 3, 4], true);
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "audio:stream");
        assert_eq!(json["data"]["speaker"], "alice");
        assert_eq!(json["data"]["synthesized"], true);
        let audio = json["data"]["audio"].as_str().unwrap();
        assert_eq!(decode_audio(audio).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(event.name(), "audio:stream");
    }

    #[test]
    fn test_error_event() {
        let json = serde_json::to_string(&ServerEvent::error(INVALID_EVENT, "room is required")).unwrap();
        assert!(json.contains("\"event\":\"error\""));
        assert!(json.contains("invalid_event"));
        assert!(json.contains("room is required"));
    }
}
