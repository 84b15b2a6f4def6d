use crate::protocol::{self, ServerEvent};
use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

pub async fn list_rooms(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let rooms = state.rooms.snapshot();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "count": rooms.len(),
        "rooms": rooms
    })))
}

#[derive(Debug, Deserialize)]
pub struct BroadcastAudioRequest {
    #[serde(default)]
    pub room: Option<String>,
    /// Base64-encoded PCM16 mono 16 kHz audio
    #[serde(default)]
    pub audio: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
}

/// Relay an audio clip to a room over HTTP, as if `sender` had spoken it.
pub async fn broadcast_audio(
    state: web::Data<AppState>,
    body: web::Json<BroadcastAudioRequest>,
) -> Result<HttpResponse, AppError> {
    let request = body.into_inner();

    let room = request
        .room
        .map(|room| room.trim().to_string())
        .filter(|room| !room.is_empty());
    let audio = request.audio.filter(|audio| !audio.is_empty());
    let (Some(room), Some(audio)) = (room, audio) else {
        return Err(AppError::BadRequest("room and audio are required".to_string()));
    };

    let mut bytes = protocol::decode_audio(&audio)
        .map_err(|e| AppError::BadRequest(format!("audio is not valid base64: {}", e)))?;
    // Whole 16-bit samples only
    bytes.truncate(bytes.len() - bytes.len() % 2);
    if bytes.is_empty() {
        return Err(AppError::BadRequest("audio holds no complete sample".to_string()));
    }
    let sender = request.sender.unwrap_or_else(|| "unknown".to_string());

    let delivered = state.rooms.broadcast(
        &room,
        Some(&sender),
        ServerEvent::audio(&sender, &bytes, false),
    );
    info!(room = %room, sender = %sender, bytes = bytes.len(), delivered, "Broadcast audio over HTTP");

    Ok(HttpResponse::Ok().json(json!({
        "message": "Audio broadcast",
        "room": room,
        "delivered": delivered
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::session::testing::{collector, names, settle};
    use crate::state::test_state;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_broadcast_audio_skips_sender() {
        let state = test_state(AppConfig::default());
        let (alice, alice_events) = collector();
        let (bob, bob_events) = collector();
        state.rooms.join("r1", "alice", "English", alice);
        state.rooms.join("r1", "bob", "Hindi", bob);

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/rooms", web::get().to(list_rooms))
                .route("/rooms/audio", web::post().to(broadcast_audio)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/rooms/audio")
            .set_json(json!({"room": "r1", "audio": "AAECAw==", "sender": "alice"}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["delivered"], 1);

        settle().await;
        assert!(alice_events.lock().is_empty());
        assert_eq!(names(&bob_events), vec!["audio:stream"]);

        let req = test::TestRequest::get().uri("/rooms").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["rooms"][0]["members"][1]["language"], "Hindi");
    }

    #[actix_web::test]
    async fn test_broadcast_audio_drops_unpaired_byte() {
        let state = test_state(AppConfig::default());
        let (bob, bob_events) = collector();
        state.rooms.join("r1", "bob", "Hindi", bob);

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/rooms/audio", web::post().to(broadcast_audio)),
        )
        .await;

        // Three bytes: one whole sample and a stray byte
        let req = test::TestRequest::post()
            .uri("/rooms/audio")
            .set_json(json!({"room": "r1", "audio": "AAEC"}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["delivered"], 1);

        settle().await;
        let events = bob_events.lock();
        let ServerEvent::AudioStream { audio, .. } = &events[0] else {
            panic!("expected audio, got {:?}", events[0]);
        };
        assert_eq!(protocol::decode_audio(audio).unwrap(), vec![0, 1]);
    }

    #[actix_web::test]
    async fn test_broadcast_audio_requires_room_and_audio() {
        let state = test_state(AppConfig::default());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/rooms/audio", web::post().to(broadcast_audio)),
        )
        .await;

        for payload in [
            json!({"audio": "AAAA"}),
            json!({"room": "r1"}),
            json!({"room": "  ", "audio": "AAAA"}),
            json!({"room": "r1", "audio": "not base64!"}),
            json!({"room": "r1", "audio": "AA=="}),
        ] {
            let req = test::TestRequest::post()
                .uri("/rooms/audio")
                .set_json(&payload)
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), 400, "{}", payload);
        }
    }
}
