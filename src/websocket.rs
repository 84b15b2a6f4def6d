//! # WebSocket Client Transport
//!
//! Each client connects to `/ws` and gets one [`ClientConnection`] actor plus
//! one [`SessionController`] actor. The connection only does framing:
//!
//! - **Text frames**: JSON `{"event": ..., "data": ...}` parsed into
//!   [`ClientEvent`] and forwarded to the controller. Malformed frames get an
//!   `error` event with code `invalid_event` and change nothing.
//! - **Binary frames**: raw PCM16 mono 16 kHz audio, forwarded as-is.
//! - **Outbound**: every [`ServerEvent`] addressed to this client (by its
//!   own controller or by a peer's broadcast) is serialized to a text frame.
//!
//! ## Heartbeat:
//! A JSON `ping` goes out every `heartbeat_interval_secs`; any inbound
//! frame counts as liveness. A client silent for `client_timeout_secs` is
//! dropped, which tears the session down like any other disconnect.

use crate::error::AppError;
use crate::protocol::{self, ClientEvent, ServerEvent};
use crate::session::{AudioFrame, ClientCommand, Disconnect, SessionController};
use crate::state::AppState;
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub struct ClientConnection {
    session_id: String,
    state: AppState,
    controller: Option<Addr<SessionController>>,
    heartbeat_interval: Duration,
    client_timeout: Duration,
    last_heartbeat: Instant,
}

impl ClientConnection {
    pub fn new(session_id: String, state: AppState) -> Self {
        let performance = state.get_config().performance;
        Self {
            session_id,
            state,
            controller: None,
            heartbeat_interval: Duration::from_secs(performance.heartbeat_interval_secs),
            client_timeout: Duration::from_secs(performance.client_timeout_secs),
            last_heartbeat: Instant::now(),
        }
    }

    fn send_event(&self, event: &ServerEvent, ctx: &mut ws::WebsocketContext<Self>) {
        match serde_json::to_string(event) {
            Ok(json) => ctx.text(json),
            Err(e) => error!(session_id = %self.session_id, event = event.name(), error = %e, "Failed to serialize event"),
        }
    }

    fn handle_text(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        match ClientEvent::parse(text) {
            Ok(ClientEvent::Pong { .. }) => {}
            Ok(event) => {
                debug!(session_id = %self.session_id, ?event, "Client event");
                if let Some(controller) = &self.controller {
                    controller.do_send(ClientCommand(event));
                }
            }
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "Invalid client event");
                self.send_event(
                    &ServerEvent::error(protocol::INVALID_EVENT, e.to_string()),
                    ctx,
                );
            }
        }
    }
}

impl Actor for ClientConnection {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(session_id = %self.session_id, "WebSocket connection started");

        let controller =
            SessionController::new(self.session_id.clone(), self.state.clone(), ctx.address().recipient())
                .start();
        self.controller = Some(controller);

        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.client_timeout {
                warn!(session_id = %act.session_id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }
            let ping = ServerEvent::Ping {
                timestamp: chrono::Utc::now().timestamp_millis() as u64,
            };
            act.send_event(&ping, ctx);
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(session_id = %self.session_id, "WebSocket connection stopped");
        if let Some(controller) = self.controller.take() {
            controller.do_send(Disconnect);
        } else {
            self.state.sessions.remove(&self.session_id);
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ClientConnection {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        let msg = match msg {
            Ok(msg) => msg,
            Err(err) => {
                error!(session_id = %self.session_id, error = %err, "WebSocket protocol error");
                ctx.stop();
                return;
            }
        };
        self.last_heartbeat = Instant::now();

        match msg {
            ws::Message::Text(text) => self.handle_text(&text, ctx),
            ws::Message::Binary(data) => {
                if let Some(controller) = &self.controller {
                    controller.do_send(AudioFrame(data.to_vec()));
                }
            }
            ws::Message::Ping(data) => ctx.pong(&data),
            ws::Message::Pong(_) => {}
            ws::Message::Close(reason) => {
                info!(session_id = %self.session_id, ?reason, "WebSocket closed by client");
                ctx.close(reason);
                ctx.stop();
            }
            ws::Message::Continuation(_) => {
                warn!(session_id = %self.session_id, "Unexpected continuation frame");
            }
            ws::Message::Nop => {}
        }
    }
}

impl Handler<ServerEvent> for ClientConnection {
    type Result = ();

    fn handle(&mut self, msg: ServerEvent, ctx: &mut Self::Context) {
        self.send_event(&msg, ctx);
    }
}

/// `GET /ws`: upgrade to a session, or 503 when the server is full.
pub async fn session_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let session_id = Uuid::new_v4().to_string();
    let limit = state.get_config().performance.max_concurrent_sessions;

    state.sessions.register(&session_id, limit).map_err(|e| {
        warn!(error = %e, "Rejecting WebSocket connection");
        AppError::ServiceUnavailable(e.to_string())
    })?;

    info!(
        session_id = %session_id,
        peer = ?req.connection_info().peer_addr(),
        "New WebSocket session"
    );

    let connection = ClientConnection::new(session_id.clone(), state.get_ref().clone());
    ws::start(connection, &req, stream).map_err(|e| {
        state.sessions.remove(&session_id);
        e
    })
}
