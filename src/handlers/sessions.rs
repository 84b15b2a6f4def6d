use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn list_sessions(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let sessions = state.sessions.snapshots();
    let limit = state.get_config().performance.max_concurrent_sessions;

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "count": sessions.len(),
        "max_concurrent_sessions": limit,
        "sessions": sessions
    })))
}

pub async fn get_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();
    let snapshot = state
        .sessions
        .get(&session_id)
        .ok_or_else(|| AppError::NotFound(format!("session '{}'", session_id)))?;

    Ok(HttpResponse::Ok().json(snapshot))
}
