use crate::config::{configured_key, AppConfig};
use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Configuration as exposed over HTTP. Credentials are reported as
/// configured or not, never echoed; blank keys count as missing, the same
/// as the provider preflight.
fn config_view(config: &AppConfig) -> serde_json::Value {
    json!({
        "server": {
            "host": config.server.host,
            "port": config.server.port
        },
        "recognizer": {
            "url": config.recognizer.url,
            "model": config.recognizer.model,
            "language": config.recognizer.language,
            "endpointing_ms": config.recognizer.endpointing_ms,
            "interim_results": config.recognizer.interim_results,
            "api_key_configured": configured_key(config.recognizer.api_key.as_deref()).is_some()
        },
        "translator": {
            "base_url": config.translator.base_url,
            "model": config.translator.model,
            "timeout_secs": config.translator.timeout_secs,
            "api_key_configured": configured_key(config.translator.api_key.as_deref()).is_some()
        },
        "synthesizer": {
            "url": config.synthesizer.url,
            "model": config.synthesizer.model,
            "encoding": config.synthesizer.encoding,
            "sample_rate": config.synthesizer.sample_rate,
            "container": config.synthesizer.container,
            "chunk_timeout_ms": config.synthesizer.chunk_timeout_ms,
            "api_key_configured": configured_key(config.synthesizer_api_key().as_deref()).is_some()
        },
        "pipeline": {
            "idle_flush_ms": config.pipeline.idle_flush_ms,
            "keepalive_secs": config.pipeline.keepalive_secs,
            "connect_timeout_secs": config.pipeline.connect_timeout_secs,
            "recognizer_chunk_bytes": config.pipeline.recognizer_chunk_bytes,
            "forward_interim": config.pipeline.forward_interim,
            "default_language": config.pipeline.default_language
        },
        "performance": {
            "max_concurrent_sessions": config.performance.max_concurrent_sessions,
            "heartbeat_interval_secs": config.performance.heartbeat_interval_secs,
            "client_timeout_secs": config.performance.client_timeout_secs
        }
    })
}

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config_view(&config)
    })))
}

/// Partial update. Running sessions keep the configuration they started with.
pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": config_view(&current_config)
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_state;
    use actix_web::{test as actix_test, App};

    #[actix_web::test]
    async fn test_get_config_hides_credentials() {
        let mut config = AppConfig::default();
        config.recognizer.api_key = Some("dg-secret".to_string());
        let state = test_state(config);
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/config", web::get().to(get_config)),
        )
        .await;

        let resp = actix_test::call_service(&app, actix_test::TestRequest::get().uri("/config").to_request()).await;
        assert!(resp.status().is_success());
        let body = actix_test::read_body(resp).await;
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(!text.contains("dg-secret"));

        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["config"]["recognizer"]["api_key_configured"], true);
        assert_eq!(json["config"]["translator"]["api_key_configured"], false);
    }

    #[test]
    fn test_blank_keys_are_reported_missing() {
        let mut config = AppConfig::default();
        config.recognizer.api_key = Some("   ".to_string());
        config.translator.api_key = Some("\t".to_string());

        let view = config_view(&config);
        assert_eq!(view["recognizer"]["api_key_configured"], false);
        assert_eq!(view["translator"]["api_key_configured"], false);
        assert_eq!(view["synthesizer"]["api_key_configured"], false);

        config.synthesizer.api_key = Some("speak-key".to_string());
        assert_eq!(config_view(&config)["synthesizer"]["api_key_configured"], true);
    }

    #[actix_web::test]
    async fn test_update_config_rejects_invalid_values() {
        let state = test_state(AppConfig::default());
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/config", web::put().to(update_config)),
        )
        .await;

        let ok = actix_test::TestRequest::put()
            .uri("/config")
            .set_json(json!({"pipeline": {"idle_flush_ms": 1500}}))
            .to_request();
        assert!(actix_test::call_service(&app, ok).await.status().is_success());
        assert_eq!(state.get_config().pipeline.idle_flush_ms, 1500);

        let bad = actix_test::TestRequest::put()
            .uri("/config")
            .set_json(json!({"pipeline": {"keepalive_secs": 0}}))
            .to_request();
        assert_eq!(actix_test::call_service(&app, bad).await.status(), 400);
        assert_eq!(state.get_config().pipeline.keepalive_secs, 5);
    }
}
