//! # Application State Management
//!
//! State shared by every HTTP handler and every session actor.
//!
//! ## What lives here:
//! - **config**: runtime-updatable configuration (sessions read it once, at start)
//! - **metrics**: HTTP request counters and pipeline counters
//! - **rooms**: the room registry, the only cross-session structure
//! - **sessions**: live session snapshots and the capacity limit
//! - **providers**: recognizer, translator and synthesizer shared by all sessions
//!
//! ## Locking:
//! Everything mutable is behind `parking_lot::RwLock`. Actix runs one worker
//! thread per core, so sessions on different workers touch these
//! concurrently. Guards are held only for the duration of a copy or an update.

use crate::config::AppConfig;
use crate::providers::Providers;
use crate::session::manager::SessionManager;
use crate::session::room::RoomRegistry;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Cheap to clone: every field is an `Arc` or `Copy`.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub rooms: Arc<RoomRegistry>,
    pub sessions: Arc<SessionManager>,
    pub providers: Providers,
    pub start_time: Instant,
}

/// Counters collected since server start.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed
    pub request_count: u64,

    /// Requests that ended in a 4xx/5xx status
    pub error_count: u64,

    /// Key: endpoint name (e.g., "GET /api/v1/rooms")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,

    pub pipeline: PipelineMetrics,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

/// Aggregate counters over every session's pipeline.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct PipelineMetrics {
    pub sessions_started: u64,
    pub recognizer_connections: u64,
    pub audio_bytes_forwarded: u64,
    pub segments_translated: u64,
    pub segments_dropped: u64,
    pub utterances_spoken: u64,
    pub utterances_failed: u64,
}

/// One pipeline occurrence worth counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    SessionStarted,
    RecognizerOpened,
    AudioForwarded(u64),
    SegmentTranslated,
    SegmentDropped,
    UtteranceSpoken,
    UtteranceFailed,
}

impl AppState {
    pub fn new(config: AppConfig, providers: Providers) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            rooms: Arc::new(RoomRegistry::new()),
            sessions: Arc::new(SessionManager::new()),
            providers,
            start_time: Instant::now(),
        }
    }

    /// Copy of the current configuration; the lock is released on return.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        new_config.validate().map_err(|e| e.to_string())?;
        *self.config.write() = new_config;
        Ok(())
    }

    pub fn increment_request_count(&self) {
        self.metrics.write().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics.write().error_count += 1;
    }

    /// Record one request against its endpoint (called by the metrics middleware).
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    pub fn record(&self, event: PipelineEvent) {
        let mut metrics = self.metrics.write();
        let pipeline = &mut metrics.pipeline;
        match event {
            PipelineEvent::SessionStarted => pipeline.sessions_started += 1,
            PipelineEvent::RecognizerOpened => pipeline.recognizer_connections += 1,
            PipelineEvent::AudioForwarded(bytes) => pipeline.audio_bytes_forwarded += bytes,
            PipelineEvent::SegmentTranslated => pipeline.segments_translated += 1,
            PipelineEvent::SegmentDropped => pipeline.segments_dropped += 1,
            PipelineEvent::UtteranceSpoken => pipeline.utterances_spoken += 1,
            PipelineEvent::UtteranceFailed => pipeline.utterances_failed += 1,
        }
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().clone()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.count()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of requests that failed, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
pub(crate) fn test_state(config: AppConfig) -> AppState {
    use crate::providers::fake::{providers, FakeRecognizer, FakeSynthesizer, FakeTranslator};
    let (recognizer, _links) = FakeRecognizer::new();
    let (providers, _, _) = providers(
        recognizer,
        FakeTranslator::default(),
        FakeSynthesizer::chunks(vec![vec![0, 0]]),
    );
    AppState::new(config, providers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_metrics() {
        let state = test_state(AppConfig::default());
        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);

        let metrics = state.get_metrics_snapshot();
        let health = &metrics.endpoint_metrics["GET /health"];
        assert_eq!(health.request_count, 2);
        assert_eq!(health.average_duration_ms(), 20.0);
        assert_eq!(health.error_rate(), 0.5);
    }

    #[test]
    fn test_pipeline_counters() {
        let state = test_state(AppConfig::default());
        state.record(PipelineEvent::AudioForwarded(4096));
        state.record(PipelineEvent::AudioForwarded(100));
        state.record(PipelineEvent::SegmentTranslated);
        state.record(PipelineEvent::SegmentDropped);

        let pipeline = state.get_metrics_snapshot().pipeline;
        assert_eq!(pipeline.audio_bytes_forwarded, 4196);
        assert_eq!(pipeline.segments_translated, 1);
        assert_eq!(pipeline.segments_dropped, 1);
        assert_eq!(pipeline.utterances_spoken, 0);
    }

    #[test]
    fn test_update_config_validates() {
        let state = test_state(AppConfig::default());
        let mut bad = state.get_config();
        bad.pipeline.keepalive_secs = 0;
        assert!(state.update_config(bad).is_err());
        assert_eq!(state.get_config().pipeline.keepalive_secs, 5);
    }
}
