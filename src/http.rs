use crate::checks::uptime::TemporaryUptime;
use crate::metrics::Metrics;
use crate::state::{PluginInfo, State as DaemonState};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub state: Arc<RwLock<DaemonState>>,
    pub temporary_uptime: TemporaryUptime,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiState {
    pub started_at_unix: i64,
    pub last_cycle_unix: i64,
    pub cycle_count: u64,
    pub standby_suppressed: bool,
    pub suppress_reason: String,
    pub suppress_source: Option<String>,
    pub next_wake_unix: Option<i64>,
    pub temporary_uptime_until_unix: Option<i64>,
    pub active_plugins: Vec<PluginInfo>,
}

impl From<&DaemonState> for ApiState {
    fn from(value: &DaemonState) -> Self {
        Self {
            started_at_unix: value.started_at_unix,
            last_cycle_unix: value.last_cycle_unix,
            cycle_count: value.cycle_count,
            standby_suppressed: value.standby_suppressed,
            suppress_reason: value.suppress_reason.clone(),
            suppress_source: value.suppress_source.clone(),
            next_wake_unix: value.next_wake_unix,
            temporary_uptime_until_unix: value.temporary_uptime_until_unix,
            active_plugins: value.active_plugins.clone(),
        }
    }
}

pub fn build_router(
    metrics: Arc<Metrics>,
    state: Arc<RwLock<DaemonState>>,
    temporary_uptime: TemporaryUptime,
) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/state", get(state_handler))
        .route(
            "/api/uptime",
            post(set_uptime_handler).delete(clear_uptime_handler),
        )
        .with_state(HttpAppState {
            metrics,
            state,
            temporary_uptime,
        })
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}

async fn state_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    let guard = state.state.read().await;
    Json(ApiState::from(&*guard))
}

#[derive(Debug, serde::Deserialize)]
pub struct UptimeRequest {
    pub minutes: i64,
}

#[derive(Debug, serde::Serialize)]
pub struct UptimeResponse {
    pub active_until_unix: i64,
}

/// Admin-initiated one-shot override: keep the machine awake for the
/// requested number of minutes starting now.
async fn set_uptime_handler(
    State(state): State<HttpAppState>,
    Json(request): Json<UptimeRequest>,
) -> Response {
    if request.minutes < 1 {
        return (StatusCode::BAD_REQUEST, "minutes must be >= 1").into_response();
    }

    let end = Utc::now() + ChronoDuration::minutes(request.minutes);
    state.temporary_uptime.keep_awake_until(end);
    Json(UptimeResponse {
        active_until_unix: end.timestamp(),
    })
    .into_response()
}

async fn clear_uptime_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    state.temporary_uptime.clear();
    StatusCode::NO_CONTENT
}
