//! HTTP delivery surface: JSON command endpoints and the SSE push channel

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;

use crate::controller::PlaybackController;
use crate::error::{AuthError, BridgeError, UpstreamError, ValidationError};
use crate::model::{DeviceInfo, PlaybackState};
use crate::reconciler::StateReconciler;

pub const SSE_KEEP_ALIVE: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub controller: PlaybackController,
    pub reconciler: StateReconciler,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/playback/current", get(current))
        .route("/api/playback/play", post(play))
        .route("/api/playback/pause", post(pause))
        .route("/api/playback/next", post(next))
        .route("/api/playback/previous", post(previous))
        .route("/api/playback/seek", post(seek))
        .route("/api/playback/volume", post(volume))
        .route("/api/playback/shuffle", post(shuffle))
        .route("/api/playback/repeat", post(repeat))
        .route("/api/playback/devices", get(devices))
        .route("/api/playback/check-liked", get(check_liked))
        .route("/api/playback/like", put(like).delete(unlike))
        .route("/api/events", get(events))
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn serve(
    state: AppState,
    port: u16,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "HTTP server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

pub struct ApiError(BridgeError);

impl From<BridgeError> for ApiError {
    fn from(e: BridgeError) -> Self {
        Self(e)
    }
}

pub fn status_for(error: &BridgeError) -> StatusCode {
    match error {
        BridgeError::Validation(_) => StatusCode::BAD_REQUEST,
        BridgeError::Auth(AuthError::Unauthorized | AuthError::Transient(_)) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        BridgeError::Upstream(e) => match e {
            UpstreamError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            UpstreamError::NotFound(_) => StatusCode::NOT_FOUND,
            UpstreamError::Forbidden(_) => StatusCode::FORBIDDEN,
            UpstreamError::NoDeviceAvailable | UpstreamError::Unavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            UpstreamError::CredentialExpired => StatusCode::UNAUTHORIZED,
            UpstreamError::Unexpected { .. } => StatusCode::BAD_GATEWAY,
        },
        BridgeError::Bus(_) => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::warn!(error = %self.0, code = self.0.code(), "Request failed");
        } else {
            tracing::debug!(error = %self.0, code = self.0.code(), "Request rejected");
        }
        let body = json!({ "error": self.0.to_string(), "code": self.0.code() });
        let mut response = (status, Json(body)).into_response();
        if let BridgeError::Upstream(UpstreamError::RateLimited { retry_after_seconds }) = self.0 {
            response
                .headers_mut()
                .insert(axum::http::header::RETRY_AFTER, retry_after_seconds.into());
        }
        response
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        Self(e.into())
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Malformed bodies are validation failures like any other bad argument
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        ValidationError::InvalidValue {
            field: "body",
            value: rejection.body_text(),
        }
        .into()
    })
}

fn required<T>(value: Option<T>, field: &'static str) -> ApiResult<T> {
    value.ok_or_else(|| ValidationError::MissingField(field).into())
}

fn ok() -> Json<serde_json::Value> {
    Json(json!({ "success": true }))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "subscribers": state.reconciler.subscriber_count(),
        "hasState": state.reconciler.get_last().is_some(),
    }))
}

async fn current(State(state): State<AppState>) -> ApiResult<Json<PlaybackState>> {
    Ok(Json(state.controller.current_state().await?))
}

async fn play(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    state.controller.play().await?;
    Ok(ok())
}

async fn pause(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    state.controller.pause().await?;
    Ok(ok())
}

async fn next(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    state.controller.next().await?;
    Ok(ok())
}

async fn previous(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    state.controller.previous().await?;
    Ok(ok())
}

#[derive(Deserialize)]
struct SeekBody {
    #[serde(alias = "positionMs")]
    position_ms: Option<i64>,
}

async fn seek(
    State(state): State<AppState>,
    payload: Result<Json<SeekBody>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let position_ms = required(json_body(payload)?.position_ms, "position_ms")?;
    state.controller.seek(position_ms).await?;
    Ok(ok())
}

#[derive(Deserialize)]
struct VolumeBody {
    volume: Option<i64>,
}

async fn volume(
    State(state): State<AppState>,
    payload: Result<Json<VolumeBody>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let volume = required(json_body(payload)?.volume, "volume")?;
    state.controller.set_volume(volume).await?;
    Ok(ok())
}

#[derive(Deserialize)]
struct ShuffleBody {
    state: Option<bool>,
}

async fn shuffle(
    State(state): State<AppState>,
    payload: Result<Json<ShuffleBody>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let shuffle = required(json_body(payload)?.state, "state")?;
    state.controller.set_shuffle(shuffle).await?;
    Ok(ok())
}

#[derive(Deserialize)]
struct RepeatBody {
    state: Option<String>,
}

async fn repeat(
    State(state): State<AppState>,
    payload: Result<Json<RepeatBody>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let repeat = required(json_body(payload)?.state, "state")?;
    state.controller.set_repeat(&repeat).await?;
    Ok(ok())
}

async fn devices(State(state): State<AppState>) -> ApiResult<Json<Vec<DeviceInfo>>> {
    Ok(Json(state.controller.devices().await?))
}

#[derive(Deserialize)]
struct IdsQuery {
    #[serde(default)]
    ids: String,
}

async fn check_liked(
    State(state): State<AppState>,
    Query(query): Query<IdsQuery>,
) -> ApiResult<Json<Vec<bool>>> {
    let ids: Vec<String> = query.ids.split(',').map(str::to_string).collect();
    Ok(Json(state.controller.check_liked(&ids).await?))
}

#[derive(Deserialize)]
struct IdsBody {
    #[serde(default)]
    ids: Vec<String>,
}

async fn like(
    State(state): State<AppState>,
    payload: Result<Json<IdsBody>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    state.controller.like(&json_body(payload)?.ids).await?;
    Ok(ok())
}

async fn unlike(
    State(state): State<AppState>,
    payload: Result<Json<IdsBody>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    state.controller.unlike(&json_body(payload)?.ids).await?;
    Ok(ok())
}

async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.reconciler.subscribe();
    tracing::debug!(subscriber = subscription.id, "SSE client connected");

    let stream = subscription.into_stream().filter_map(|event| async move {
        match Event::default().event(event.name()).json_data(&event) {
            Ok(sse) => Some(Ok(sse)),
            Err(e) => {
                tracing::warn!(error = %e, event = event.name(), "Failed to serialize push event");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE))
}
