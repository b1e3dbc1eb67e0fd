//! HTTP endpoints
//!
//! Authentication happens upstream; the gateway forwards the authenticated
//! user as the `X-User-Id` header.

use axum::{
    async_trait,
    extract::{ws::WebSocketUpgrade, FromRequestParts, Path, State},
    http::request::Parts,
    response::Response,
    routing::{get, patch},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use tracing::debug;

use hris_common::events::Notification;

use crate::error::{ApiError, ApiResult};
use crate::hub::{HubStats, UserId};
use crate::session::run_session;
use crate::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated user taken from the upstream identity header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserIdentity(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for UserIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| ApiError::Unauthorized("missing user identity".to_string()))?;

        raw.to_str()
            .ok()
            .and_then(|value| value.trim().parse::<UserId>().ok())
            .map(UserIdentity)
            .ok_or_else(|| ApiError::Unauthorized("invalid user identity".to_string()))
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);

    Json(HealthResponse {
        status: "ok".to_string(),
        module: "hris-realtime".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime.num_seconds().max(0) as u64,
    })
}

/// GET /hub/stats
pub async fn hub_stats(State(state): State<AppState>) -> Json<HubStats> {
    Json(state.hub.stats().await)
}

/// GET /ws
///
/// Identity is checked before the upgrade so anonymous requests get a plain 401.
pub async fn ws_upgrade(
    UserIdentity(user_id): UserIdentity,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    debug!(user_id, "WebSocket upgrade requested");

    let max_size = state.session.max_message_size;
    ws.max_message_size(max_size)
        .max_frame_size(max_size)
        .on_upgrade(move |socket| {
            state.sessions.track_future(run_session(
                socket,
                state.hub,
                user_id,
                state.session,
                state.shutdown,
            ))
        })
}

/// GET /notifications
pub async fn list_notifications(
    UserIdentity(user_id): UserIdentity,
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<Notification>>> {
    Ok(Json(state.notifications.list_for_user(user_id).await?))
}

/// PATCH /notifications/:id/read
pub async fn mark_notification_read(
    UserIdentity(user_id): UserIdentity,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    state.notifications.mark_as_read(user_id, id).await?;
    Ok(Json(serde_json::json!({ "id": id, "is_read": true })))
}

pub fn realtime_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/hub/stats", get(hub_stats))
}

pub fn notification_routes() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list_notifications))
        .route("/notifications/:id/read", patch(mark_notification_read))
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
