//! hris-realtime library interface
//!
//! Real-time delivery core of the HRIS backend: WebSocket sessions, the
//! connection hub and its cross-process broker, the notification producer
//! and the attendance geocoding pipeline.

pub mod api;
pub mod broker;
pub mod error;
pub mod geocode;
pub mod hub;
pub mod notification;
pub mod session;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use hris_common::config::SessionConfig;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::geocode::GeocodeQueue;
use crate::hub::Hub;
use crate::notification::NotificationService;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub notifications: NotificationService,
    /// Attendance clock-in/out handlers enqueue one job per event through this
    pub geocode: GeocodeQueue,
    pub session: SessionConfig,
    /// Server-wide shutdown; sessions derive child tokens from it
    pub shutdown: CancellationToken,
    /// Upgraded WebSocket sessions, awaited at shutdown so queued writes flush
    pub sessions: TaskTracker,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        hub: Hub,
        notifications: NotificationService,
        geocode: GeocodeQueue,
        session: SessionConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            hub,
            notifications,
            geocode,
            session,
            shutdown,
            sessions: TaskTracker::new(),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::realtime_routes())
        .merge(api::notification_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
