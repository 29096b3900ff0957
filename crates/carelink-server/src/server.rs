//! Axum surface: the WebSocket endpoint plus the message-send HTTP routes.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use carelink_core::ids::{ReadingId, UserId};
use carelink_core::models::{PhysiologicalReading, ReadingKind, Role};
use carelink_settings::ServerSettings;

use crate::chat::{ChatError, ChatService};
use crate::connection::{run_session, Connection, FrameHandler, PumpConfig};
use crate::hub::Hub;
use crate::inbound::Relay;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub relay: Arc<dyn FrameHandler>,
    pub chat: Arc<ChatService>,
    pub pump: PumpConfig,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(hub: Arc<Hub>, chat: Arc<ChatService>, pump: PumpConfig) -> Self {
        Self {
            relay: Arc::new(Relay::new(Arc::clone(&hub))),
            hub,
            chat,
            pump,
            start_time: Instant::now(),
        }
    }
}

/// Rejections issued before a WebSocket upgrade is attempted.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("missing userId or role")]
    MissingIdentity,

    #[error("unknown role: {0}")]
    UnknownRole(String),
}

impl IntoResponse for ConnectError {
    fn into_response(self) -> Response {
        // Clients only ever see one message for either case.
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Missing userId or role" })),
        )
            .into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    user_id: Option<String>,
    role: Option<String>,
}

impl ConnectParams {
    fn identity(self) -> Result<(UserId, Role), ConnectError> {
        let user_id = self
            .user_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(ConnectError::MissingIdentity)?;
        let role = self
            .role
            .filter(|role| !role.is_empty())
            .ok_or(ConnectError::MissingIdentity)?;
        let role = role.parse::<Role>().map_err(|_| ConnectError::UnknownRole(role))?;
        Ok((UserId::from_raw(user_id), role))
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = match &self {
            ChatError::UnknownPatient(_) => StatusCode::NOT_FOUND,
            ChatError::EmptyContent => StatusCode::BAD_REQUEST,
            ChatError::Store(e) => {
                error!(error = %e, "store failure on send path");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

fn bad_body(rejection: JsonRejection) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": rejection.body_text() })),
    )
        .into_response()
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api/chat/{patient_id}/patient", post(patient_message_handler))
        .route("/api/chat/{patient_id}/doctor", post(doctor_message_handler))
        .route("/api/physiological", post(reading_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// GET /ws?userId=..&role=doctor|patient
async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let (user_id, role) = match params.identity() {
        Ok(identity) => identity,
        Err(e) => {
            warn!(error = %e, "websocket request rejected");
            return e.into_response();
        }
    };
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let (connection, mailbox) = Connection::new(user_id, role, state.pump.mailbox_capacity);
    upgrade
        .max_message_size(state.pump.max_message_size)
        .on_upgrade(move |socket| {
            run_session(socket, connection, mailbox, state.hub, state.relay, state.pump)
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "connections": state.hub.connection_count(),
        "uptimeSeconds": state.start_time.elapsed().as_secs(),
    }))
}

#[derive(Debug, Deserialize)]
struct PatientMessageBody {
    content: String,
}

/// POST /api/chat/{patient_id}/patient
async fn patient_message_handler(
    State(state): State<AppState>,
    Path(patient_id): Path<String>,
    body: Result<Json<PatientMessageBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    match state
        .chat
        .send_patient_message(&UserId::from_raw(patient_id), &body.content)
        .await
    {
        Ok(message) => (StatusCode::CREATED, Json(message)).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DoctorMessageBody {
    doctor_id: UserId,
    content: String,
}

/// POST /api/chat/{patient_id}/doctor
async fn doctor_message_handler(
    State(state): State<AppState>,
    Path(patient_id): Path<String>,
    body: Result<Json<DoctorMessageBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    match state
        .chat
        .send_doctor_message(&UserId::from_raw(patient_id), &body.doctor_id, &body.content)
        .await
    {
        Ok(message) => (StatusCode::CREATED, Json(message)).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadingBody {
    patient_id: UserId,
    #[serde(rename = "type")]
    kind: ReadingKind,
    value: String,
    #[serde(default)]
    measured_at: Option<DateTime<Utc>>,
    #[serde(default)]
    source: Option<String>,
}

/// POST /api/physiological
async fn reading_handler(
    State(state): State<AppState>,
    body: Result<Json<ReadingBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    let now = Utc::now();
    let reading = PhysiologicalReading {
        id: ReadingId::new(),
        patient_id: body.patient_id,
        kind: body.kind,
        value: body.value,
        measured_at: body.measured_at.unwrap_or(now),
        source: body.source.unwrap_or_else(|| "manual".to_string()),
        created_at: now,
    };
    match state.chat.record_reading(reading).await {
        Ok(reading) => (StatusCode::CREATED, Json(reading)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Start the hub loop and serve on the configured address.
///
/// Everything stops when `cancel` fires: the listener stops accepting and
/// the hub closes every live mailbox, which lets each writer send a close
/// frame.
pub async fn start(
    settings: &ServerSettings,
    state: AppState,
    cancel: CancellationToken,
) -> Result<ServerHandle, std::io::Error> {
    let hub_task = state
        .hub
        .start(cancel.child_token())
        .map_err(std::io::Error::other)?;

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(settings.bind_addr()).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "carelink server listening");

    let shutdown = cancel.clone();
    let server_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
        {
            error!(error = %e, "server stopped with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        server: server_task,
        hub: hub_task,
    })
}

/// Handle returned by [`start`]; keeps the background tasks joinable.
pub struct ServerHandle {
    pub port: u16,
    server: JoinHandle<()>,
    hub: JoinHandle<()>,
}

impl ServerHandle {
    /// Wait for the listener and the hub loop to finish after cancellation.
    pub async fn wait(self) {
        let _ = self.server.await;
        let _ = self.hub.await;
    }
}
