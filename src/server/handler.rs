//! HTTP handlers for the playground API.
//!
//! Transport adapter only: operation semantics live in the session module.
//! Handlers bridge onto the blocking core with `spawn_blocking`. Raw
//! infrastructure error text stays in the logs; untrusted callers get a
//! generic message.

use std::net::SocketAddr;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::{ServerError, SessionError};
use crate::session::{SessionId, SessionManager, SessionStatus};

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    pub manager: SessionManager,
}

#[derive(Deserialize)]
pub struct StartRequest {
    pub owner_user_id: String,
    pub owner_username: String,
    pub duration_seconds: u64,
}

#[derive(Serialize)]
pub struct StartResponse {
    pub session_id: Uuid,
    /// Shown exactly once; not retrievable after this response.
    pub credential_secret: String,
    pub expires_at: DateTime<Utc>,
    pub time_remaining_seconds: u64,
    /// Degraded-mode notes from provisioning, if any.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: SessionStatus,
    pub expires_at: DateTime<Utc>,
    pub time_remaining_seconds: u64,
}

#[derive(Deserialize)]
pub struct ExecuteRequest {
    pub command: String,
}

#[derive(Serialize)]
pub struct ExecuteResponse {
    pub output: String,
    pub exit_code: i32,
    pub timed_out: bool,
}

#[derive(Deserialize)]
pub struct ExtendRequest {
    pub hours: u64,
}

#[derive(Serialize)]
pub struct ExtendResponse {
    pub expires_at: DateTime<Utc>,
    pub time_remaining_seconds: u64,
}

#[derive(Serialize)]
pub struct StopResponse {
    pub stopped: bool,
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub message: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

/// Builds the playground router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/playgrounds", post(start))
        .route("/playgrounds/:id", get(status_handler))
        .route("/playgrounds/:id", delete(stop_handler))
        .route("/playgrounds/:id/execute", post(execute))
        .route("/playgrounds/:id/extend", post(extend))
        .with_state(state)
}

/// Binds the listen address and serves until the process exits.
///
/// # Errors
///
/// Returns `ServerError` if binding or serving fails.
pub async fn run(addr: SocketAddr, manager: SessionManager) -> Result<(), ServerError> {
    let app = router(AppState { manager });

    info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;

    axum::serve(listener, app)
        .await
        .map_err(|e| ServerError::Serve(e.to_string()))?;

    Ok(())
}

async fn health() -> &'static str {
    "OK"
}

async fn start(
    State(state): State<AppState>,
    Json(req): Json<StartRequest>,
) -> Result<(StatusCode, Json<StartResponse>), ApiError> {
    let manager = state.manager.clone();
    let session = task::spawn_blocking(move || {
        manager.start(&req.owner_user_id, &req.owner_username, req.duration_seconds)
    })
    .await
    .map_err(join_error)?
    .map_err(map_error)?;

    let warnings = session
        .bootstrap
        .warnings()
        .iter()
        .map(|w| (*w).to_string())
        .collect();

    Ok((
        StatusCode::CREATED,
        Json(StartResponse {
            session_id: session.record.id,
            credential_secret: session.credential_secret,
            expires_at: session.record.expires_at,
            time_remaining_seconds: session
                .record
                .time_remaining()
                .unwrap_or_default()
                .as_secs(),
            warnings,
        }),
    ))
}

async fn status_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let id = parse_id(&id)?;
    let manager = state.manager.clone();

    let view = task::spawn_blocking(move || manager.status(id))
        .await
        .map_err(join_error)?
        .map_err(map_error)?;

    Ok(Json(StatusResponse {
        status: view.status,
        expires_at: view.expires_at,
        time_remaining_seconds: view.time_remaining.as_secs(),
    }))
}

async fn execute(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ExecuteRequest>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let id = parse_id(&id)?;
    let manager = state.manager.clone();

    let result = task::spawn_blocking(move || manager.execute(id, &req.command))
        .await
        .map_err(join_error)?
        .map_err(map_error)?;

    Ok(Json(ExecuteResponse {
        output: result.output,
        exit_code: result.exit_code,
        timed_out: result.timed_out,
    }))
}

async fn extend(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ExtendRequest>,
) -> Result<Json<ExtendResponse>, ApiError> {
    let id = parse_id(&id)?;
    let manager = state.manager.clone();

    let outcome = task::spawn_blocking(move || manager.extend(id, req.hours))
        .await
        .map_err(join_error)?
        .map_err(map_error)?;

    Ok(Json(ExtendResponse {
        expires_at: outcome.expires_at,
        time_remaining_seconds: outcome.time_remaining.as_secs(),
    }))
}

async fn stop_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StopResponse>, ApiError> {
    let id = parse_id(&id)?;
    let manager = state.manager.clone();

    task::spawn_blocking(move || manager.stop(id))
        .await
        .map_err(join_error)?
        .map_err(map_error)?;

    Ok(Json(StopResponse { stopped: true }))
}

/// Parses the path id. Malformed ids are indistinguishable from unknown ones.
fn parse_id(raw: &str) -> Result<SessionId, ApiError> {
    Uuid::parse_str(raw).map_err(|_| map_error(SessionError::NotFound))
}

/// Maps core errors onto HTTP responses, sanitizing infrastructure detail.
fn map_error(err: SessionError) -> ApiError {
    match err {
        SessionError::NotFound => (StatusCode::NOT_FOUND, body(&err.to_string())),
        SessionError::DurationOutOfRange { .. }
        | SessionError::ExtensionOutOfRange { .. }
        | SessionError::CapExceeded { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, body(&err.to_string()))
        }
        SessionError::Runtime(e) => {
            error!(error = %e, "infrastructure failure");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                body("sandbox infrastructure error"),
            )
        }
        SessionError::Store { .. } | SessionError::Corrupt { .. } => {
            error!(error = %err, "session store failure");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                body("sandbox infrastructure error"),
            )
        }
    }
}

fn join_error(err: task::JoinError) -> ApiError {
    error!(error = %err, "blocking task failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        body("sandbox infrastructure error"),
    )
}

fn body(message: &str) -> Json<ErrorBody> {
    Json(ErrorBody {
        message: message.to_string(),
    })
}
