//! Admin route handlers and response bodies.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use crate::dispatch::PushDispatcher;
use crate::error::Error;
use crate::identifiers::ClientId;
use crate::registry::ConnectionRegistry;

// ============================================================================
// AdminState
// ============================================================================

/// State shared by all admin routes.
#[derive(Debug, Clone)]
pub struct AdminState {
    /// Registry read by the status routes.
    pub registry: Arc<ConnectionRegistry>,
    /// Dispatcher used by `/push`.
    pub dispatcher: PushDispatcher,
}

impl AdminState {
    /// Creates admin state around a registry.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        let dispatcher = PushDispatcher::new(Arc::clone(&registry));
        Self {
            registry,
            dispatcher,
        }
    }
}

// ============================================================================
// Request / Response Bodies
// ============================================================================

/// Body of `POST /push`.
#[derive(Debug, Default, Deserialize)]
pub struct PushRequest {
    /// Target client identifier.
    #[serde(rename = "teacherId", default)]
    pub teacher_id: Option<String>,
    /// Payload sent to the target as one JSON text frame.
    #[serde(default)]
    pub message: Option<Value>,
}

/// Body returned by `POST /push`.
#[derive(Debug, Serialize)]
pub struct PushResponse {
    /// Whether the frame was handed to the transport.
    pub success: bool,
    /// Confirmation text on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Human-readable failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine-stable failure kind, see [`Error::code`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl PushResponse {
    fn delivered(client_id: &str) -> Self {
        Self {
            success: true,
            message: Some(format!("Message pushed to teacher {client_id}")),
            error: None,
            code: None,
        }
    }

    fn failed(error: &Error) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.to_string()),
            code: Some(error.code()),
        }
    }
}

/// Body returned by `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"`.
    pub status: &'static str,
    /// Number of registered connections.
    #[serde(rename = "onlineTeachers")]
    pub online_teachers: usize,
    /// RFC 3339 UTC timestamp with milliseconds.
    pub timestamp: String,
}

/// Body returned by `GET /online`.
#[derive(Debug, Serialize)]
pub struct OnlineResponse {
    /// Number of registered connections.
    pub count: usize,
    /// Registered identifiers, sorted.
    pub teachers: Vec<ClientId>,
}

// ============================================================================
// Handlers
// ============================================================================

/// `POST /push`: deliver a message to one connected teacher.
///
/// An unreadable body counts as missing parameters.
pub async fn push_message(State(state): State<AdminState>, body: Bytes) -> Response {
    let request = serde_json::from_slice::<PushRequest>(&body).unwrap_or_else(|e| {
        debug!(error = %e, "Unreadable push body");
        PushRequest::default()
    });

    let target = request.teacher_id.as_deref();
    match state.dispatcher.push(target, request.message.as_ref()).await {
        Ok(()) => (
            StatusCode::OK,
            Json(PushResponse::delivered(target.unwrap_or_default())),
        )
            .into_response(),
        Err(e) => {
            if !e.is_push_error() {
                error!(error = %e, "Unexpected push failure");
            }
            (status_for(&e), Json(PushResponse::failed(&e))).into_response()
        }
    }
}

/// `GET /health`: registry size and current time.
pub async fn health_check(State(state): State<AdminState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        online_teachers: state.registry.size(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

/// `GET /online`: identifiers currently in the registry.
pub async fn online_teachers(State(state): State<AdminState>) -> Json<OnlineResponse> {
    let teachers = state.registry.keys();
    Json(OnlineResponse {
        count: teachers.len(),
        teachers,
    })
}

/// Maps a push error to its HTTP status.
///
/// An offline target is an expected outcome, reported with `200`.
#[must_use]
pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::MissingParameter { .. } => StatusCode::BAD_REQUEST,
        Error::TargetNotConnected { .. } => StatusCode::OK,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
