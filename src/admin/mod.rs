//! Administrative HTTP interface.
//!
//! Served on its own listener, separate from client connections.
//!
//! | Route | Description |
//! |-------|-------------|
//! | `POST /push` | Push a message to one connected teacher |
//! | `GET /health` | Liveness and online count |
//! | `GET /online` | Identifiers currently connected |

// ============================================================================
// Submodules
// ============================================================================

/// Route handlers and response bodies.
pub mod handlers;

// ============================================================================
// Imports
// ============================================================================

use axum::Router;
use axum::routing::{get, post};

pub use handlers::{AdminState, HealthResponse, OnlineResponse, PushRequest, PushResponse};

// ============================================================================
// Router
// ============================================================================

/// Builds the admin router.
pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/push", post(handlers::push_message))
        .route("/health", get(handlers::health_check))
        .route("/online", get(handlers::online_teachers))
        .with_state(state)
}

// ============================================================================
// Tests
// ============================================================================
