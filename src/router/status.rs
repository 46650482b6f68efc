//! Public service status and Prometheus exposition.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::AppState;

/// Structured status.
#[derive(Debug, Serialize, Deserialize)]
pub struct Status {
    pub name: String,
    /// Public URL, empty when not configured.
    pub url: String,
    pub version: String,
}

/// Public server status.
pub async fn status(State(state): State<AppState>) -> Json<Status> {
    let name = if state.config.name.is_empty() {
        env!("CARGO_CRATE_NAME").to_owned()
    } else {
        state.config.name.clone()
    };

    Json(Status {
        name,
        url: state.config.url.clone(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

/// Render collected metrics, when a recorder is installed.
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
