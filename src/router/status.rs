//! Instance metadata.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct Status {
    name: String,
    version: &'static str,
}

/// Handler for `/status.json`.
pub async fn handler(State(state): State<AppState>) -> Json<Status> {
    let config = Arc::clone(&state.config);
    Json(Status {
        name: config.name.clone(),
        version: env!("CARGO_PKG_VERSION"),
    })
}
