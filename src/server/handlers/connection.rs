//! Connection API handlers.

use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};
use std::sync::Arc;

use super::error_response;
use crate::server::state::{AppState, SIMULATED_PASS_TIME};
use crate::transport::{SerialTransport, SimulatedMachine};

/// POST /api/connect - Open the link to the controller.
pub async fn connect(State(state): State<Arc<AppState>>) -> Result<Json<Value>, (StatusCode, String)> {
    let result = if state.config.simulate {
        let mut sim = SimulatedMachine::new(SIMULATED_PASS_TIME, None);
        state.session.connect(&mut sim).await
    } else {
        let mut serial = SerialTransport::new(&state.config.device_path)
            .with_baud_rate(state.session.machine().baud_rate);
        state.session.connect(&mut serial).await
    };
    result.map_err(error_response)?;

    Ok(Json(json!({ "connected": true })))
}

/// POST /api/disconnect - Close the link.
pub async fn disconnect(State(state): State<Arc<AppState>>) -> Json<Value> {
    state.session.disconnect().await;
    Json(json!({ "connected": false }))
}

/// POST /api/clear - Send `CLEAR_ROW`.
pub async fn clear(State(state): State<Arc<AppState>>) -> Result<StatusCode, (StatusCode, String)> {
    state.session.clear_row().await.map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}
