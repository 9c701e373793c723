//! Knitting state API handlers.

use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error_response;
use crate::knitting::{CarriageSide, KnittingState};
use crate::pattern::PatternConfig;
use crate::server::state::AppState;
use crate::session::OutgoingRow;

/// Snapshot returned by `GET /api/state`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateResponse {
    pub connected: bool,
    pub machine: &'static str,
    pub knitting_state: KnittingState,
    pub pattern_config: PatternConfig,
    pub pattern_width: usize,
    pub pattern_height: usize,
}

/// Result of a state change: the row sent to the machine, if any.
#[derive(Debug, Serialize)]
pub struct ChangeResponse {
    pub sent: Option<OutgoingRow>,
}

#[derive(Debug, Deserialize)]
pub struct CamsRequest {
    pub left: i32,
    pub right: i32,
}

#[derive(Debug, Deserialize)]
pub struct RowRequest {
    pub row: usize,
}

/// Needles for the row the carriage will knit next.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowResponse {
    pub row_number: usize,
    pub side: CarriageSide,
    pub needles: Vec<u8>,
}

type ChangeResult = Result<Json<ChangeResponse>, (StatusCode, String)>;

fn changed(sent: Result<Option<OutgoingRow>, crate::error::KnitError>) -> ChangeResult {
    sent.map(|sent| Json(ChangeResponse { sent }))
        .map_err(error_response)
}

/// GET /api/state - Current knitting state and pattern summary.
pub async fn get_state(State(state): State<Arc<AppState>>) -> Json<StateResponse> {
    let connected = state.session.is_connected();
    let machine = state.session.machine().name;
    let response = state
        .session
        .with_controller(|c| {
            let pattern = c.computed_pattern();
            StateResponse {
                connected,
                machine,
                knitting_state: c.knitting_state().clone(),
                pattern_config: c.pattern_config().clone(),
                pattern_width: pattern.width,
                pattern_height: pattern.height,
            }
        })
        .await;
    Json(response)
}

/// PUT /api/knitting - Replace the knitting state.
pub async fn put_knitting(
    State(state): State<Arc<AppState>>,
    Json(knitting): Json<KnittingState>,
) -> ChangeResult {
    if knitting.point_cams[0] >= knitting.point_cams[1] {
        return Err((
            StatusCode::BAD_REQUEST,
            "point cams must satisfy left < right".to_string(),
        ));
    }
    changed(state.session.set_knitting_state(knitting).await)
}

/// POST /api/knitting/start - Start streaming rows.
pub async fn start(State(state): State<Arc<AppState>>) -> ChangeResult {
    changed(state.session.start_patterning().await)
}

/// POST /api/knitting/stop - Stop streaming rows.
pub async fn stop(State(state): State<Arc<AppState>>) -> ChangeResult {
    changed(state.session.stop_patterning().await)
}

/// PUT /api/knitting/cams - Move the point cams.
pub async fn put_cams(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CamsRequest>,
) -> ChangeResult {
    changed(state.session.set_point_cams(req.left, req.right).await)
}

/// PUT /api/knitting/row - Jump to a row.
pub async fn put_row(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RowRequest>,
) -> ChangeResult {
    changed(state.session.set_row_number(req.row).await)
}

/// GET /api/pattern/row - Needles for the current row and carriage side.
pub async fn current_row(State(state): State<Arc<AppState>>) -> Json<RowResponse> {
    let response = state
        .session
        .with_controller(|c| RowResponse {
            row_number: c.knitting_state().current_row_number,
            side: c.knitting_state().carriage_side,
            needles: c.current_row(),
        })
        .await;
    Json(response)
}
