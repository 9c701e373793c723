//! Pattern API handlers.

use axum::{
    Json,
    extract::{Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::Deserialize;
use std::sync::Arc;

use super::error_response;
use crate::bitmap::Bitmap;
use crate::pattern::PatternConfig;
use crate::server::state::AppState;

/// Query parameters for the preview endpoint.
#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    /// Pixels per needle
    #[serde(default = "default_scale")]
    pub scale: u32,
}

fn default_scale() -> u32 {
    8
}

/// PUT /api/config - Replace the pattern configuration.
pub async fn put_config(
    State(state): State<Arc<AppState>>,
    Json(config): Json<PatternConfig>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .session
        .set_pattern_config(config)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/tile - Replace the base tile.
pub async fn put_tile(
    State(state): State<Arc<AppState>>,
    Json(tile): Json<Bitmap>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .session
        .set_base_pattern(tile)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/tile - The current base tile.
pub async fn get_tile(State(state): State<Arc<AppState>>) -> Json<Bitmap> {
    Json(
        state
            .session
            .with_controller(|c| c.base_pattern().clone())
            .await,
    )
}

/// GET /api/pattern/preview - PNG of the computed pattern.
pub async fn preview(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PreviewQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if query.scale == 0 || query.scale > 64 {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("scale must be 1-64, got {}", query.scale),
        ));
    }

    let pattern = state.session.with_controller(|c| c.computed_pattern()).await;
    if pattern.is_empty() {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            "Computed pattern is empty (point cams narrower than margins)".to_string(),
        ));
    }

    let png_bytes = pattern.to_png(query.scale).map_err(error_response)?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png_bytes))
}
