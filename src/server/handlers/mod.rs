//! HTTP handlers for the server.

pub mod connection;
pub mod knitting;
pub mod pattern;

use axum::http::StatusCode;

use crate::error::KnitError;

/// Map a library error onto an HTTP status with a plain-text body.
pub(crate) fn error_response(e: KnitError) -> (StatusCode, String) {
    let status = match &e {
        KnitError::InvalidRow(_)
        | KnitError::Config(_)
        | KnitError::Pattern(_)
        | KnitError::Json(_) => StatusCode::BAD_REQUEST,
        KnitError::NotConnected => StatusCode::CONFLICT,
        KnitError::Transport(_) | KnitError::Protocol(_) | KnitError::Io(_) => {
            StatusCode::BAD_GATEWAY
        }
        KnitError::Image(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}
