//! # HTTP Control Surface
//!
//! JSON endpoints for driving a knitting session from a browser or script.
//!
//! ## Usage
//!
//! ```bash
//! knitstream serve --listen 0.0.0.0:8080 --device /dev/ttyACM0
//! ```
//!
//! ## Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/api/state` | Knitting state, config, pattern size |
//! | PUT | `/api/config` | Replace the pattern configuration |
//! | GET/PUT | `/api/tile` | Read or replace the base tile |
//! | PUT | `/api/knitting` | Replace the knitting state |
//! | PUT | `/api/knitting/cams` | Move the point cams |
//! | PUT | `/api/knitting/row` | Jump to a row |
//! | POST | `/api/knitting/start` | Start patterning |
//! | POST | `/api/knitting/stop` | Stop patterning |
//! | POST | `/api/connect` | Open the controller link |
//! | POST | `/api/disconnect` | Close the controller link |
//! | POST | `/api/clear` | Send `CLEAR_ROW` |
//! | GET | `/api/pattern/row` | Needles for the current row |
//! | GET | `/api/pattern/preview` | PNG of the computed pattern |

mod handlers;
mod state;

pub use state::ServerConfig;

use axum::{
    Router,
    routing::{get, post, put},
};
use std::sync::Arc;

use crate::error::KnitError;
use crate::session::{ConnectionSession, SessionEvent};
use state::AppState;

/// Build the router around an existing session.
pub fn router(config: ServerConfig, session: ConnectionSession) -> Router {
    let app_state = Arc::new(AppState::new(config, session));

    Router::new()
        .route("/api/state", get(handlers::knitting::get_state))
        .route("/api/config", put(handlers::pattern::put_config))
        .route(
            "/api/tile",
            get(handlers::pattern::get_tile).put(handlers::pattern::put_tile),
        )
        .route("/api/knitting", put(handlers::knitting::put_knitting))
        .route("/api/knitting/cams", put(handlers::knitting::put_cams))
        .route("/api/knitting/row", put(handlers::knitting::put_row))
        .route("/api/knitting/start", post(handlers::knitting::start))
        .route("/api/knitting/stop", post(handlers::knitting::stop))
        .route("/api/connect", post(handlers::connection::connect))
        .route("/api/disconnect", post(handlers::connection::disconnect))
        .route("/api/clear", post(handlers::connection::clear))
        .route("/api/pattern/row", get(handlers::knitting::current_row))
        .route("/api/pattern/preview", get(handlers::pattern::preview))
        .with_state(app_state)
}

/// Start the HTTP server.
///
/// ## Example
///
/// ```no_run
/// use knitstream::server::{serve, ServerConfig};
/// use knitstream::session::ConnectionSession;
///
/// # async fn example() -> Result<(), knitstream::error::KnitError> {
/// let config = ServerConfig {
///     device_path: "/dev/ttyACM0".to_string(),
///     listen_addr: "0.0.0.0:8080".to_string(),
///     simulate: false,
/// };
///
/// serve(config, ConnectionSession::default()).await?;
/// # Ok(())
/// # }
/// ```
pub async fn serve(config: ServerConfig, session: ConnectionSession) -> Result<(), KnitError> {
    tokio::spawn(log_events(session.clone()));

    println!("knitstream HTTP server starting...");
    println!("Listening on: {}", config.listen_addr);
    if config.simulate {
        println!("Controller: simulated");
    } else {
        println!("Controller device: {}", config.device_path);
    }
    println!();

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .map_err(|e| {
            KnitError::Transport(format!("Failed to bind to {}: {}", config.listen_addr, e))
        })?;

    let app = router(config, session);
    axum::serve(listener, app)
        .await
        .map_err(|e| KnitError::Transport(format!("Server error: {}", e)))?;

    Ok(())
}

/// Background task logging rows sent while the server runs.
async fn log_events(session: ConnectionSession) {
    let mut events = session.subscribe();
    loop {
        match events.recv().await {
            Ok(SessionEvent::RowSent(row)) => {
                log::info!("[row] #{} sent ({} side)", row.row_number, row.side)
            }
            Ok(SessionEvent::Disconnected) => log::info!("[link] disconnected"),
            Ok(SessionEvent::Message(_)) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                log::warn!("Event log lagged, skipped {} events", n)
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}
