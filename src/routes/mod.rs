//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! One path serves both audiences: a websocket upgrade on `/` becomes a
//! drawing session, while a plain `GET /` gets a short plaintext
//! acknowledgment. `/healthz` is for load balancers.

pub mod ws;

use std::net::SocketAddr;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Body returned to non-websocket requests on the base path.
pub const ACK_BODY: &str = "drawing relay websocket server\n";

/// Build the application router. Serve it with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Upgrade websocket requests; answer everything else with the ack body.
async fn handle_root(
    State(state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match ws {
        Ok(ws) => ws
            .max_message_size(state.config.max_message_bytes)
            .on_upgrade(move |socket| ws::run_ws(socket, state, Some(remote_addr))),
        Err(_) => ([(CONTENT_TYPE, "text/plain; charset=utf-8")], ACK_BODY).into_response(),
    }
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
