//! Realtime hub: per-document topics with presence tracking and
//! broadcast fan-out, served over a WebSocket gateway.

pub mod connection;
pub mod dispatcher;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};

use quill_db::Database;

pub use dispatcher::Dispatcher;

#[derive(Clone)]
struct GatewayState {
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: String,
}

/// `GET /gateway`: WebSocket upgrade into [`connection::handle_connection`].
pub fn router(dispatcher: Dispatcher, db: Arc<Database>, jwt_secret: String) -> Router {
    Router::new().route("/gateway", get(ws_upgrade)).with_state(GatewayState {
        dispatcher,
        db,
        jwt_secret,
    })
}

async fn ws_upgrade(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.dispatcher, state.db, state.jwt_secret))
}
