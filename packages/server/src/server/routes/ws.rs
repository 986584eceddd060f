//! WebSocket endpoint.
//!
//! GET /ws?token=JWT
//!
//! One socket per identity: a newer socket for the same user replaces the
//! older one, which is sent a close frame.

use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Extension,
    },
    response::Response,
};
use futures::StreamExt;
use std::sync::Arc;
use tracing::error;

use crate::realtime::{run_session, InboundHandler};
use crate::server::app::AxumAppState;
use crate::server::middleware::AuthUser;

pub async fn ws_handler(
    Extension(state): Extension<AxumAppState>,
    user: AuthUser,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, user, socket))
}

async fn handle_socket(state: AxumAppState, user: AuthUser, socket: WebSocket) {
    let hub = state.deps.hub.clone();
    let registration = match hub.register(user.user_id).await {
        Ok(registration) => registration,
        Err(e) => {
            error!(user_id = %user.user_id, error = %e, "Failed to register connection");
            return;
        }
    };

    let handler: Arc<dyn InboundHandler> = Arc::new(state.deps.messenger());
    let (sink, stream) = socket.split();
    run_session(hub, registration, sink, stream, handler).await;
}
