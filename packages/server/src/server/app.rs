//! Application setup and server configuration.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use sqlx::PgPool;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::kernel::ServerDeps;
use crate::server::middleware::jwt_auth_middleware;
use crate::server::routes::{
    create_chat, health_handler, list_chat_messages, list_chats, messenger,
    regenerate_chat_message, send_chat_message, usage_handler, ws_handler,
};

/// Shared application state
#[derive(Clone)]
pub struct AxumAppState {
    pub db_pool: PgPool,
    pub deps: Arc<ServerDeps>,
}

/// Build the Axum application router
pub fn build_app(pool: PgPool, deps: Arc<ServerDeps>, allowed_origins: Vec<String>) -> Router {
    let jwt_service = deps.jwt_service.clone();

    let app_state = AxumAppState {
        db_pool: pool,
        deps,
    };

    Router::new()
        // Real-time push
        .route("/ws", get(ws_handler))
        // Chat (SSE replies)
        .route("/api/chats", get(list_chats).post(create_chat))
        .route(
            "/api/chats/:chat_id/messages",
            get(list_chat_messages).post(send_chat_message),
        )
        .route(
            "/api/chats/:chat_id/messages/:message_id/regenerate",
            post(regenerate_chat_message),
        )
        .route("/api/usage", get(usage_handler))
        // Messenger
        .route(
            "/api/conversations",
            get(messenger::list_conversations).post(messenger::create_conversation),
        )
        .route(
            "/api/conversations/:conversation_id/messages",
            get(messenger::list_messages).post(messenger::send_message),
        )
        .route(
            "/api/messages/:message_id",
            put(messenger::update_message).delete(messenger::delete_message),
        )
        .route(
            "/api/messages/:message_id/reactions",
            post(messenger::add_reaction),
        )
        .route(
            "/api/messages/:message_id/reactions/:emoji",
            delete(messenger::remove_reaction),
        )
        .route("/api/messages/:message_id/read", post(messenger::mark_as_read))
        // Health check
        .route("/health", get(health_handler))
        // Middleware layers (applied in reverse order - last added runs first)
        .layer(middleware::from_fn(move |req, next| {
            jwt_auth_middleware(jwt_service.clone(), req, next)
        }))
        .layer(Extension(app_state))
        .layer(cors_layer(&allowed_origins))
        .layer(TraceLayer::new_for_http())
}

/// Any origin when none are configured (development)
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    if allowed_origins.is_empty() {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(origins))
}
