//! HTTP error mapping for domain errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::domains::auth::AuthError;
use crate::domains::chat::ChatError;
use crate::domains::messenger::MessengerError;

/// Error returned by every JSON route. Renders as `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    Chat(ChatError),
    Messenger(MessengerError),
    Auth(AuthError),
}

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        ApiError::Chat(e)
    }
}

impl From<MessengerError> for ApiError {
    fn from(e: MessengerError) -> Self {
        ApiError::Messenger(e)
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        ApiError::Auth(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Chat(e) => match e {
                ChatError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
                ChatError::NotFound => StatusCode::NOT_FOUND,
                ChatError::NotAuthorized => StatusCode::FORBIDDEN,
                ChatError::Upstream(_) => StatusCode::BAD_GATEWAY,
                ChatError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Messenger(e) => match e {
                MessengerError::NotParticipant | MessengerError::NotAuthorized => {
                    StatusCode::FORBIDDEN
                }
                MessengerError::NotFound => StatusCode::NOT_FOUND,
                MessengerError::DuplicateReaction => StatusCode::CONFLICT,
                MessengerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                MessengerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Auth(e) => match e {
                AuthError::AuthenticationRequired | AuthError::InvalidToken => {
                    StatusCode::UNAUTHORIZED
                }
                AuthError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Unauthorized => "Authentication required".to_string(),
            ApiError::Chat(e) => e.to_string(),
            ApiError::Messenger(e) => e.to_string(),
            ApiError::Auth(e) => e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = %status, error = %self.message(), "Request failed");
            // Storage details stay in the logs
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                return (status, Json(json!({ "error": "Internal server error" }))).into_response();
            }
        }
        (status, Json(json!({ "error": self.message() }))).into_response()
    }
}
