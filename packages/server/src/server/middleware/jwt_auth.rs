use crate::common::UserId;
use crate::domains::auth::JwtService;
use crate::server::errors::ApiError;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, Request},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::debug;

/// Authenticated user information from JWT
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: UserId,
    pub role: String,
}

/// JWT authentication middleware
///
/// Extracts the token from the Authorization header (or the `token` query
/// parameter, for WebSocket and EventSource clients that can't set headers),
/// verifies it, and adds AuthUser to request extensions.
/// If no token or invalid token, request continues without AuthUser.
pub async fn jwt_auth_middleware(
    jwt_service: Arc<JwtService>,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if let Some(user) = extract_auth_user(&request, &jwt_service) {
        debug!("Authenticated user: {} (role: {})", user.user_id, user.role);
        request.extensions_mut().insert(user);
    } else {
        debug!("No valid authentication token");
    }

    next.run(request).await
}

/// Extract and verify JWT token from request
fn extract_auth_user<B>(request: &Request<B>, jwt_service: &JwtService) -> Option<AuthUser> {
    let token = bearer_token(request).or_else(|| query_token(request))?;
    let claims = jwt_service.verify_token(&token).ok()?;

    Some(AuthUser {
        user_id: claims.user_id,
        role: claims.role,
    })
}

fn bearer_token<B>(request: &Request<B>) -> Option<String> {
    let auth_str = request.headers().get("authorization")?.to_str().ok()?;
    // Handle both "Bearer <token>" and raw token
    Some(auth_str.strip_prefix("Bearer ").unwrap_or(auth_str).to_string())
}

fn query_token<B>(request: &Request<B>) -> Option<String> {
    request
        .uri()
        .query()?
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Routes that require a caller take `AuthUser` as an argument.
#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(ApiError::Unauthorized)
    }
}
