//! Bearer token authentication middleware.
//!
//! Checks `Authorization: Bearer <token>` headers, resolves the token to
//! its account and sets the principal in request extensions.

use axum::{
    body::Body,
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::state::AppState;

/// Middleware to authenticate Bearer JWT tokens.
///
/// If a valid Bearer token is present, inserts its [`Principal`] into the
/// request extensions. If no token is present, passes through without
/// modification; handlers that need a caller reject the request. If an
/// invalid or stale token is present, returns 401.
///
/// [`Principal`]: crate::auth::Principal
pub async fn authenticate_bearer_token(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    let Some(token) = token else {
        return next.run(request).await;
    };

    match state.accounts().authenticate(&token).await {
        Ok(principal) => {
            debug!(user_id = %principal.id, role = principal.role.as_str(), "bearer token accepted");
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}
