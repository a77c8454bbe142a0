//! HTTP route handlers.

pub mod admin;
pub mod health;
pub mod helpers;
pub mod metrics;
pub mod reviews;
pub mod tours;
pub mod users;

use axum::Router;

use crate::middleware::{authenticate_bearer_token, track_requests};
use crate::state::AppState;

/// Every route with the authentication and request metrics layers.
///
/// CORS and tracing are added by the binary.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(tours::router())
        .merge(reviews::router())
        .merge(users::router())
        .merge(admin::router())
        .merge(health::router())
        .merge(metrics::router())
        // Last added runs first: metrics wrap authentication.
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            authenticate_bearer_token,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            track_requests,
        ))
        .with_state(state)
}
