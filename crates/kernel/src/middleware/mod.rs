//! HTTP middleware components.

pub mod bearer_auth;
pub mod request_metrics;

pub use bearer_auth::authenticate_bearer_token;
pub use request_metrics::track_requests;
