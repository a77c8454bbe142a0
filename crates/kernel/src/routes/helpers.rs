//! Shared route helpers: caller extraction and the response envelope.

use axum::Extension;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::{Value, json};

use crate::auth::Principal;
use crate::error::{AppError, AppResult};
use crate::store::Document;

/// Require an authenticated caller.
///
/// The bearer middleware only inserts a principal for a valid token, so a
/// missing extension means no token was sent.
pub fn require_principal(principal: Option<Extension<Principal>>) -> AppResult<Principal> {
    principal
        .map(|Extension(p)| p)
        .ok_or(AppError::Unauthorized)
}

/// `{"status":"success","results":n,"data":{key:[...]}}`
pub fn listing<T: Serialize>(key: &str, items: &[T]) -> Json<Value> {
    Json(json!({
        "status": "success",
        "results": items.len(),
        "data": { key: items },
    }))
}

/// `{"status":"success","data":{key:doc}}`
pub fn single(key: &str, doc: &Document) -> Json<Value> {
    Json(json!({
        "status": "success",
        "data": { key: doc },
    }))
}

/// A single document with `201 Created`.
pub fn created(key: &str, doc: &Document) -> Response {
    (StatusCode::CREATED, single(key, doc)).into_response()
}

/// Session responses carry the token beside the user.
pub fn with_token(status: StatusCode, token: &str, user: &Document) -> Response {
    (
        status,
        Json(json!({
            "status": "success",
            "token": token,
            "data": { "user": user },
        })),
    )
        .into_response()
}

/// Bulk operations report how many documents they touched.
pub fn affected(count: u64) -> Json<Value> {
    Json(json!({
        "status": "success",
        "data": { "affected": count },
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn listing_counts_results() {
        let Json(body) = listing("tours", &[json!({"a": 1}), json!({"a": 2})]);
        assert_eq!(body["status"], "success");
        assert_eq!(body["results"], 2);
        assert_eq!(body["data"]["tours"][1]["a"], 2);
    }

    #[test]
    fn missing_principal_is_unauthorized() {
        assert!(matches!(
            require_principal(None).unwrap_err(),
            AppError::Unauthorized
        ));
        let p = Principal::new(Uuid::now_v7(), crate::auth::Role::Admin);
        assert_eq!(require_principal(Some(Extension(p.clone()))).unwrap(), p);
    }
}
