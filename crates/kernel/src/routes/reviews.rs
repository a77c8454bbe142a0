//! Review routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::Principal;
use crate::content::EntityKind;
use crate::error::AppResult;
use crate::state::AppState;

use super::helpers::{affected, created, listing, require_principal, single};

const REVIEW: EntityKind = EntityKind::Review;

/// Create the review router.
///
/// `PATCH` and `DELETE` on the collection act on every review matching the
/// query string filters.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/reviews",
            get(list_reviews)
                .post(create_review)
                .patch(update_reviews_where)
                .delete(delete_reviews_where),
        )
        .route(
            "/api/v1/reviews/{id}",
            get(get_review).patch(update_review).delete(delete_review),
        )
}

async fn list_reviews(
    State(state): State<AppState>,
    principal: Option<Extension<Principal>>,
    Query(params): Query<Vec<(String, String)>>,
) -> AppResult<Json<Value>> {
    let principal = require_principal(principal)?;
    let reviews = state
        .documents()
        .list(REVIEW, Some(&principal), &params)
        .await?;
    Ok(listing(REVIEW.plural(), &reviews))
}

async fn create_review(
    State(state): State<AppState>,
    principal: Option<Extension<Principal>>,
    Json(body): Json<Value>,
) -> AppResult<Response> {
    let principal = require_principal(principal)?;
    let review = state
        .documents()
        .create(REVIEW, Some(&principal), body)
        .await?;
    Ok(created(REVIEW.label(), &review))
}

async fn get_review(
    State(state): State<AppState>,
    principal: Option<Extension<Principal>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let principal = require_principal(principal)?;
    let review = state.documents().get(REVIEW, Some(&principal), id).await?;
    Ok(single(REVIEW.label(), &review))
}

async fn update_review(
    State(state): State<AppState>,
    principal: Option<Extension<Principal>>,
    Path(id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<Json<Value>> {
    let principal = require_principal(principal)?;
    let review = state
        .documents()
        .update(REVIEW, Some(&principal), id, body)
        .await?;
    Ok(single(REVIEW.label(), &review))
}

async fn delete_review(
    State(state): State<AppState>,
    principal: Option<Extension<Principal>>,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let principal = require_principal(principal)?;
    state
        .documents()
        .delete(REVIEW, Some(&principal), id)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn update_reviews_where(
    State(state): State<AppState>,
    principal: Option<Extension<Principal>>,
    Query(params): Query<Vec<(String, String)>>,
    Json(body): Json<Value>,
) -> AppResult<Json<Value>> {
    let principal = require_principal(principal)?;
    let changed = state
        .documents()
        .update_reviews_where(Some(&principal), &params, body)
        .await?;
    Ok(affected(changed))
}

async fn delete_reviews_where(
    State(state): State<AppState>,
    principal: Option<Extension<Principal>>,
    Query(params): Query<Vec<(String, String)>>,
) -> AppResult<Json<Value>> {
    let principal = require_principal(principal)?;
    let removed = state
        .documents()
        .delete_reviews_where(Some(&principal), &params)
        .await?;
    Ok(affected(removed))
}
