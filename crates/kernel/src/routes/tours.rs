//! Tour routes, including the tour-scoped review collection.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::aggregate::PARENT_REF;
use crate::auth::Principal;
use crate::content::{EntityKind, top_five_cheap};
use crate::error::AppResult;
use crate::state::AppState;

use super::helpers::{created, listing, require_principal, single};

const TOUR: EntityKind = EntityKind::Tour;

/// Create the tour router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/tours", get(list_tours).post(create_tour))
        .route("/api/v1/tours/top-5-cheap", get(top_five))
        .route("/api/v1/tours/tour-stats", get(tour_stats))
        .route("/api/v1/tours/monthly-plan/{year}", get(monthly_plan))
        .route(
            "/api/v1/tours/{id}",
            get(get_tour).patch(update_tour).delete(delete_tour),
        )
        .route(
            "/api/v1/tours/{id}/reviews",
            get(list_tour_reviews).post(create_tour_review),
        )
}

async fn list_tours(
    State(state): State<AppState>,
    principal: Option<Extension<Principal>>,
    Query(params): Query<Vec<(String, String)>>,
) -> AppResult<Json<Value>> {
    let principal = require_principal(principal)?;
    let tours = state
        .documents()
        .list(TOUR, Some(&principal), &params)
        .await?;
    Ok(listing(TOUR.plural(), &tours))
}

async fn top_five(
    State(state): State<AppState>,
    principal: Option<Extension<Principal>>,
    Query(params): Query<Vec<(String, String)>>,
) -> AppResult<Json<Value>> {
    let principal = require_principal(principal)?;
    let tours = state
        .documents()
        .list(TOUR, Some(&principal), &top_five_cheap(&params))
        .await?;
    Ok(listing(TOUR.plural(), &tours))
}

async fn tour_stats(
    State(state): State<AppState>,
    principal: Option<Extension<Principal>>,
) -> AppResult<Json<Value>> {
    let principal = require_principal(principal)?;
    let stats = state.documents().tour_stats(Some(&principal)).await?;
    Ok(Json(json!({ "status": "success", "data": { "stats": stats } })))
}

async fn monthly_plan(
    State(state): State<AppState>,
    principal: Option<Extension<Principal>>,
    Path(year): Path<i32>,
) -> AppResult<Json<Value>> {
    let principal = require_principal(principal)?;
    let plan = state
        .documents()
        .monthly_plan(Some(&principal), year)
        .await?;
    Ok(listing("plan", &plan))
}

async fn get_tour(
    State(state): State<AppState>,
    principal: Option<Extension<Principal>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let principal = require_principal(principal)?;
    let tour = state.documents().get(TOUR, Some(&principal), id).await?;
    Ok(single(TOUR.label(), &tour))
}

async fn create_tour(
    State(state): State<AppState>,
    principal: Option<Extension<Principal>>,
    Json(body): Json<Value>,
) -> AppResult<Response> {
    let principal = require_principal(principal)?;
    let tour = state
        .documents()
        .create(TOUR, Some(&principal), body)
        .await?;
    Ok(created(TOUR.label(), &tour))
}

async fn update_tour(
    State(state): State<AppState>,
    principal: Option<Extension<Principal>>,
    Path(id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<Json<Value>> {
    let principal = require_principal(principal)?;
    let tour = state
        .documents()
        .update(TOUR, Some(&principal), id, body)
        .await?;
    Ok(single(TOUR.label(), &tour))
}

async fn delete_tour(
    State(state): State<AppState>,
    principal: Option<Extension<Principal>>,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let principal = require_principal(principal)?;
    state
        .documents()
        .delete(TOUR, Some(&principal), id)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn list_tour_reviews(
    State(state): State<AppState>,
    principal: Option<Extension<Principal>>,
    Path(id): Path<Uuid>,
    Query(params): Query<Vec<(String, String)>>,
) -> AppResult<Json<Value>> {
    let principal = require_principal(principal)?;
    let reviews = state
        .documents()
        .list_reviews_of(id, Some(&principal), &params)
        .await?;
    Ok(listing(EntityKind::Review.plural(), &reviews))
}

/// Create a review of the tour in the path; the body may omit `tour`.
async fn create_tour_review(
    State(state): State<AppState>,
    principal: Option<Extension<Principal>>,
    Path(id): Path<Uuid>,
    Json(mut body): Json<Value>,
) -> AppResult<Response> {
    let principal = require_principal(principal)?;
    if let Some(map) = body.as_object_mut() {
        map.entry(PARENT_REF)
            .or_insert_with(|| Value::String(id.to_string()));
    }
    let review = state
        .documents()
        .create(EntityKind::Review, Some(&principal), body)
        .await?;
    Ok(created(EntityKind::Review.label(), &review))
}
