//! Account routes: signup, login, password reset and the caller's profile.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::auth::Principal;
use crate::content::EntityKind;
use crate::error::{AppResult, ValidationError};
use crate::models::LoginInput;
use crate::state::AppState;

use super::helpers::{listing, require_principal, single, with_token};

const USER: EntityKind = EntityKind::User;

/// Create the account router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/users", get(list_users))
        .route("/api/v1/users/signup", post(signup))
        .route("/api/v1/users/login", post(login))
        .route("/api/v1/users/forgot-password", post(forgot_password))
        .route("/api/v1/users/reset-password/{token}", patch(reset_password))
        .route("/api/v1/users/update-my-password", patch(update_my_password))
        .route("/api/v1/users/me", get(me).patch(update_me).delete(delete_me))
        .route("/api/v1/users/{id}", get(get_user))
}

async fn signup(State(state): State<AppState>, Json(body): Json<Value>) -> AppResult<Response> {
    let session = state.accounts().signup(body).await?;
    Ok(with_token(StatusCode::CREATED, &session.token, &session.user))
}

async fn login(
    State(state): State<AppState>,
    Json(input): Json<LoginInput>,
) -> AppResult<Response> {
    let session = state.accounts().login(input).await?;
    Ok(with_token(StatusCode::OK, &session.token, &session.user))
}

#[derive(Debug, Deserialize)]
struct ForgotPasswordRequest {
    #[serde(default)]
    email: Option<String>,
}

async fn forgot_password(
    State(state): State<AppState>,
    Json(request): Json<ForgotPasswordRequest>,
) -> AppResult<Json<Value>> {
    let email = request
        .email
        .filter(|e| !e.trim().is_empty())
        .ok_or_else(|| ValidationError::InvalidDocument("please provide an email".to_string()))?;
    let reset = state.accounts().forgot_password(&email).await?;

    let mut body = json!({
        "status": "success",
        "message": "password reset token issued",
        "expiresAt": reset.expires_at,
    });
    if state.expose_reset_tokens() {
        body["resetToken"] = Value::String(reset.token);
    }
    Ok(Json(body))
}

async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(body): Json<Value>,
) -> AppResult<Response> {
    let session = state.accounts().reset_password(&token, body).await?;
    Ok(with_token(StatusCode::OK, &session.token, &session.user))
}

async fn update_my_password(
    State(state): State<AppState>,
    principal: Option<Extension<Principal>>,
    Json(body): Json<Value>,
) -> AppResult<Response> {
    let principal = require_principal(principal)?;
    let session = state.accounts().change_password(&principal, body).await?;
    Ok(with_token(StatusCode::OK, &session.token, &session.user))
}

async fn me(
    State(state): State<AppState>,
    principal: Option<Extension<Principal>>,
) -> AppResult<Json<Value>> {
    let principal = require_principal(principal)?;
    let user = state.accounts().me(&principal).await?;
    Ok(single(USER.label(), &user))
}

async fn update_me(
    State(state): State<AppState>,
    principal: Option<Extension<Principal>>,
    Json(body): Json<Value>,
) -> AppResult<Json<Value>> {
    let principal = require_principal(principal)?;
    let user = state.accounts().update_me(&principal, body).await?;
    Ok(single(USER.label(), &user))
}

async fn delete_me(
    State(state): State<AppState>,
    principal: Option<Extension<Principal>>,
) -> AppResult<Response> {
    let principal = require_principal(principal)?;
    state.accounts().delete_me(&principal).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn list_users(
    State(state): State<AppState>,
    principal: Option<Extension<Principal>>,
    Query(params): Query<Vec<(String, String)>>,
) -> AppResult<Json<Value>> {
    let principal = require_principal(principal)?;
    let users = state
        .documents()
        .list(USER, Some(&principal), &params)
        .await?;
    Ok(listing(USER.plural(), &users))
}

async fn get_user(
    State(state): State<AppState>,
    principal: Option<Extension<Principal>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let principal = require_principal(principal)?;
    let user = state.documents().get(USER, Some(&principal), id).await?;
    Ok(single(USER.label(), &user))
}
