//! Operator routes for rating summary maintenance.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde_json::{Value, json};

use crate::auth::{Action, Principal};
use crate::content::EntityKind;
use crate::error::AppResult;
use crate::state::AppState;

use super::helpers::require_principal;

/// Create the admin router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/admin/reconcile", post(full_sweep))
        .route("/api/v1/admin/reconcile/pending", get(pending))
}

/// Recompute the rating summary of every tour.
async fn full_sweep(
    State(state): State<AppState>,
    principal: Option<Extension<Principal>>,
) -> AppResult<Json<Value>> {
    let principal = require_principal(principal)?;
    state
        .documents()
        .authorize(Some(&principal), Action::Reconcile, EntityKind::Tour)?;
    let report = state.maintainer().full_sweep().await?;
    Ok(Json(json!({ "status": "success", "data": { "report": report } })))
}

/// Tours whose summary is waiting for the next reconciliation pass.
async fn pending(
    State(state): State<AppState>,
    principal: Option<Extension<Principal>>,
) -> AppResult<Json<Value>> {
    let principal = require_principal(principal)?;
    state
        .documents()
        .authorize(Some(&principal), Action::Reconcile, EntityKind::Tour)?;
    let pending = state.maintainer().pending();
    Ok(Json(json!({
        "status": "success",
        "results": pending.len(),
        "data": { "tours": pending },
    })))
}
