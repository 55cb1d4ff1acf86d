//! Audit-trail reads.

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use serde::Deserialize;

use crate::AppState;
use crate::activity::{ActivityPage, ActivityRecord};
use crate::error::Result;
use crate::middleware::{CurrentUser, require_admin_or_self};

fn default_size() -> i64 {
    10
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub page: i64,
    #[serde(default = "default_size")]
    pub size: i64,
}

/// Handler for the current account's ten most recent records.
pub async fn recent(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<Vec<ActivityRecord>>> {
    Ok(Json(state.activity.recent(user.account.id).await?))
}

/// Handler for the current account's paginated history.
pub async fn mine(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<PageQuery>,
) -> Result<Json<ActivityPage>> {
    let page = state
        .activity
        .page(user.account.id, query.page, query.size)
        .await?;
    Ok(Json(page))
}

/// Handler for any account's history, open to the subject and to admins.
pub async fn by_user(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Query(query): Query<PageQuery>,
) -> Result<Json<ActivityPage>> {
    require_admin_or_self(&user, id)?;

    let page = state.activity.page(id, query.page, query.size).await?;
    Ok(Json(page))
}
