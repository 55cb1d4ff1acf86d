//! Per-user dashboard figures.

use axum::extract::State;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::AppState;
use crate::activity::{ActivityKind, ActivityRecord, ClientMeta};
use crate::error::Result;
use crate::middleware::CurrentUser;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub recent_activities: Vec<ActivityRecord>,
    pub total_activities: i64,
    pub last_login: Option<DateTime<Utc>>,
}

/// Handler for the current account's dashboard: recent records, the total,
/// and the last recorded login.
pub async fn user_stats(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    meta: ClientMeta,
) -> Result<Json<UserStats>> {
    state
        .activity
        .record(
            user.account.id,
            ActivityKind::DashboardView,
            "User viewed their dashboard",
            &meta,
        )
        .await;

    let page = state.activity.page(user.account.id, 0, 10).await?;
    let last_login = page
        .items
        .iter()
        .find(|record| record.kind == ActivityKind::Login)
        .map(|record| record.timestamp);

    Ok(Json(UserStats {
        recent_activities: page.items,
        total_activities: page.total,
        last_login,
    }))
}
