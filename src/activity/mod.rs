//! Append-only audit records, one per subject-scoped event.

mod memory;
mod repository;

pub use memory::*;
pub use repository::*;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;

/// How many records "recent" means.
pub const RECENT_LIMIT: i64 = 10;

/// What happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ActivityKind {
    #[serde(rename = "LOGIN")]
    Login,
    #[serde(rename = "PROFILE_VIEW")]
    ProfileView,
    #[serde(rename = "PROFILE_UPDATE")]
    ProfileUpdate,
    #[serde(rename = "PASSWORD_CHANGE")]
    PasswordChange,
    #[serde(rename = "PASSWORD_RESET")]
    PasswordReset,
    #[serde(rename = "ADMIN_ACTION")]
    AdminAction,
    #[serde(rename = "DASHBOARD_VIEW")]
    DashboardView,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Login => "LOGIN",
            ActivityKind::ProfileView => "PROFILE_VIEW",
            ActivityKind::ProfileUpdate => "PROFILE_UPDATE",
            ActivityKind::PasswordChange => "PASSWORD_CHANGE",
            ActivityKind::PasswordReset => "PASSWORD_RESET",
            ActivityKind::AdminAction => "ADMIN_ACTION",
            ActivityKind::DashboardView => "DASHBOARD_VIEW",
        }
    }
}

impl TryFrom<String> for ActivityKind {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        match value.as_str() {
            "LOGIN" => Ok(ActivityKind::Login),
            "PROFILE_VIEW" => Ok(ActivityKind::ProfileView),
            "PROFILE_UPDATE" => Ok(ActivityKind::ProfileUpdate),
            "PASSWORD_CHANGE" => Ok(ActivityKind::PasswordChange),
            "PASSWORD_RESET" => Ok(ActivityKind::PasswordReset),
            "ADMIN_ACTION" => Ok(ActivityKind::AdminAction),
            "DASHBOARD_VIEW" => Ok(ActivityKind::DashboardView),
            other => Err(format!("unknown activity type: {other}")),
        }
    }
}

/// Request metadata captured alongside every record.
#[derive(Clone, Debug, Default)]
pub struct ClientMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// One audit record as persisted.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub id: i64,
    pub user_id: i64,
    #[sqlx(rename = "activity_type", try_from = "String")]
    #[serde(rename = "activityType")]
    pub kind: ActivityKind,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Paginated view over one subject's records.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityPage {
    pub items: Vec<ActivityRecord>,
    pub total: i64,
    pub page: i64,
    pub size: i64,
}

/// Storage capability behind [`ActivityLog`].
#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn append(
        &self,
        user_id: i64,
        kind: ActivityKind,
        description: &str,
        meta: &ClientMeta,
    ) -> Result<()>;

    /// Most recent `limit` records, reverse chronological.
    async fn recent(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<ActivityRecord>>;

    /// One page plus the total count.
    async fn page(
        &self,
        user_id: i64,
        page: i64,
        size: i64,
    ) -> Result<(Vec<ActivityRecord>, i64)>;
}

/// Audit log with fire-and-forget appends: the operation that triggered a
/// record must not fail because logging did.
#[derive(Clone)]
pub struct ActivityLog {
    store: Arc<dyn ActivityStore>,
}

impl ActivityLog {
    pub fn new(store: Arc<dyn ActivityStore>) -> Self {
        Self { store }
    }

    pub async fn record(
        &self,
        user_id: i64,
        kind: ActivityKind,
        description: &str,
        meta: &ClientMeta,
    ) {
        if let Err(err) =
            self.store.append(user_id, kind, description, meta).await
        {
            tracing::warn!(
                user_id,
                kind = kind.as_str(),
                error = %err,
                "failed to append activity record"
            );
        }
    }

    pub async fn recent(&self, user_id: i64) -> Result<Vec<ActivityRecord>> {
        self.store.recent(user_id, RECENT_LIMIT).await
    }

    pub async fn page(
        &self,
        user_id: i64,
        page: i64,
        size: i64,
    ) -> Result<ActivityPage> {
        let (items, total) = self.store.page(user_id, page, size).await?;
        Ok(ActivityPage {
            items,
            total,
            page,
            size,
        })
    }
}
