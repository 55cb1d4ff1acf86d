//! Handle database requests for audit records.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::activity::{
    ActivityKind, ActivityRecord, ActivityStore, ClientMeta,
};
use crate::error::Result;

#[derive(Clone)]
pub struct PgActivityStore {
    pool: PgPool,
}

impl PgActivityStore {
    /// Create a new [`PgActivityStore`].
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = r#"SELECT
        id, user_id, activity_type, description, timestamp,
        ip_address, user_agent
    FROM user_activities"#;

#[async_trait]
impl ActivityStore for PgActivityStore {
    async fn append(
        &self,
        user_id: i64,
        kind: ActivityKind,
        description: &str,
        meta: &ClientMeta,
    ) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO user_activities
                    (user_id, activity_type, description, ip_address, user_agent)
                VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(user_id)
        .bind(kind.as_str())
        .bind(description)
        .bind(&meta.ip)
        .bind(&meta.user_agent)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<ActivityRecord>> {
        let records = sqlx::query_as::<_, ActivityRecord>(&format!(
            "{SELECT_COLUMNS} WHERE user_id = $1 ORDER BY timestamp DESC LIMIT $2"
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn page(
        &self,
        user_id: i64,
        page: i64,
        size: i64,
    ) -> Result<(Vec<ActivityRecord>, i64)> {
        let records = sqlx::query_as::<_, ActivityRecord>(&format!(
            "{SELECT_COLUMNS} WHERE user_id = $1 ORDER BY timestamp DESC
                LIMIT $2 OFFSET $3"
        ))
        .bind(user_id)
        .bind(size)
        .bind(page * size)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM user_activities WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok((records, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[sqlx::test]
    async fn test_append_then_page(pool: PgPool) {
        let user_id: i64 = sqlx::query_scalar(
            r#"INSERT INTO users (username, email, password_hash)
                VALUES ('alice', 'alice@example.com', '$argon2id$stub')
                RETURNING id"#,
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        let store = PgActivityStore::new(pool);
        let meta = ClientMeta {
            ip: Some("127.0.0.1".into()),
            user_agent: Some("test-agent".into()),
        };

        for i in 0..15 {
            store
                .append(
                    user_id,
                    ActivityKind::Login,
                    &format!("login {i}"),
                    &meta,
                )
                .await
                .unwrap();
        }

        let recent = store.recent(user_id, 10).await.unwrap();
        assert_eq!(recent.len(), 10);
        assert_eq!(recent[0].kind, ActivityKind::Login);
        assert_eq!(recent[0].ip_address.as_deref(), Some("127.0.0.1"));

        let (items, total) = store.page(user_id, 1, 10).await.unwrap();
        assert_eq!(items.len(), 5);
        assert_eq!(total, 15);
    }
}
