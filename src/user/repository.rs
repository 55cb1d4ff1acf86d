//! Handle database requests for accounts.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::{Conflict, Result, ServerError};
use crate::user::{Account, AccountStats, AccountStore, Role};

#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    /// Create a new [`PgAccountStore`].
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn replace_roles(
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
        roles: &[Role],
    ) -> Result<()> {
        sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut **tx)
            .await?;

        let names: Vec<String> =
            roles.iter().map(|r| r.as_str().to_owned()).collect();
        sqlx::query(
            r#"INSERT INTO user_roles (user_id, role_id)
                SELECT $1, id FROM roles WHERE name = ANY($2)"#,
        )
        .bind(user_id)
        .bind(&names)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

/// Turn a unique-index violation into the conflict the caller can word;
/// anything else stays a database error.
fn map_unique_violation(err: sqlx::Error) -> ServerError {
    if let Some(db_err) = err.as_database_error() {
        if db_err.is_unique_violation() {
            let conflict = match db_err.constraint() {
                Some(name) if name.contains("email") => Conflict::Email,
                _ => Conflict::Username,
            };
            return ServerError::Conflict(conflict);
        }
    }
    ServerError::Sql(err)
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Id,
    Username,
    Email,
    VerificationToken,
    ResetToken,
}

impl Field {
    fn predicate(self) -> &'static str {
        match self {
            Field::Id => "u.id = $1",
            Field::Username => "u.username = $1",
            Field::Email => "LOWER(u.email) = LOWER($1)",
            Field::VerificationToken => "u.verification_token = $1",
            Field::ResetToken => "u.reset_token = $1",
        }
    }
}

fn select_query(field: Option<Field>) -> String {
    let predicate = match field {
        Some(field) => format!("WHERE {}", field.predicate()),
        None => String::default(),
    };

    format!(
        r#"SELECT
                u.id,
                u.username,
                u.email,
                u.password_hash,
                u.first_name,
                u.last_name,
                u.enabled,
                u.email_verified,
                u.two_factor_enabled,
                u.two_factor_secret,
                u.verification_token,
                u.verification_token_expiry,
                u.reset_token,
                u.reset_token_expiry,
                COALESCE(
                    JSONB_AGG(r.name) FILTER (WHERE r.name IS NOT NULL),
                    '[]'::jsonb
                ) AS roles,
                u.created_at,
                u.updated_at
            FROM users u
            LEFT JOIN user_roles ur ON ur.user_id = u.id
            LEFT JOIN roles r ON r.id = ur.role_id
            {predicate}
            GROUP BY u.id
            ORDER BY u.id"#
    )
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(&select_query(Some(Field::Id)))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }

    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Account>> {
        let account =
            sqlx::query_as::<_, Account>(&select_query(Some(Field::Username)))
                .bind(username)
                .fetch_optional(&self.pool)
                .await?;
        Ok(account)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        let account =
            sqlx::query_as::<_, Account>(&select_query(Some(Field::Email)))
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;
        Ok(account)
    }

    async fn find_by_verification_token(
        &self,
        token: &str,
    ) -> Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(&select_query(Some(
            Field::VerificationToken,
        )))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn find_by_reset_token(
        &self,
        token: &str,
    ) -> Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(&select_query(Some(
            Field::ResetToken,
        )))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn exists_by_username(&self, username: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM users WHERE username = $1)",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM users WHERE LOWER(email) = LOWER($1))",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn save(&self, mut account: Account) -> Result<Account> {
        let mut tx = self.pool.begin().await?;
        account.updated_at = Utc::now();
        account.roles = Role::normalize(account.roles);

        if account.id == 0 {
            let id: i64 = sqlx::query_scalar(
                r#"INSERT INTO users (username, email, password_hash,
                        first_name, last_name, enabled, email_verified,
                        two_factor_enabled, two_factor_secret,
                        verification_token, verification_token_expiry,
                        reset_token, reset_token_expiry, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                        $13, $14, $15)
                    RETURNING id"#,
            )
            .bind(&account.username)
            .bind(&account.email)
            .bind(&account.password_hash)
            .bind(&account.first_name)
            .bind(&account.last_name)
            .bind(account.enabled)
            .bind(account.email_verified)
            .bind(account.two_factor_enabled)
            .bind(&account.two_factor_secret)
            .bind(&account.verification_token)
            .bind(account.verification_token_expiry)
            .bind(&account.reset_token)
            .bind(account.reset_token_expiry)
            .bind(account.created_at)
            .bind(account.updated_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_unique_violation)?;

            account.id = id;
        } else {
            sqlx::query(
                r#"UPDATE users SET
                        username = $1, email = $2, password_hash = $3,
                        first_name = $4, last_name = $5, enabled = $6,
                        email_verified = $7, two_factor_enabled = $8,
                        two_factor_secret = $9, verification_token = $10,
                        verification_token_expiry = $11, reset_token = $12,
                        reset_token_expiry = $13, updated_at = $14
                    WHERE id = $15"#,
            )
            .bind(&account.username)
            .bind(&account.email)
            .bind(&account.password_hash)
            .bind(&account.first_name)
            .bind(&account.last_name)
            .bind(account.enabled)
            .bind(account.email_verified)
            .bind(account.two_factor_enabled)
            .bind(&account.two_factor_secret)
            .bind(&account.verification_token)
            .bind(account.verification_token_expiry)
            .bind(&account.reset_token)
            .bind(account.reset_token_expiry)
            .bind(account.updated_at)
            .bind(account.id)
            .execute(&mut *tx)
            .await
            .map_err(map_unique_violation)?;
        }

        Self::replace_roles(&mut tx, account.id, &account.roles).await?;
        tx.commit().await?;

        Ok(account)
    }

    async fn delete(&self, id: i64) -> Result<()> {
        // user_roles and user_activities rows cascade away.
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Account>> {
        let accounts = sqlx::query_as::<_, Account>(&select_query(None))
            .fetch_all(&self.pool)
            .await?;
        Ok(accounts)
    }

    async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn stats(&self) -> Result<AccountStats> {
        let (total_users, active_users, verified_users): (i64, i64, i64) =
            sqlx::query_as(
                r#"SELECT
                        COUNT(*),
                        COUNT(*) FILTER (WHERE enabled),
                        COUNT(*) FILTER (WHERE email_verified)
                    FROM users"#,
            )
            .fetch_one(&self.pool)
            .await?;

        let by_role: Vec<(String, i64)> = sqlx::query_as(
            r#"SELECT r.name, COUNT(*)
                FROM user_roles ur
                JOIN roles r ON r.id = ur.role_id
                GROUP BY r.name"#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = AccountStats {
            total_users,
            active_users,
            verified_users,
            ..Default::default()
        };
        for (name, count) in by_role {
            match Role::from_admin_name(&name) {
                Role::Admin => stats.admins = count,
                Role::Moderator => stats.moderators = count,
                Role::User => stats.users = count,
            }
        }

        Ok(stats)
    }
}
