mod memory;
mod repository;
mod service;

pub use memory::*;
pub use repository::*;
pub use service::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Named authorization grant. Exactly these three exist, seeded once.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum Role {
    #[serde(rename = "ROLE_USER")]
    User,
    #[serde(rename = "ROLE_MODERATOR")]
    Moderator,
    #[serde(rename = "ROLE_ADMIN")]
    Admin,
}

impl Role {
    /// Name as persisted and as emitted on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "ROLE_USER",
            Role::Moderator => "ROLE_MODERATOR",
            Role::Admin => "ROLE_ADMIN",
        }
    }

    /// Map a self-registration role request. Only "admin" and "mod" are
    /// recognized; anything else, "moderator" included, falls back to USER.
    pub fn from_registration_name(name: &str) -> Self {
        match name {
            "admin" => Role::Admin,
            "mod" => Role::Moderator,
            _ => Role::User,
        }
    }

    /// Map a role name from the administrative vocabulary. Unknown names
    /// coerce to USER rather than failing.
    pub fn from_admin_name(name: &str) -> Self {
        match name {
            "ROLE_ADMIN" => Role::Admin,
            "ROLE_MODERATOR" => Role::Moderator,
            _ => Role::User,
        }
    }

    /// Normalize a requested set: dedup, and never leave it empty.
    pub fn normalize(mut roles: Vec<Role>) -> Vec<Role> {
        roles.sort_by_key(Role::as_str);
        roles.dedup();
        if roles.is_empty() {
            roles.push(Role::User);
        }
        roles
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Account as saved on database. `id == 0` marks a not-yet-persisted row.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub enabled: bool,
    pub email_verified: bool,
    pub two_factor_enabled: bool,
    #[serde(skip)]
    pub two_factor_secret: Option<String>,
    #[serde(skip)]
    pub verification_token: Option<String>,
    #[serde(skip)]
    pub verification_token_expiry: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub reset_token: Option<String>,
    #[serde(skip)]
    pub reset_token_expiry: Option<DateTime<Utc>>,
    #[sqlx(json)]
    pub roles: Vec<Role>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            id: 0,
            username: String::default(),
            email: String::default(),
            password_hash: String::default(),
            first_name: None,
            last_name: None,
            enabled: true,
            email_verified: false,
            two_factor_enabled: false,
            two_factor_secret: None,
            verification_token: None,
            verification_token_expiry: None,
            reset_token: None,
            reset_token_expiry: None,
            roles: vec![Role::User],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

impl Account {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }
}

/// Real counters backing the administrative dashboard.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStats {
    pub total_users: i64,
    pub active_users: i64,
    pub verified_users: i64,
    pub admins: i64,
    pub moderators: i64,
    pub users: i64,
}

/// Persistence capability consumed by the services. Backed by PostgreSQL in
/// production and by an in-memory table in the test suite.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<Option<Account>>;
    async fn find_by_username(&self, username: &str)
    -> Result<Option<Account>>;
    /// Email lookups compare case-insensitively.
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>>;
    async fn find_by_verification_token(
        &self,
        token: &str,
    ) -> Result<Option<Account>>;
    async fn find_by_reset_token(&self, token: &str)
    -> Result<Option<Account>>;

    async fn exists_by_username(&self, username: &str) -> Result<bool>;
    async fn exists_by_email(&self, email: &str) -> Result<bool>;

    /// Upsert by id: `id == 0` inserts and assigns, anything else updates.
    /// Uniqueness races surface as [`crate::error::ServerError::Conflict`].
    async fn save(&self, account: Account) -> Result<Account>;

    /// Remove an account; its activity records cascade away with it.
    async fn delete(&self, id: i64) -> Result<()>;

    async fn list_all(&self) -> Result<Vec<Account>>;
    async fn count(&self) -> Result<i64>;
    async fn stats(&self) -> Result<AccountStats>;
}
