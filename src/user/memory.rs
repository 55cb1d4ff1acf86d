//! In-memory [`AccountStore`], one mutex around the whole table so the
//! uniqueness checks and id assignment are serialized like the database
//! constraints they stand in for.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{Conflict, Result, ServerError};
use crate::user::{Account, AccountStats, AccountStore, Role};

#[derive(Default)]
struct Table {
    next_id: i64,
    rows: BTreeMap<i64, Account>,
}

#[derive(Default)]
pub struct MemoryAccountStore {
    table: Mutex<Table>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn find_where(
        &self,
        predicate: impl Fn(&Account) -> bool,
    ) -> Option<Account> {
        self.table
            .lock()
            .unwrap()
            .rows
            .values()
            .find(|account| predicate(account))
            .cloned()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<Account>> {
        Ok(self.table.lock().unwrap().rows.get(&id).cloned())
    }

    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Account>> {
        Ok(self.find_where(|a| a.username == username))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        let email = email.to_lowercase();
        Ok(self.find_where(|a| a.email.to_lowercase() == email))
    }

    async fn find_by_verification_token(
        &self,
        token: &str,
    ) -> Result<Option<Account>> {
        Ok(self.find_where(|a| {
            a.verification_token.as_deref() == Some(token)
        }))
    }

    async fn find_by_reset_token(
        &self,
        token: &str,
    ) -> Result<Option<Account>> {
        Ok(self.find_where(|a| a.reset_token.as_deref() == Some(token)))
    }

    async fn exists_by_username(&self, username: &str) -> Result<bool> {
        Ok(self.find_where(|a| a.username == username).is_some())
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool> {
        let email = email.to_lowercase();
        Ok(self
            .find_where(|a| a.email.to_lowercase() == email)
            .is_some())
    }

    async fn save(&self, mut account: Account) -> Result<Account> {
        let mut table = self.table.lock().unwrap();

        for other in table.rows.values() {
            if other.id == account.id {
                continue;
            }
            if other.username == account.username {
                return Err(ServerError::Conflict(Conflict::Username));
            }
            if other.email.to_lowercase() == account.email.to_lowercase() {
                return Err(ServerError::Conflict(Conflict::Email));
            }
        }

        account.updated_at = Utc::now();
        account.roles = Role::normalize(account.roles);

        if account.id == 0 {
            table.next_id += 1;
            account.id = table.next_id;
        }
        table.rows.insert(account.id, account.clone());

        Ok(account)
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.table.lock().unwrap().rows.remove(&id);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Account>> {
        Ok(self.table.lock().unwrap().rows.values().cloned().collect())
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.table.lock().unwrap().rows.len() as i64)
    }

    async fn stats(&self) -> Result<AccountStats> {
        let table = self.table.lock().unwrap();
        let mut stats = AccountStats::default();

        for account in table.rows.values() {
            stats.total_users += 1;
            if account.enabled {
                stats.active_users += 1;
            }
            if account.email_verified {
                stats.verified_users += 1;
            }
            if account.has_role(Role::Admin) {
                stats.admins += 1;
            }
            if account.has_role(Role::Moderator) {
                stats.moderators += 1;
            }
            if account.has_role(Role::User) {
                stats.users += 1;
            }
        }

        Ok(stats)
    }
}
