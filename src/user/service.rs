//! Account lifecycle: registration, verification, updates, deletion.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Deserialize;

use crate::activity::{ActivityKind, ActivityLog, ClientMeta};
use crate::config::Configuration;
use crate::crypto::{PasswordHasher, TokenMint};
use crate::error::{Conflict, OneTimeToken, Result, ServerError};
use crate::mail::{MailSink, Template, TemplateParams};
use crate::user::{Account, AccountStore, Role};

/// Verification tokens live one day.
const VERIFICATION_TOKEN_TTL_HOURS: i64 = 24;

/// Input for both self-registration and administrative creation.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub roles: Option<Vec<String>>,
}

/// Self-registration keeps the account even when the verification mail
/// cannot be enqueued; the caller words the two outcomes differently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered,
    MailFailed,
}

/// Administrative patch. Absent fields stay untouched; unknown JSON keys
/// are ignored rather than rejected.
#[derive(Clone, Debug, Default, Deserialize, validator::Validate)]
#[serde(rename_all = "camelCase")]
pub struct AccountPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[validate(email(message = "Email must be formatted."))]
    pub email: Option<String>,
    pub password: Option<String>,
    /// Replaces the whole role set when present and non-empty.
    pub roles: Option<Vec<String>>,
    pub enabled: Option<bool>,
    pub email_verified: Option<bool>,
}

/// Self-service patch: only the profile fields.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
}

/// Account manager.
#[derive(Clone)]
pub struct AccountService {
    accounts: Arc<dyn AccountStore>,
    activity: ActivityLog,
    mail: Arc<dyn MailSink>,
    hasher: Arc<PasswordHasher>,
    config: Arc<Configuration>,
}

impl AccountService {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        activity: ActivityLog,
        mail: Arc<dyn MailSink>,
        hasher: Arc<PasswordHasher>,
        config: Arc<Configuration>,
    ) -> Self {
        Self {
            accounts,
            activity,
            mail,
            hasher,
            config,
        }
    }

    async fn check_unique(&self, username: &str, email: &str) -> Result<()> {
        if self.accounts.exists_by_username(username).await? {
            return Err(ServerError::Conflict(Conflict::Username));
        }
        if self.accounts.exists_by_email(email).await? {
            return Err(ServerError::Conflict(Conflict::Email));
        }
        Ok(())
    }

    fn verification_link(&self, token: &str) -> String {
        format!("{}/verify-email?token={token}", self.config.url)
    }

    async fn send_verification_mail(&self, account: &Account) -> Result<()> {
        let Some(token) = &account.verification_token else {
            return Ok(());
        };

        self.mail
            .deliver(
                &account.email,
                Template::Verification,
                TemplateParams {
                    username: Some(account.username.clone()),
                    link: Some(self.verification_link(token)),
                    expires_in: Some("24 hours".into()),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Self-registration: provisional account, verification token, mail.
    pub async fn register(&self, new: NewAccount) -> Result<RegisterOutcome> {
        self.check_unique(&new.username, &new.email).await?;

        let roles = match &new.roles {
            Some(names) if !names.is_empty() => Role::normalize(
                names
                    .iter()
                    .map(|name| Role::from_registration_name(name))
                    .collect(),
            ),
            _ => vec![Role::User],
        };

        let account = Account {
            username: new.username,
            email: new.email,
            password_hash: self
                .hasher
                .hash(&new.password)
                .map_err(|err| ServerError::internal(err))?,
            first_name: new.first_name,
            last_name: new.last_name,
            enabled: true,
            email_verified: false,
            verification_token: Some(TokenMint::opaque_token()),
            verification_token_expiry: Some(
                Utc::now() + Duration::hours(VERIFICATION_TOKEN_TTL_HOURS),
            ),
            roles,
            ..Default::default()
        };
        let account = self.accounts.save(account).await?;

        // The account is never rolled back on mail failure; the user can
        // ask for the verification mail again.
        match self.send_verification_mail(&account).await {
            Ok(()) => Ok(RegisterOutcome::Registered),
            Err(err) => {
                tracing::warn!(
                    user_id = account.id,
                    error = %err,
                    "registration kept, verification mail failed"
                );
                Ok(RegisterOutcome::MailFailed)
            },
        }
    }

    /// Redeem a verification token. The token is single-use: redemption
    /// clears it, so a second attempt finds no account.
    pub async fn verify_email(&self, token: &str) -> Result<()> {
        let Some(mut account) =
            self.accounts.find_by_verification_token(token).await?
        else {
            return Err(ServerError::InvalidOneTimeToken(
                OneTimeToken::Verification,
            ));
        };

        match account.verification_token_expiry {
            Some(expiry) if expiry > Utc::now() => {},
            _ => {
                return Err(ServerError::ExpiredOneTimeToken(
                    OneTimeToken::Verification,
                ));
            },
        }

        account.email_verified = true;
        account.verification_token = None;
        account.verification_token_expiry = None;
        self.accounts.save(account).await?;

        Ok(())
    }

    /// Mint a fresh verification token and resend the mail. The outcome is
    /// indistinguishable whether the address is unknown, already verified,
    /// or pending, so account existence is not disclosed.
    pub async fn resend_verification(&self, email: &str) -> Result<()> {
        let Some(mut account) = self.accounts.find_by_email(email).await?
        else {
            return Ok(());
        };

        if account.email_verified {
            return Ok(());
        }

        account.verification_token = Some(TokenMint::opaque_token());
        account.verification_token_expiry =
            Some(Utc::now() + Duration::hours(VERIFICATION_TOKEN_TTL_HOURS));
        let account = self.accounts.save(account).await?;

        if let Err(err) = self.send_verification_mail(&account).await {
            tracing::warn!(
                user_id = account.id,
                error = %err,
                "failed to resend verification mail"
            );
        }

        Ok(())
    }

    /// Administrative creation: pre-verified, enabled, admin role
    /// vocabulary.
    pub async fn admin_create(
        &self,
        actor: &Account,
        new: NewAccount,
        meta: &ClientMeta,
    ) -> Result<Account> {
        self.check_unique(&new.username, &new.email).await?;

        let roles = match &new.roles {
            Some(names) if !names.is_empty() => Role::normalize(
                names
                    .iter()
                    .map(|name| Role::from_admin_name(name))
                    .collect(),
            ),
            _ => vec![Role::User],
        };

        let account = Account {
            username: new.username,
            email: new.email,
            password_hash: self
                .hasher
                .hash(&new.password)
                .map_err(|err| ServerError::internal(err))?,
            first_name: new.first_name,
            last_name: new.last_name,
            enabled: true,
            email_verified: true,
            roles,
            ..Default::default()
        };
        let account = self.accounts.save(account).await?;

        self.activity
            .record(
                actor.id,
                ActivityKind::AdminAction,
                &format!("Admin created new user: {}", account.username),
                meta,
            )
            .await;

        Ok(account)
    }

    /// Administrative patch over another account. Admins edit their own
    /// account through the profile path only.
    pub async fn admin_update(
        &self,
        actor: &Account,
        target_id: i64,
        patch: AccountPatch,
        meta: &ClientMeta,
    ) -> Result<Account> {
        if actor.id == target_id {
            return Err(ServerError::AdminSelfUpdate);
        }

        let Some(mut account) = self.accounts.find_by_id(target_id).await?
        else {
            return Err(ServerError::NotFound);
        };

        if let Some(first_name) = patch.first_name {
            account.first_name = Some(first_name);
        }
        if let Some(last_name) = patch.last_name {
            account.last_name = Some(last_name);
        }
        if let Some(email) = patch.email {
            self.apply_email(&mut account, email).await?;
        }
        if let Some(password) = patch.password.filter(|p| !p.is_empty()) {
            account.password_hash = self
                .hasher
                .hash(&password)
                .map_err(|err| ServerError::internal(err))?;
        }
        if let Some(names) = patch.roles.filter(|r| !r.is_empty()) {
            account.roles = Role::normalize(
                names
                    .iter()
                    .map(|name| Role::from_admin_name(name))
                    .collect(),
            );
        }
        if let Some(enabled) = patch.enabled {
            account.enabled = enabled;
        }
        if let Some(email_verified) = patch.email_verified {
            account.email_verified = email_verified;
        }

        let account = self.accounts.save(account).await?;

        self.activity
            .record(
                actor.id,
                ActivityKind::AdminAction,
                &format!("Admin updated user: {}", account.username),
                meta,
            )
            .await;

        if let Err(err) = self
            .mail
            .deliver(
                &account.email,
                Template::AccountUpdate,
                TemplateParams {
                    username: Some(account.username.clone()),
                    ..Default::default()
                },
            )
            .await
        {
            tracing::warn!(
                user_id = account.id,
                error = %err,
                "failed to enqueue account-update mail"
            );
        }

        Ok(account)
    }

    /// Self-service profile patch.
    pub async fn update_profile(
        &self,
        actor: &Account,
        patch: ProfilePatch,
        meta: &ClientMeta,
    ) -> Result<Account> {
        let Some(mut account) = self.accounts.find_by_id(actor.id).await?
        else {
            return Err(ServerError::NotFound);
        };

        if let Some(first_name) = patch.first_name {
            account.first_name = Some(first_name);
        }
        if let Some(last_name) = patch.last_name {
            account.last_name = Some(last_name);
        }
        if let Some(email) = patch.email {
            self.apply_email(&mut account, email).await?;
        }

        let account = self.accounts.save(account).await?;

        self.activity
            .record(
                account.id,
                ActivityKind::ProfileUpdate,
                "User updated their profile",
                meta,
            )
            .await;

        Ok(account)
    }

    async fn apply_email(
        &self,
        account: &mut Account,
        email: String,
    ) -> Result<()> {
        let changed =
            !email.eq_ignore_ascii_case(&account.email);
        if changed && self.accounts.exists_by_email(&email).await? {
            return Err(ServerError::Conflict(Conflict::Email));
        }
        account.email = email;
        Ok(())
    }

    /// Change the actor's own password; the current one must verify first.
    pub async fn change_password(
        &self,
        actor: &Account,
        current: &str,
        new: &str,
        meta: &ClientMeta,
    ) -> Result<()> {
        let Some(mut account) = self.accounts.find_by_id(actor.id).await?
        else {
            return Err(ServerError::NotFound);
        };

        if !self.hasher.verify(current, &account.password_hash) {
            return Err(ServerError::WrongPassword);
        }

        account.password_hash = self
            .hasher
            .hash(new)
            .map_err(|err| ServerError::internal(err))?;
        self.accounts.save(account).await?;

        self.activity
            .record(
                actor.id,
                ActivityKind::PasswordChange,
                "User changed their password",
                meta,
            )
            .await;

        Ok(())
    }

    /// Administrative deletion. The notification goes out first, while the
    /// address still exists; its failure never blocks the removal.
    pub async fn delete(
        &self,
        actor: &Account,
        target_id: i64,
        meta: &ClientMeta,
    ) -> Result<()> {
        if actor.id == target_id {
            return Err(ServerError::AdminSelfDelete);
        }

        let Some(account) = self.accounts.find_by_id(target_id).await? else {
            return Err(ServerError::NotFound);
        };

        if let Err(err) = self
            .mail
            .deliver(
                &account.email,
                Template::AccountDeletion,
                TemplateParams {
                    username: Some(account.username.clone()),
                    ..Default::default()
                },
            )
            .await
        {
            tracing::warn!(
                user_id = account.id,
                error = %err,
                "failed to enqueue account-deletion mail"
            );
        }

        self.activity
            .record(
                actor.id,
                ActivityKind::AdminAction,
                &format!("Admin deleted user: {}", account.username),
                meta,
            )
            .await;

        self.accounts.delete(target_id).await
    }
}
