//! Login, second-factor challenges, password recovery and session issuance.

mod challenge;

pub use challenge::*;

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{Duration, Utc};
use serde::Serialize;

use crate::activity::{ActivityKind, ActivityLog, ClientMeta};
use crate::config::Configuration;
use crate::crypto::{PasswordHasher, TokenMint};
use crate::error::{OneTimeToken, Result, ServerError};
use crate::mail::{MailSink, Template, TemplateParams};
use crate::token::SessionTokenCodec;
use crate::totp;
use crate::user::{Account, AccountStore, Role};

/// Reset tokens live one hour.
const RESET_TOKEN_TTL_HOURS: i64 = 1;
/// Second-factor codes are six digits.
const TWO_FACTOR_DIGITS: u32 = 6;
/// Second-factor secrets are 160-bit.
const TWO_FACTOR_SECRET_BYTES: usize = 20;

/// Everything the frontend needs once a session exists.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JwtResponse {
    pub token: String,
    pub id: i64,
    pub username: String,
    pub email: String,
    pub roles: Vec<Role>,
    pub email_verified: bool,
    pub two_factor_enabled: bool,
    pub two_factor_passed: bool,
}

/// Returned instead of a session when the account requires a second factor.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorChallenge {
    pub user_id: i64,
    pub username: String,
    pub requires_two_factor: bool,
}

/// Outcome of a correct username/password pair.
#[derive(Clone, Debug)]
pub enum LoginOutcome {
    Session(JwtResponse),
    Challenge(TwoFactorChallenge),
}

/// Secret material handed back when the second factor is enabled.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorSetup {
    pub secret: String,
    pub qr_code_url: String,
}

/// Credential verification pipeline coupled to session-token issuance.
#[derive(Clone)]
pub struct AuthService {
    accounts: Arc<dyn AccountStore>,
    activity: ActivityLog,
    mail: Arc<dyn MailSink>,
    hasher: Arc<PasswordHasher>,
    tokens: SessionTokenCodec,
    challenges: Arc<dyn ChallengeStore>,
    config: Arc<Configuration>,
}

impl AuthService {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        activity: ActivityLog,
        mail: Arc<dyn MailSink>,
        hasher: Arc<PasswordHasher>,
        tokens: SessionTokenCodec,
        challenges: Arc<dyn ChallengeStore>,
        config: Arc<Configuration>,
    ) -> Self {
        Self {
            accounts,
            activity,
            mail,
            hasher,
            tokens,
            challenges,
            config,
        }
    }

    fn session(
        &self,
        account: &Account,
        two_factor_passed: bool,
    ) -> Result<JwtResponse> {
        let token = self
            .tokens
            .issue(account)
            .map_err(|err| ServerError::internal(err))?;

        Ok(JwtResponse {
            token,
            id: account.id,
            username: account.username.clone(),
            email: account.email.clone(),
            roles: account.roles.clone(),
            email_verified: account.email_verified,
            two_factor_enabled: account.two_factor_enabled,
            two_factor_passed,
        })
    }

    /// Verify a username/password pair. Unknown usernames and wrong
    /// passwords are indistinguishable from the outside.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        meta: &ClientMeta,
    ) -> Result<LoginOutcome> {
        let Some(account) = self.accounts.find_by_username(username).await?
        else {
            return Err(ServerError::InvalidCredentials);
        };

        if !self.hasher.verify(password, &account.password_hash) {
            return Err(ServerError::InvalidCredentials);
        }

        if !account.enabled {
            return Err(ServerError::AccountDisabled);
        }

        if !account.email_verified {
            return Err(ServerError::EmailNotVerified);
        }

        if account.two_factor_enabled {
            let code = TokenMint::numeric_code(TWO_FACTOR_DIGITS);
            self.challenges.put(account.id, code.clone()).await;

            self.mail
                .deliver(
                    &account.email,
                    Template::TwoFactor,
                    TemplateParams {
                        username: Some(account.username.clone()),
                        code: Some(code),
                        expires_in: Some("5 minutes".into()),
                        ..Default::default()
                    },
                )
                .await?;

            return Ok(LoginOutcome::Challenge(TwoFactorChallenge {
                user_id: account.id,
                username: account.username,
                requires_two_factor: true,
            }));
        }

        self.activity
            .record(account.id, ActivityKind::Login, "User logged in", meta)
            .await;

        Ok(LoginOutcome::Session(self.session(&account, false)?))
    }

    /// Redeem a pending second-factor code, or a client-computed TOTP when
    /// the account carries a provisioned secret.
    pub async fn verify_two_factor(
        &self,
        user_id: i64,
        code: &str,
        meta: &ClientMeta,
    ) -> Result<JwtResponse> {
        let Some(account) = self.accounts.find_by_id(user_id).await? else {
            return Err(ServerError::NotFound);
        };

        let mut passed = self.challenges.redeem(user_id, code).await;

        if !passed {
            if let Some(secret) = &account.two_factor_secret {
                let raw = BASE64
                    .decode(secret)
                    .map_err(|err| ServerError::internal(err))?;
                passed = totp::verify(&raw, code);
            }
        }

        if !passed {
            return Err(ServerError::InvalidTwoFactorCode);
        }

        self.activity
            .record(account.id, ActivityKind::Login, "User logged in", meta)
            .await;

        self.session(&account, true)
    }

    /// Start password recovery. The response is identical whether or not
    /// the address maps to an account, and a mail enqueue failure is logged
    /// rather than surfaced so that rule holds.
    pub async fn forgot_password(&self, email: &str) -> Result<()> {
        let Some(mut account) = self.accounts.find_by_email(email).await?
        else {
            return Ok(());
        };

        let token = TokenMint::opaque_token();
        account.reset_token = Some(token.clone());
        account.reset_token_expiry =
            Some(Utc::now() + Duration::hours(RESET_TOKEN_TTL_HOURS));
        let account = self.accounts.save(account).await?;

        let link = format!(
            "{}/reset-password?token={token}",
            self.config.frontend_url
        );
        if let Err(err) = self
            .mail
            .deliver(
                &account.email,
                Template::PasswordReset,
                TemplateParams {
                    username: Some(account.username.clone()),
                    link: Some(link),
                    expires_in: Some("1 hour".into()),
                    ..Default::default()
                },
            )
            .await
        {
            tracing::warn!(
                user_id = account.id,
                error = %err,
                "failed to enqueue password-reset mail"
            );
        }

        Ok(())
    }

    async fn account_by_reset_token(&self, token: &str) -> Result<Account> {
        let Some(account) = self.accounts.find_by_reset_token(token).await?
        else {
            return Err(ServerError::InvalidOneTimeToken(OneTimeToken::Reset));
        };

        match account.reset_token_expiry {
            Some(expiry) if expiry > Utc::now() => Ok(account),
            _ => Err(ServerError::ExpiredOneTimeToken(OneTimeToken::Reset)),
        }
    }

    /// Check a reset token without consuming it.
    pub async fn validate_reset_token(&self, token: &str) -> Result<()> {
        self.account_by_reset_token(token).await.map(|_| ())
    }

    /// Redeem a reset token: rehash, clear the token, notify.
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
        meta: &ClientMeta,
    ) -> Result<()> {
        let mut account = self.account_by_reset_token(token).await?;

        account.password_hash = self
            .hasher
            .hash(new_password)
            .map_err(|err| ServerError::internal(err))?;
        account.reset_token = None;
        account.reset_token_expiry = None;
        let account = self.accounts.save(account).await?;

        self.activity
            .record(
                account.id,
                ActivityKind::PasswordReset,
                "User reset their password via email",
                meta,
            )
            .await;

        if let Err(err) = self
            .mail
            .deliver(
                &account.email,
                Template::ResetConfirmation,
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
                "failed to enqueue reset-confirmation mail"
            );
        }

        Ok(())
    }

    /// Provision a second-factor secret for the actor.
    pub async fn enable_two_factor(
        &self,
        actor: &Account,
        meta: &ClientMeta,
    ) -> Result<TwoFactorSetup> {
        let raw = TokenMint::secret_bytes(TWO_FACTOR_SECRET_BYTES);
        let secret = BASE64.encode(&raw);

        let mut account = actor.clone();
        account.two_factor_secret = Some(secret.clone());
        account.two_factor_enabled = true;
        self.accounts.save(account).await?;

        self.activity
            .record(
                actor.id,
                ActivityKind::ProfileUpdate,
                "User enabled two-factor authentication",
                meta,
            )
            .await;

        let qr_code_url =
            totp::otpauth_url(&self.config.name, &actor.username, &raw);

        Ok(TwoFactorSetup {
            secret,
            qr_code_url,
        })
    }

    /// Drop the second factor from the actor's account.
    pub async fn disable_two_factor(
        &self,
        actor: &Account,
        meta: &ClientMeta,
    ) -> Result<()> {
        let mut account = actor.clone();
        account.two_factor_secret = None;
        account.two_factor_enabled = false;
        self.accounts.save(account).await?;

        self.activity
            .record(
                actor.id,
                ActivityKind::ProfileUpdate,
                "User disabled two-factor authentication",
                meta,
            )
            .await;

        Ok(())
    }
}
