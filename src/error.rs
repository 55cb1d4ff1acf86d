//! Error handler for gatehouse.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::mail::MailError;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Field a uniqueness conflict was raised on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conflict {
    Username,
    Email,
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Conflict::Username => write!(f, "Username is already taken"),
            Conflict::Email => write!(f, "Email is already in use"),
        }
    }
}

/// One-time token kind, used to word auth failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OneTimeToken {
    Verification,
    Reset,
}

impl std::fmt::Display for OneTimeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            OneTimeToken::Verification => write!(f, "verification"),
            OneTimeToken::Reset => write!(f, "reset"),
        }
    }
}

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Json(#[from] JsonRejection),

    #[error("{0}")]
    Conflict(Conflict),

    #[error("User not found")]
    NotFound,

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Email is not verified")]
    EmailNotVerified,

    #[error("Account is disabled")]
    AccountDisabled,

    #[error("Invalid {0} token")]
    InvalidOneTimeToken(OneTimeToken),

    #[error("The {0} token has expired")]
    ExpiredOneTimeToken(OneTimeToken),

    #[error("Invalid 2FA code")]
    InvalidTwoFactorCode,

    #[error("Current password is incorrect")]
    WrongPassword,

    #[error("Admins cannot delete their own account through this endpoint")]
    AdminSelfDelete,

    #[error("Admins should update their own account through the user profile endpoint")]
    AdminSelfUpdate,

    #[error("failed to enqueue mail: {0}")]
    Mail(#[from] MailError),

    #[error("SQL request failed: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("internal server error, {details}")]
    Internal { details: String },

    #[error("invalid 'Authorization' header")]
    Unauthorized,

    #[error("insufficient permissions")]
    Forbidden,
}

impl ServerError {
    pub fn internal(details: impl ToString) -> Self {
        Self::Internal {
            details: details.to_string(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ServerError::NotFound => StatusCode::NOT_FOUND,
            ServerError::Unauthorized => StatusCode::UNAUTHORIZED,
            ServerError::Forbidden => StatusCode::FORBIDDEN,
            ServerError::Sql(_) | ServerError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Structure for `{"message": …}` bodies, also used by success responses.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ServerError::Validation(errors) => first_validation_message(errors),
            ServerError::Json(rejection) => rejection.body_text(),
            ServerError::Sql(err) => {
                tracing::error!(error = %err, "SQL request failed");
                "Internal server error".to_owned()
            },
            ServerError::Internal { details } => {
                tracing::error!(%details, "server returned 500 status");
                "Internal server error".to_owned()
            },
            _ => self.to_string(),
        };

        (status, Json(MessageResponse::new(message))).into_response()
    }
}

fn first_validation_message(errors: &ValidationErrors) -> String {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, issues)| {
            issues.iter().map(move |issue| match &issue.message {
                Some(message) => message.to_string(),
                None => format!("Invalid value for '{field}'"),
            })
        })
        .next()
        .unwrap_or_else(|| "Invalid request".to_owned())
}
