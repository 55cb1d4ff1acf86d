//! Self-service registration.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::{MessageResponse, Result};
use crate::router::Valid;
use crate::user::{NewAccount, RegisterOutcome};

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Body {
    #[validate(length(
        min = 2,
        max = 50,
        message = "Username must be 2 to 50 characters long."
    ))]
    pub username: String,
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required."))]
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub roles: Option<Vec<String>>,
}

/// Handler to register an account.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<(StatusCode, Json<MessageResponse>)> {
    let outcome = state
        .account_service()
        .register(NewAccount {
            username: body.username,
            email: body.email,
            password: body.password,
            first_name: body.first_name,
            last_name: body.last_name,
            roles: body.roles,
        })
        .await?;

    Ok(match outcome {
        RegisterOutcome::Registered => (
            StatusCode::OK,
            Json(MessageResponse::new(
                "User registered successfully! Please check your email to verify your account.",
            )),
        ),
        RegisterOutcome::MailFailed => (
            StatusCode::BAD_REQUEST,
            Json(MessageResponse::new(
                "User registered but failed to send verification email.",
            )),
        ),
    })
}
