//! Login and the second-factor challenge handoff.

use axum::Json;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::activity::ClientMeta;
use crate::auth::LoginOutcome;
use crate::error::Result;
use crate::router::Valid;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    #[validate(length(min = 1, message = "Username is required."))]
    pub username: String,
    #[validate(length(min = 1, message = "Password is required."))]
    pub password: String,
}

/// Handler to log in. Either a full session or a second-factor challenge
/// comes back; the challenge carries no token.
pub async fn handler(
    State(state): State<AppState>,
    meta: ClientMeta,
    Valid(body): Valid<Body>,
) -> Result<Response> {
    let outcome = state
        .auth_service()
        .login(&body.username, &body.password, &meta)
        .await?;

    Ok(match outcome {
        LoginOutcome::Session(session) => Json(session).into_response(),
        LoginOutcome::Challenge(challenge) => {
            Json(challenge).into_response()
        },
    })
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorBody {
    pub user_id: i64,
    #[validate(length(equal = 6, message = "Code must be 6 digits."))]
    pub code: String,
}

/// Handler to redeem a pending second-factor code.
pub async fn verify_two_factor(
    State(state): State<AppState>,
    meta: ClientMeta,
    Valid(body): Valid<TwoFactorBody>,
) -> Result<Response> {
    let session = state
        .auth_service()
        .verify_two_factor(body.user_id, &body.code, &meta)
        .await?;

    Ok(Json(session).into_response())
}
