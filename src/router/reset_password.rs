//! Password recovery: initiation, token validation, completion.

use axum::Json;
use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::activity::ClientMeta;
use crate::error::{MessageResponse, Result};
use crate::router::Valid;
use crate::router::verify_email::TokenQuery;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ForgotBody {
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
}

/// Handler to start password recovery. Identical response either way.
pub async fn forgot(
    State(state): State<AppState>,
    Valid(body): Valid<ForgotBody>,
) -> Result<Json<MessageResponse>> {
    state.auth_service().forgot_password(&body.email).await?;
    Ok(Json(MessageResponse::new(
        "If your email is registered, you will receive a password reset link.",
    )))
}

/// Handler to check a reset token before showing the form.
pub async fn validate(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<MessageResponse>> {
    state.auth_service().validate_reset_token(&query.token).await?;
    Ok(Json(MessageResponse::new("Valid reset token.")))
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ResetBody {
    #[validate(length(min = 1, message = "Token is required."))]
    pub token: String,
    #[validate(length(min = 1, message = "Password is required."))]
    pub new_password: String,
}

/// Handler to redeem a reset token.
pub async fn reset(
    State(state): State<AppState>,
    meta: ClientMeta,
    Valid(body): Valid<ResetBody>,
) -> Result<Json<MessageResponse>> {
    state
        .auth_service()
        .reset_password(&body.token, &body.new_password, &meta)
        .await?;
    Ok(Json(MessageResponse::new(
        "Password reset successfully! You can now log in with your new password.",
    )))
}
