//! Email verification redemption and resend.

use axum::Json;
use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::{MessageResponse, Result};
use crate::router::Valid;

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

/// Handler to redeem a verification token from the mailed link.
pub async fn verify(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<MessageResponse>> {
    state.account_service().verify_email(&query.token).await?;
    Ok(Json(MessageResponse::new("Email verified successfully!")))
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ResendBody {
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
}

/// Handler to resend the verification mail. The response never discloses
/// whether the address is registered.
pub async fn resend(
    State(state): State<AppState>,
    Valid(body): Valid<ResendBody>,
) -> Result<Json<MessageResponse>> {
    state
        .account_service()
        .resend_verification(&body.email)
        .await?;
    Ok(Json(MessageResponse::new(
        "If your email is registered, you will receive a verification email.",
    )))
}
