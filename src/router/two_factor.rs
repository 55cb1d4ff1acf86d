//! Enable and disable the account second factor.

use axum::extract::State;
use axum::{Extension, Json};

use crate::AppState;
use crate::activity::ClientMeta;
use crate::auth::TwoFactorSetup;
use crate::error::{MessageResponse, Result};
use crate::middleware::CurrentUser;

/// Handler to provision a second-factor secret for the current account.
pub async fn enable(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    meta: ClientMeta,
) -> Result<Json<TwoFactorSetup>> {
    let setup = state
        .auth_service()
        .enable_two_factor(&user.account, &meta)
        .await?;
    Ok(Json(setup))
}

/// Handler to drop the second factor from the current account.
pub async fn disable(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    meta: ClientMeta,
) -> Result<Json<MessageResponse>> {
    state
        .auth_service()
        .disable_two_factor(&user.account, &meta)
        .await?;
    Ok(Json(MessageResponse::new(
        "Two-factor authentication disabled successfully.",
    )))
}
