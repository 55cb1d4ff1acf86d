//! Middlewares for routes.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;

use crate::AppState;
use crate::error::ServerError;
use crate::token::Claims;
use crate::user::{Account, Role};

const BEARER: &str = "Bearer ";

/// The authenticated principal attached to every protected request: the
/// verified claims plus the live account row behind them, so deleted or
/// disabled accounts lose access the moment the row changes.
#[derive(Clone)]
pub struct CurrentUser {
    pub account: Account,
    pub claims: Claims,
}

impl CurrentUser {
    pub fn is_self(&self, target_id: i64) -> bool {
        self.account.id == target_id
    }
}

/// Custom middleware for authentication.
pub async fn authenticate(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix(BEARER))
        .ok_or(ServerError::Unauthorized)?;

    let claims = state
        .tokens
        .decode(token)
        .map_err(|_| ServerError::Unauthorized)?;

    let account = state
        .accounts
        .find_by_id(claims.sub)
        .await?
        .ok_or(ServerError::Unauthorized)?;

    if !account.enabled {
        return Err(ServerError::Unauthorized);
    }

    req.extensions_mut().insert(CurrentUser { account, claims });
    Ok(next.run(req).await)
}

/// Admin endpoints require the ADMIN grant.
pub fn require_admin(user: &CurrentUser) -> Result<(), ServerError> {
    if user.account.has_role(Role::Admin) {
        Ok(())
    } else {
        Err(ServerError::Forbidden)
    }
}

/// User-scoped reads are open to the subject and to admins.
pub fn require_admin_or_self(
    user: &CurrentUser,
    target_id: i64,
) -> Result<(), ServerError> {
    if user.account.has_role(Role::Admin) || user.is_self(target_id) {
        Ok(())
    } else {
        Err(ServerError::Forbidden)
    }
}
