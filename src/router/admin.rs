//! Administrative CRUD over accounts, plus real dashboard counters.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::activity::{ActivityKind, ClientMeta};
use crate::error::{MessageResponse, Result, ServerError};
use crate::middleware::{CurrentUser, require_admin};
use crate::router::Valid;
use crate::user::{Account, AccountPatch, AccountStats, NewAccount};

/// Handler to list every account.
pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    meta: ClientMeta,
) -> Result<Json<Vec<Account>>> {
    require_admin(&user)?;

    state
        .activity
        .record(
            user.account.id,
            ActivityKind::AdminAction,
            "Admin viewed all users",
            &meta,
        )
        .await;

    Ok(Json(state.accounts.list_all().await?))
}

/// Handler for one account by id.
pub async fn get_by_id(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
    meta: ClientMeta,
) -> Result<Json<Account>> {
    require_admin(&user)?;

    let account = state
        .accounts
        .find_by_id(id)
        .await?
        .ok_or(ServerError::NotFound)?;

    state
        .activity
        .record(
            user.account.id,
            ActivityKind::AdminAction,
            &format!("Admin viewed user details for user ID: {id}"),
            &meta,
        )
        .await;

    Ok(Json(account))
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateBody {
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

/// Handler to create a pre-verified account.
pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    meta: ClientMeta,
    Valid(body): Valid<CreateBody>,
) -> Result<Json<Account>> {
    require_admin(&user)?;

    let account = state
        .account_service()
        .admin_create(
            &user.account,
            NewAccount {
                username: body.username,
                email: body.email,
                password: body.password,
                first_name: body.first_name,
                last_name: body.last_name,
                roles: body.roles,
            },
            &meta,
        )
        .await?;

    Ok(Json(account))
}

/// Handler to patch another account.
pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
    meta: ClientMeta,
    Valid(patch): Valid<AccountPatch>,
) -> Result<Json<Account>> {
    require_admin(&user)?;

    let account = state
        .account_service()
        .admin_update(&user.account, id, patch, &meta)
        .await?;

    Ok(Json(account))
}

/// Handler to delete an account.
pub async fn delete(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
    meta: ClientMeta,
) -> Result<Json<MessageResponse>> {
    require_admin(&user)?;

    state
        .account_service()
        .delete(&user.account, id, &meta)
        .await?;

    Ok(Json(MessageResponse::new("User deleted successfully")))
}

/// Handler for the account counters.
pub async fn stats(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    meta: ClientMeta,
) -> Result<Json<AccountStats>> {
    require_admin(&user)?;

    state
        .activity
        .record(
            user.account.id,
            ActivityKind::AdminAction,
            "Admin viewed system statistics",
            &meta,
        )
        .await;

    Ok(Json(state.accounts.stats().await?))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::json;

    use crate::mail::Template;
    use crate::testing::{TestApp, make_request, state};
    use crate::user::{AccountStore, Role};
    use crate::*;

    async fn seed_admin(test: &TestApp) -> (user::Account, String) {
        let admin = test
            .seed("admin", "admin@example.com", "adminPw", vec![Role::Admin])
            .await;
        let token = test.token_for(&admin);
        (admin, token)
    }

    #[tokio::test]
    async fn test_create_is_pre_verified() {
        let test = state();
        let app = app(test.state.clone());
        let (_, token) = seed_admin(&test).await;

        let body = json!({
            "username": "bob",
            "email": "bob@example.com",
            "password": "bobPw",
            "roles": ["ROLE_MODERATOR"]
        });
        let response = make_request(
            app,
            Method::POST,
            "/api/admin/users",
            Some(&token),
            body.to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["emailVerified"], true);
        assert_eq!(parsed["roles"][0], "ROLE_MODERATOR");

        let stored = test
            .accounts
            .find_by_username("bob")
            .await
            .unwrap()
            .unwrap();
        // No verification token pending for admin-created accounts.
        assert!(stored.verification_token.is_none());
    }

    #[tokio::test]
    async fn test_update_refuses_self() {
        let test = state();
        let app = app(test.state.clone());
        let (admin, token) = seed_admin(&test).await;

        let response = make_request(
            app,
            Method::PUT,
            &format!("/api/admin/users/{}", admin.id),
            Some(&token),
            json!({"firstName": "Root"}).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_rules() {
        let test = state();
        let app = app(test.state.clone());
        let (admin, token) = seed_admin(&test).await;
        let alice = test
            .seed("alice", "alice@example.com", "p@ss", vec![Role::User])
            .await;

        // Admin cannot delete their own account.
        let response = make_request(
            app.clone(),
            Method::DELETE,
            &format!("/api/admin/users/{}", admin.id),
            Some(&token),
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Deleting someone else succeeds and queues the notification.
        let response = make_request(
            app.clone(),
            Method::DELETE,
            &format!("/api/admin/users/{}", alice.id),
            Some(&token),
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(test.accounts.find_by_id(alice.id).await.unwrap().is_none());

        let (template, _) = test.mailer.last_for("alice@example.com").unwrap();
        assert_eq!(template, Template::AccountDeletion);

        // Unknown target is a 404.
        let response = make_request(
            app,
            Method::DELETE,
            &format!("/api/admin/users/{}", alice.id),
            Some(&token),
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stats_are_live_counters() {
        let test = state();
        let app = app(test.state.clone());
        let (_, token) = seed_admin(&test).await;
        test.seed("alice", "alice@example.com", "p@ss", vec![Role::User])
            .await;
        let mut bob = test
            .seed("bob", "bob@example.com", "p@ss", vec![Role::User])
            .await;
        bob.enabled = false;
        bob.email_verified = false;
        test.accounts.save(bob).await.unwrap();

        let response = make_request(
            app,
            Method::GET,
            "/api/admin/stats",
            Some(&token),
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["totalUsers"], 3);
        assert_eq!(parsed["activeUsers"], 2);
        assert_eq!(parsed["verifiedUsers"], 2);
        assert_eq!(parsed["admins"], 1);
        assert_eq!(parsed["users"], 2);
    }

    #[tokio::test]
    async fn test_admin_routes_need_the_grant() {
        let test = state();
        let app = app(test.state.clone());
        let alice = test
            .seed("alice", "alice@example.com", "p@ss", vec![Role::User])
            .await;
        let token = test.token_for(&alice);

        let response = make_request(
            app,
            Method::GET,
            "/api/admin/users",
            Some(&token),
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
