//! Self-profile and user-scoped endpoints.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::activity::{ActivityKind, ClientMeta};
use crate::error::{MessageResponse, Result, ServerError};
use crate::middleware::{CurrentUser, require_admin, require_admin_or_self};
use crate::router::Valid;
use crate::user::{Account, AccountPatch, ProfilePatch, Role};

/// Profile view of an account.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub roles: Vec<Role>,
}

impl From<&Account> for Profile {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            username: account.username.clone(),
            email: account.email.clone(),
            first_name: account.first_name.clone(),
            last_name: account.last_name.clone(),
            roles: account.roles.clone(),
        }
    }
}

/// Handler for the current account's profile.
pub async fn me(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    meta: ClientMeta,
) -> Result<Json<Profile>> {
    state
        .activity
        .record(
            user.account.id,
            ActivityKind::ProfileView,
            "User viewed their profile",
            &meta,
        )
        .await;

    Ok(Json(Profile::from(&user.account)))
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProfileBody {
    #[validate(length(max = 100, message = "First name is too long."))]
    pub first_name: Option<String>,
    #[validate(length(max = 100, message = "Last name is too long."))]
    pub last_name: Option<String>,
    #[validate(email(message = "Email must be formatted."))]
    pub email: Option<String>,
}

/// Handler to patch the current account's profile fields.
pub async fn update_me(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    meta: ClientMeta,
    Valid(body): Valid<ProfileBody>,
) -> Result<Json<Profile>> {
    let account = state
        .account_service()
        .update_profile(
            &user.account,
            ProfilePatch {
                first_name: body.first_name,
                last_name: body.last_name,
                email: body.email,
            },
            &meta,
        )
        .await?;

    Ok(Json(Profile::from(&account)))
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordBody {
    #[validate(length(min = 1, message = "Current password is required."))]
    pub current_password: String,
    #[validate(length(min = 1, message = "New password is required."))]
    pub new_password: String,
}

/// Handler to change the current account's password.
pub async fn change_password(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    meta: ClientMeta,
    Valid(body): Valid<ChangePasswordBody>,
) -> Result<Json<MessageResponse>> {
    state
        .account_service()
        .change_password(
            &user.account,
            &body.current_password,
            &body.new_password,
            &meta,
        )
        .await?;

    Ok(Json(MessageResponse::new("Password changed successfully")))
}

/// Handler to list every account. Admin only.
pub async fn all(
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

/// Handler for one account, visible to its owner and to admins.
pub async fn get_by_id(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
    meta: ClientMeta,
) -> Result<Json<Account>> {
    require_admin_or_self(&user, id)?;

    let (kind, description) = if user.is_self(id) {
        (
            ActivityKind::ProfileView,
            "User viewed their profile details".to_owned(),
        )
    } else {
        (
            ActivityKind::AdminAction,
            format!("Admin viewed user with ID: {id}"),
        )
    };
    state
        .activity
        .record(user.account.id, kind, &description, &meta)
        .await;

    let account = state
        .accounts
        .find_by_id(id)
        .await?
        .ok_or(ServerError::NotFound)?;

    Ok(Json(account))
}

/// Handler for the admin patch over another account.
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

/// Handler for the admin delete.
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

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::json;

    use crate::activity::ActivityStore;
    use crate::testing::{TestApp, make_request, state};
    use crate::user::Role;
    use crate::*;

    async fn seed_pair(test: &TestApp) -> (user::Account, user::Account) {
        let admin = test
            .seed("admin", "admin@example.com", "adminPw", vec![Role::Admin])
            .await;
        let alice = test
            .seed("alice", "alice@example.com", "p@ss", vec![Role::User])
            .await;
        (admin, alice)
    }

    #[tokio::test]
    async fn test_me_roundtrip() {
        let test = state();
        let app = app(test.state.clone());
        let (_, alice) = seed_pair(&test).await;
        let token = test.token_for(&alice);

        let response = make_request(
            app,
            Method::GET,
            "/api/users/me",
            Some(&token),
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["username"], "alice");
        assert_eq!(parsed["roles"][0], "ROLE_USER");

        // Exactly one PROFILE_VIEW record appended.
        let log = test.activities.recent(alice.id, 10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].kind, activity::ActivityKind::ProfileView);
    }

    #[tokio::test]
    async fn test_me_requires_token() {
        let test = state();
        let app = app(test.state.clone());

        let response = make_request(
            app,
            Method::GET,
            "/api/users/me",
            None,
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_update_me_checks_email_uniqueness() {
        let test = state();
        let app = app(test.state.clone());
        let (_, alice) = seed_pair(&test).await;
        let token = test.token_for(&alice);

        let response = make_request(
            app.clone(),
            Method::PUT,
            "/api/users/me",
            Some(&token),
            json!({"email": "ADMIN@example.com"}).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = make_request(
            app,
            Method::PUT,
            "/api/users/me",
            Some(&token),
            json!({"firstName": "Alicia"}).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["firstName"], "Alicia");
    }

    #[tokio::test]
    async fn test_change_password_flow() {
        let test = state();
        let app = app(test.state.clone());
        let (_, alice) = seed_pair(&test).await;
        let token = test.token_for(&alice);

        let response = make_request(
            app.clone(),
            Method::POST,
            "/api/users/change-password",
            Some(&token),
            json!({"currentPassword": "wrong", "newPassword": "fresh"})
                .to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = make_request(
            app.clone(),
            Method::POST,
            "/api/users/change-password",
            Some(&token),
            json!({"currentPassword": "p@ss", "newPassword": "fresh"})
                .to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = make_request(
            app,
            Method::POST,
            "/api/auth/login",
            None,
            json!({"username": "alice", "password": "fresh"}).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_authorization_matrix() {
        let test = state();
        let app = app(test.state.clone());
        let (admin, alice) = seed_pair(&test).await;
        let admin_token = test.token_for(&admin);
        let alice_token = test.token_for(&alice);

        // Self read is allowed.
        let response = make_request(
            app.clone(),
            Method::GET,
            &format!("/api/users/{}", alice.id),
            Some(&alice_token),
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        // Reading someone else without the admin grant is not.
        let response = make_request(
            app.clone(),
            Method::GET,
            &format!("/api/users/{}", admin.id),
            Some(&alice_token),
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        // Admin reads anyone.
        let response = make_request(
            app.clone(),
            Method::GET,
            &format!("/api/users/{}", alice.id),
            Some(&admin_token),
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        // Plain users cannot list.
        let response = make_request(
            app,
            Method::GET,
            "/api/users/all",
            Some(&alice_token),
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_account_listing_never_leaks_hashes() {
        let test = state();
        let app = app(test.state.clone());
        let (admin, _) = seed_pair(&test).await;
        let token = test.token_for(&admin);

        let response = make_request(
            app,
            Method::GET,
            "/api/users/all",
            Some(&token),
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(!text.contains("argon2"));
        assert!(!text.contains("passwordHash"));
    }
}
