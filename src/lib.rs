//! Gatehouse is an account management and authentication API.

#[forbid(unsafe_code)]
#[deny(unused_mut)]
pub mod activity;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod mail;
pub mod middleware;
pub mod router;
pub mod telemetry;
pub mod token;
pub mod totp;
pub mod user;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, Method, header};
use axum::routing::{get, post};
use axum::{Router, middleware as AxumMiddleware};
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::CorsLayer;
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

use crate::activity::ActivityLog;
use crate::auth::{AuthService, ChallengeStore};
use crate::config::Configuration;
use crate::crypto::PasswordHasher;
use crate::mail::MailSink;
use crate::token::SessionTokenCodec;
use crate::user::{AccountService, AccountStore};

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Configuration>,
    pub accounts: Arc<dyn AccountStore>,
    pub activity: ActivityLog,
    pub mail: Arc<dyn MailSink>,
    pub hasher: Arc<PasswordHasher>,
    pub tokens: SessionTokenCodec,
    pub challenges: Arc<dyn ChallengeStore>,
}

impl AppState {
    pub fn account_service(&self) -> AccountService {
        AccountService::new(
            Arc::clone(&self.accounts),
            self.activity.clone(),
            Arc::clone(&self.mail),
            Arc::clone(&self.hasher),
            Arc::clone(&self.config),
        )
    }

    pub fn auth_service(&self) -> AuthService {
        AuthService::new(
            Arc::clone(&self.accounts),
            self.activity.clone(),
            Arc::clone(&self.mail),
            Arc::clone(&self.hasher),
            self.tokens.clone(),
            Arc::clone(&self.challenges),
            Arc::clone(&self.config),
        )
    }
}

/// CORS is restricted to the configured frontend origin since the session
/// credential travels with the requests.
fn cors(config: &Configuration) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
        .vary([header::AUTHORIZATION]);

    match config.frontend_url.parse::<HeaderValue>() {
        Ok(origin) => layer.allow_origin(origin),
        Err(_) => layer,
    }
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let layers = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new())
                .on_request(DefaultOnRequest::new())
                .on_response(
                    DefaultOnResponse::new().latency_unit(LatencyUnit::Micros),
                ),
        )
        // Set a timeout.
        .layer(TimeoutLayer::new(Duration::from_secs(10)))
        // Remove sensitive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([
            header::AUTHORIZATION,
            header::COOKIE,
        ]))
        // Add CORS preflight support.
        .layer(cors(&state.config));

    let public = Router::new()
        .route("/status.json", get(router::status::handler))
        .route("/api/auth/register", post(router::register::handler))
        .route("/api/auth/login", post(router::login::handler))
        .route(
            "/api/auth/verify-2fa",
            post(router::login::verify_two_factor),
        )
        .route(
            "/api/auth/forgot-password",
            post(router::reset_password::forgot),
        )
        .route("/verify-email", get(router::verify_email::verify))
        .route("/verify-email/resend", post(router::verify_email::resend))
        .route("/api/reset-password", post(router::reset_password::reset))
        .route(
            "/api/reset-password/validate",
            get(router::reset_password::validate),
        );

    let protected = Router::new()
        .route("/api/auth/enable-2fa", post(router::two_factor::enable))
        .route("/api/auth/disable-2fa", post(router::two_factor::disable))
        .route(
            "/api/users/me",
            get(router::users::me).put(router::users::update_me),
        )
        .route(
            "/api/users/change-password",
            post(router::users::change_password),
        )
        .route("/api/users/all", get(router::users::all))
        .route(
            "/api/users/{id}",
            get(router::users::get_by_id)
                .put(router::users::update)
                .delete(router::users::delete),
        )
        .route(
            "/api/admin/users",
            get(router::admin::list).post(router::admin::create),
        )
        .route(
            "/api/admin/users/{id}",
            get(router::admin::get_by_id)
                .put(router::admin::update)
                .delete(router::admin::delete),
        )
        .route("/api/admin/stats", get(router::admin::stats))
        .route("/api/activities/me", get(router::activities::recent))
        .route("/api/activities/me/all", get(router::activities::mine))
        .route(
            "/api/activities/user/{id}",
            get(router::activities::by_user),
        )
        .route(
            "/api/dashboard/user-stats",
            get(router::dashboard::user_stats),
        )
        .route_layer(AxumMiddleware::from_fn_with_state(
            state.clone(),
            middleware::authenticate,
        ));

    public
        .merge(protected)
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(layers)
}
