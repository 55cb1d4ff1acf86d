use std::sync::Arc;

use axum::routing::get;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use gatehouse::activity::{ActivityLog, PgActivityStore};
use gatehouse::auth::InMemoryChallengeStore;
use gatehouse::config::Configuration;
use gatehouse::crypto::PasswordHasher;
use gatehouse::mail::{AmqpMailer, MailSink, NoopMailer};
use gatehouse::token::SessionTokenCodec;
use gatehouse::user::{Account, AccountStore, PgAccountStore, Role};
use gatehouse::{AppState, app, telemetry};

const DEFAULT_CREDENTIALS: &str = "postgres";
const DEFAULT_DATABASE_NAME: &str = "gatehouse";
const DEFAULT_POOL_SIZE: u32 = 10;
const DEFAULT_PORT: u16 = 8080;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // read configuration file. let it in memory.
    let config = Configuration::default().read()?;

    let Some(postgres) = &config.postgres else {
        tracing::error!("missing `postgres` entry on `config.yaml` file");
        std::process::exit(0);
    };
    let address = format!(
        "postgres://{}:{}@{}/{}",
        postgres.username.as_deref().unwrap_or(DEFAULT_CREDENTIALS),
        postgres.password.as_deref().unwrap_or(DEFAULT_CREDENTIALS),
        postgres.address,
        postgres.database.as_deref().unwrap_or(DEFAULT_DATABASE_NAME),
    );
    let pool = PgPoolOptions::new()
        .max_connections(postgres.pool_size.unwrap_or(DEFAULT_POOL_SIZE))
        .connect(&address)
        .await?;
    tracing::info!(address = %postgres.address, "postgres connected");

    // execute migrations scripts on start.
    sqlx::migrate!().run(&pool).await?;

    let secret = std::env::var("TOKEN_SECRET")
        .expect("missing `TOKEN_SECRET` environment variable");

    let mail: Arc<dyn MailSink> = match &config.mail {
        Some(cfg) => Arc::new(AmqpMailer::new(cfg).await?),
        None => Arc::new(NoopMailer),
    };

    let accounts: Arc<dyn AccountStore> =
        Arc::new(PgAccountStore::new(pool.clone()));
    let state = AppState {
        config: Arc::clone(&config),
        accounts: Arc::clone(&accounts),
        activity: ActivityLog::new(Arc::new(PgActivityStore::new(pool))),
        mail,
        hasher: Arc::new(PasswordHasher::new(config.argon2.clone())?),
        tokens: SessionTokenCodec::new(&secret, config.token.lifetime),
        challenges: Arc::new(InMemoryChallengeStore::new()),
    };

    seed_admin(&state).await?;

    let metrics = telemetry::setup_metrics_recorder()?;
    let app = app(state).route(
        "/metrics",
        get(move || {
            let metrics = metrics.clone();
            async move { metrics.render() }
        }),
    );

    let port = std::env::var("PORT")
        .ok()
        .and_then(|port| port.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);
    let listener =
        tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "server started");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

/// Create the administrator account on first boot when configured.
async fn seed_admin(state: &AppState) -> Result<(), Box<dyn std::error::Error>> {
    let Some(seed) = &state.config.admin else {
        return Ok(());
    };

    if state.accounts.exists_by_username(&seed.username).await? {
        return Ok(());
    }

    let account = state
        .accounts
        .save(Account {
            username: seed.username.clone(),
            email: seed.email.clone(),
            password_hash: state.hasher.hash(&seed.password)?,
            enabled: true,
            email_verified: true,
            roles: vec![Role::Admin],
            ..Default::default()
        })
        .await?;
    tracing::info!(user_id = account.id, "administrator account seeded");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
