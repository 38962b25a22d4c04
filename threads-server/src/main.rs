use std::{net::SocketAddr, sync::Arc};

use anyhow::{anyhow, Context};
use axum::{
    routing::{get, post},
    Router,
};
use structopt::StructOpt;
use threads_api::webhook::WebhookSecret;
use tower_http::trace::TraceLayer;

mod db;
mod error;
mod extractors;
mod handlers;
mod session;
mod tests;
mod webhook;

use error::Error;
use extractors::{AppState, PgPool};
use session::SessionVerifier;
use webhook::CreationEchoes;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

#[derive(Debug, StructOpt)]
#[structopt(name = "threads-server")]
struct Opt {
    /// Address to listen on
    #[structopt(long, env = "LISTEN_ADDR", default_value = "127.0.0.1:3000")]
    listen_addr: SocketAddr,

    #[structopt(flatten)]
    db: DbConfig,

    #[structopt(long, env = "MAX_DB_CONNECTIONS", default_value = "10")]
    max_db_connections: u32,

    /// Signing secret of the identity provider's webhooks (`whsec_...`)
    #[structopt(long, env = "WEBHOOK_SECRET", hide_env_values = true)]
    webhook_secret: String,

    /// PEM public key, or shared secret, verifying session tokens
    #[structopt(long, env = "SESSION_KEY", hide_env_values = true)]
    session_key: String,
}

/// Either a full `DATABASE_URL`, or the parts to assemble it from
#[derive(Debug, Default, StructOpt)]
struct DbConfig {
    #[structopt(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    #[structopt(long, env = "DB_USERNAME")]
    db_username: Option<String>,

    #[structopt(long, env = "DB_PASSWORD", hide_env_values = true)]
    db_password: Option<String>,

    #[structopt(long, env = "DB_HOST")]
    db_host: Option<String>,

    #[structopt(long, env = "DB_PORT")]
    db_port: Option<u16>,

    #[structopt(long, env = "DB_NAME")]
    db_name: Option<String>,
}

impl DbConfig {
    fn url(&self) -> anyhow::Result<String> {
        if let Some(url) = &self.database_url {
            return Ok(url.clone());
        }
        let missing = |name: &str| anyhow!("neither DATABASE_URL nor {name} is set");
        let host = self.db_host.as_ref().ok_or_else(|| missing("DB_HOST"))?;
        let name = self.db_name.as_ref().ok_or_else(|| missing("DB_NAME"))?;
        let username = self
            .db_username
            .as_ref()
            .ok_or_else(|| missing("DB_USERNAME"))?;
        let mut url = url::Url::parse(&format!("postgres://{host}"))
            .with_context(|| format!("parsing database host {host:?}"))?;
        url.set_username(username)
            .map_err(|()| anyhow!("setting database username"))?;
        url.set_password(self.db_password.as_deref())
            .map_err(|()| anyhow!("setting database password"))?;
        url.set_port(self.db_port)
            .map_err(|()| anyhow!("setting database port"))?;
        url.set_path(name);
        Ok(url.to_string())
    }
}

pub async fn create_sqlx_pool(db_url: &str, max_connections: u32) -> anyhow::Result<sqlx::PgPool> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(db_url)
        .await
        .context("opening database")
}

pub fn app(pool: sqlx::PgPool, sessions: SessionVerifier, webhook_secret: WebhookSecret) -> Router {
    router(AppState {
        db: PgPool::new(pool),
        sessions: Arc::new(sessions),
        webhook_secret: Arc::new(webhook_secret),
        echoes: CreationEchoes::default(),
    })
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/whoami", get(handlers::whoami))
        .route(
            "/api/users/me",
            get(handlers::fetch_me).put(handlers::update_me),
        )
        .route("/api/users", get(handlers::search_users))
        .route("/api/users/:id", get(handlers::fetch_user))
        .route("/api/users/:id/threads", get(handlers::fetch_user_threads))
        .route("/api/activity", get(handlers::fetch_activity))
        .route(
            "/api/threads",
            get(handlers::fetch_feed).post(handlers::create_thread),
        )
        .route("/api/threads/:id", get(handlers::fetch_thread))
        .route("/api/threads/:id/comments", post(handlers::add_comment))
        .route("/api/communities", get(handlers::search_communities))
        .route("/api/communities/:id", get(handlers::fetch_community))
        .route(
            "/api/communities/:id/threads",
            get(handlers::fetch_community_threads),
        )
        .route("/api/webhooks/identity", post(webhook::identity_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opt = Opt::from_args();
    let sessions = SessionVerifier::new(&opt.session_key).context("loading SESSION_KEY")?;
    let webhook_secret =
        WebhookSecret::new(&opt.webhook_secret).context("loading WEBHOOK_SECRET")?;

    let db_url = opt.db.url()?;
    let pool = create_sqlx_pool(&db_url, opt.max_db_connections).await?;
    MIGRATOR
        .run(&pool)
        .await
        .context("applying database migrations")?;

    let app = app(pool, sessions, webhook_secret);

    tracing::info!("listening on {}", opt.listen_addr);
    axum::Server::bind(&opt.listen_addr)
        .serve(app.into_make_service())
        .await
        .context("serving axum webserver")
}
