//! Emporium API server binary.
//!
//! Connects to PostgreSQL, runs migrations and serves the REST API until
//! SIGINT/SIGTERM, then waits for background mail delivery to finish.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use emporium_api::AppState;
use emporium_api::config::ApiConfig;
use emporium_core::auth::jwt::JwtConfig;
use emporium_core::auth::password::DEFAULT_COST;
use emporium_core::db::{self, DbConfig};
use emporium_core::mailer::{LogMailer, Mailer, MailerConfig, SmtpMailer};
use emporium_core::store::Store;
use emporium_core::store::postgres::PgStore;

/// CLI arguments; every flag can also come from the environment or `.env`.
#[derive(Parser, Debug)]
#[command(name = "emporium_server", about = "Emporium e-commerce API server")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:4000")]
    bind_addr: String,

    /// development|staging|production
    #[arg(long, env = "ENV", default_value = "development")]
    environment: String,

    /// PostgreSQL connection URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost:5432/emporium"
    )]
    database_url: String,

    #[arg(long, env = "DB_MAX_OPEN_CONNS", default_value_t = db::DEFAULT_MAX_CONNECTIONS)]
    max_connections: u32,

    #[arg(long, env = "DB_MIN_CONNS", default_value_t = 0)]
    min_connections: u32,

    /// Seconds an idle pooled connection is kept.
    #[arg(long, env = "DB_MAX_IDLE_SECS", default_value_t = 15 * 60)]
    idle_timeout_secs: u64,

    /// Per-call store timeout in seconds.
    #[arg(long, env = "STORE_TIMEOUT_SECS", default_value_t = 3)]
    store_timeout_secs: u64,

    /// Access-token signing secret.
    #[arg(long, env = "ACCESS_SK", hide_env_values = true)]
    access_secret: String,

    /// Refresh-token signing secret. Must differ from the access secret.
    #[arg(long, env = "REFRESH_SK", hide_env_values = true)]
    refresh_secret: String,

    #[arg(long, env = "PASSWORD_COST", default_value_t = DEFAULT_COST)]
    password_cost: u32,

    /// Mark the refresh-token cookie `Secure`.
    #[arg(long, env = "COOKIE_SECURE", default_value_t = false)]
    cookie_secure: bool,

    /// SMTP relay host. Without one, mail is only logged.
    #[arg(long, env = "SMTP_HOST")]
    smtp_host: Option<String>,

    #[arg(long, env = "SMTP_PORT", default_value_t = 587)]
    smtp_port: u16,

    #[arg(long, env = "SMTP_USERNAME", default_value = "")]
    smtp_username: String,

    #[arg(long, env = "SMTP_PASSWORD", default_value = "", hide_env_values = true)]
    smtp_password: String,

    #[arg(
        long,
        env = "SMTP_SENDER",
        default_value = "Emporium <no-reply@emporium.shop>"
    )]
    smtp_sender: String,
}

fn mailer(args: &Args) -> Result<Arc<dyn Mailer>, Box<dyn std::error::Error>> {
    match &args.smtp_host {
        Some(host) => {
            let mailer = SmtpMailer::new(&MailerConfig {
                host: host.clone(),
                port: args.smtp_port,
                username: args.smtp_username.clone(),
                password: args.smtp_password.clone(),
                sender: args.smtp_sender.clone(),
            })?;
            info!(host = %host, port = args.smtp_port, "smtp mailer configured");
            Ok(Arc::new(mailer))
        }
        None => {
            warn!("SMTP_HOST not set, outgoing mail will only be logged");
            Ok(Arc::new(LogMailer))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,emporium_api=debug,emporium_core=debug".into()),
        )
        .init();

    let args = Args::parse();
    info!(environment = %args.environment, bind_addr = %args.bind_addr, "starting emporium_server");

    let pool = db::connect(&DbConfig {
        url: args.database_url.clone(),
        max_connections: args.max_connections,
        min_connections: args.min_connections,
        idle_timeout: Duration::from_secs(args.idle_timeout_secs),
        ..DbConfig::new(&args.database_url)
    })
    .await?;

    info!("running database migrations");
    emporium_api::migrate(&pool).await?;

    let store: Arc<dyn Store> = Arc::new(PgStore::new(
        pool,
        Duration::from_secs(args.store_timeout_secs),
    ));

    let mut config = ApiConfig::new(
        args.bind_addr.clone(),
        JwtConfig {
            access_secret: args.access_secret.clone(),
            refresh_secret: args.refresh_secret.clone(),
        },
    );
    config.environment = args.environment.clone();
    config.password_cost = args.password_cost;
    config.cookie_secure = args.cookie_secure;

    let state = AppState::new(store, mailer(&args)?, config.clone())?;
    let tasks = state.tasks.clone();
    let app = emporium_api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(pending = tasks.len(), "waiting for background tasks");
    tasks.close();
    tasks.wait().await;
    info!("stopped");
    Ok(())
}
