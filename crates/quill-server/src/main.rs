mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use quill_api::email::{EmailSender, ResendMailer};
use quill_api::{AppState, AppStateInner};
use quill_db::Database;
use quill_realtime::Dispatcher;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quill_server=debug,quill_api=debug,quill_realtime=debug,quill_db=debug,tower_http=debug".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {:#}", e);
            eprintln!("FATAL: {:#}. Set it in your .env file and restart.", e);
            std::process::exit(1);
        }
    };

    let db = Arc::new(Database::open(&PathBuf::from(&config.db_path))?);
    let dispatcher = Dispatcher::new();

    let mailer: Option<Arc<dyn EmailSender>> = match &config.email {
        Some(email) => Some(Arc::new(ResendMailer::new(
            email.api_url.clone(),
            email.api_key.clone(),
            email.from.clone(),
        ))),
        None => {
            warn!("QUILL_EMAIL_API_KEY not set; invitations and password resets are disabled");
            None
        }
    };

    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        jwt_secret: config.jwt_secret.clone(),
        dispatcher: dispatcher.clone(),
        mailer,
        public_url: config.public_url.clone(),
    });

    let gateway = quill_realtime::router(dispatcher, db, config.jwt_secret.clone());

    let app = quill_api::router(app_state)
        .merge(gateway)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Quill server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
