use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info};

use storefront_api as api;
use storefront_api::services::{
    gateway::{HttpPaymentGateway, PaymentGateway},
    storage::{FileStore, LocalFileStore},
};

#[derive(Parser)]
#[command(name = "storefront-api", about = "Storefront cart, checkout and payment API", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Apply pending database migrations and exit
    Migrate,
    /// Delete canceled carts and their lines
    PurgeCarts,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    let db = api::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to the database")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Migrate => {
            api::db::run_migrations(&db)
                .await
                .context("failed running migrations")?;
            info!("Migrations applied");
            Ok(())
        }
        Command::PurgeCarts => {
            let (state, _events) = build_state(cfg, db)?;
            let purged = state.services.carts.purge_canceled_carts().await?;
            info!("Purged {} canceled carts", purged);
            Ok(())
        }
        Command::Serve => serve(cfg, db).await,
    }
}

fn build_state(
    cfg: api::config::AppConfig,
    db: api::db::DbPool,
) -> anyhow::Result<(api::AppState, tokio::sync::mpsc::Receiver<api::events::Event>)> {
    let gateway: Arc<dyn PaymentGateway> = Arc::new(
        HttpPaymentGateway::new(cfg.payment.clone()).context("failed to build gateway client")?,
    );
    let files: Arc<dyn FileStore> = Arc::new(LocalFileStore::new(
        cfg.upload_dir.clone(),
        cfg.media_url.clone(),
        cfg.max_upload_bytes,
    ));
    Ok(api::AppState::build(cfg, db, gateway, files))
}

async fn serve(cfg: api::config::AppConfig, db: api::db::DbPool) -> anyhow::Result<()> {
    if cfg.auto_migrate {
        api::db::run_migrations(&db).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }

    let host: std::net::IpAddr = cfg
        .host
        .parse()
        .with_context(|| format!("invalid host address '{}'", cfg.host))?;
    let addr = SocketAddr::new(host, cfg.port);

    let (state, event_rx) = build_state(cfg, db)?;
    tokio::spawn(api::events::process_events(event_rx));

    let app = api::build_router(state);

    info!("storefront-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
