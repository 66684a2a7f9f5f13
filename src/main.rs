mod config;
mod routes;
mod store;

use crate::config::{Backend, Config};
use crate::store::DonationStore;
use crate::store::rest::RestStore;
use crate::store::sqlite::SqliteStore;
use axum::Router;
use clap::Parser;
use eyre::WrapErr;
use std::env;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub type SharedAppState = Arc<AppState>;
pub struct AppState {
    pub store: Arc<dyn DonationStore>,
}

#[derive(Parser, Debug)]
#[command(version, about = "Records PortOne payment webhooks as donations")]
struct Cli {
    #[arg(long, env = "DONATIONS_CONFIG", default_value = "config.toml")]
    config: PathBuf,
    #[arg(long)]
    host: Option<Ipv4Addr>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long, value_enum)]
    backend: Option<Backend>,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(sentry::integrations::tracing::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "info,{}=debug,hyper_util=info,tower_http=info",
                    env!("CARGO_CRATE_NAME")
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::load(&cli.config)?;
    config.apply_env(|key| env::var(key).ok());
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(backend) = cli.backend {
        config.datastore.backend = backend;
    }
    config.datastore.validate()?;
    tracing::debug!(datastore = ?config.datastore, "configuration resolved");

    let _sentry = config.sentry.dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                traces_sample_rate: config.sentry.traces_sample_rate,
                ..Default::default()
            },
        ))
    });

    let store: Arc<dyn DonationStore> = match config.datastore.backend {
        Backend::Rest => {
            let store = RestStore::new(&config.datastore)
                .wrap_err("Failed to configure datastore client")?;
            tracing::info!("recording donations via {}", store.endpoint());
            Arc::new(store)
        }
        Backend::Sqlite => Arc::new(
            SqliteStore::open(&config.datastore.sqlite_path)
                .wrap_err("Failed to open sqlite datastore")?,
        ),
    };
    let app_state: SharedAppState = Arc::new(AppState { store });

    let listener = tokio::net::TcpListener::bind(config.server.to_socket_addrs())
        .await
        .wrap_err_with(|| format!("Failed to bind {}", config.server.to_socket_addrs()))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    let app = Router::new().merge(routes::router()).with_state(app_state);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .wrap_err("HTTP server failed")?;

    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install CTRL+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received CTRL+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
