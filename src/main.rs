//! OssBridge -- OSS-protocol gateway for a Swift-style object store.
//!
//! SIGTERM/SIGINT handlers stop accepting connections and wait for
//! in-flight requests, bounded by `server.shutdown_timeout`.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ossbridge::config::LoggingConfig;
use ossbridge::swift::backend::SwiftBackend;
use ossbridge::swift::http::HttpSwiftBackend;

/// Command-line arguments for the OssBridge server.
#[derive(Parser, Debug)]
#[command(
    name = "ossbridge",
    version,
    about = "OSS-protocol gateway for a Swift-style object store"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "ossbridge.example.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

/// Install the global subscriber.  `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logging.level)
            .map_err(|e| anyhow::anyhow!("invalid log level '{}': {}", logging.level, e))?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    match logging.format.as_str() {
        "json" => builder.json().init(),
        _ => builder.init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ossbridge::config::load_config(&cli.config)?;
    init_tracing(&config.logging)?;
    info!("Loaded configuration from {}", cli.config);

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        ossbridge::metrics::init_metrics()?;
        ossbridge::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let backend: Arc<dyn SwiftBackend> = Arc::new(HttpSwiftBackend::new(&config.backend)?);
    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout);

    let state = Arc::new(ossbridge::AppState {
        config: Arc::new(config),
        backend,
    });
    let app = ossbridge::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("OssBridge listening on {}", bind_addr);

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    let mut server = std::pin::pin!(server.into_future());
    tokio::select! {
        result = &mut server => result?,
        _ = drain_deadline(shutdown_timeout) => {
            warn!("In-flight requests did not finish within {:?}, exiting", shutdown_timeout);
        }
    }

    info!("OssBridge shut down");
    Ok(())
}

/// Resolve `timeout` after the first shutdown signal.
async fn drain_deadline(timeout: Duration) {
    shutdown_signal().await;
    tokio::time::sleep(timeout).await;
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        },
    }
}
