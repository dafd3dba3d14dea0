//! hostgate server binary
//!
//! Serves a directory as a REST filesystem over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! hostgate-server --root /srv/share
//! hostgate-server --config ./server.ron --bind 0.0.0.0:8080
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use hostgate_server::constants::{DEFAULT_LOG_FILTER, SERVICE_NAME};
use hostgate_server::{AppState, ServerConfig, router};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Serve a directory as a REST filesystem.
#[derive(Debug, Parser)]
#[command(name = "hostgate-server", version, about)]
struct Args {
    /// Config file (default: ~/.config/hostgate/server.ron if present)
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// Listen address, e.g. 127.0.0.1:8080
    #[arg(long, short)]
    bind: Option<String>,
    /// Directory to serve
    #[arg(long, short)]
    root: Option<PathBuf>,
    /// Route prefix, e.g. /vfs
    #[arg(long)]
    prefix: Option<String>,
    /// Public base URL used in redirects and listing links
    #[arg(long)]
    public_url: Option<String>,
}

impl Args {
    fn apply(self, mut config: ServerConfig) -> ServerConfig {
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(root) = self.root {
            config.root = root;
        }
        if let Some(prefix) = self.prefix {
            config.prefix = prefix;
        }
        if self.public_url.is_some() {
            config.public_url = self.public_url;
        }
        config
    }
}

#[cfg(feature = "telemetry")]
fn init_tracing() -> Option<hostgate_telemetry::OtelGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr));

    if !hostgate_telemetry::otel_enabled() {
        registry.init();
        return None;
    }

    match hostgate_telemetry::otel_layer(SERVICE_NAME) {
        Ok((otel_layer, guard)) => {
            registry.with(otel_layer).init();
            Some(guard)
        }
        Err(e) => {
            registry.init();
            tracing::warn!(error = %e, "OTel export disabled");
            None
        }
    }
}

#[cfg(not(feature = "telemetry"))]
fn init_tracing() -> Option<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
    None
}

#[tokio::main]
async fn main() -> ExitCode {
    let _otel_guard = init_tracing();
    let args = Args::parse();

    if let Err(e) = run(args).await {
        tracing::error!("Server error: {e:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = ServerConfig::load_or_default(args.config.as_deref())
        .context("loading configuration")?;
    let config = args.apply(config);
    config.validate()?;

    let handler = config.handler();
    tracing::info!(
        root = %handler.resolver().root().display(),
        prefix = handler.resolver().prefix(),
        bind = %config.bind,
        "starting hostgate server"
    );

    let shutdown = CancellationToken::new();
    let app = router(AppState::new(handler, shutdown.clone()));

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("serving")?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
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

    tracing::info!("received termination signal, shutting down");
    shutdown.cancel();
}
