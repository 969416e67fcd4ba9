//! recsync-svc - recommendation pipeline service
//!
//! Serves `POST /generate-recommendation`: reads the latest upstream result,
//! normalizes it, records it in Supabase and returns it.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use recsync_common::config::{Overrides, PersistMode, SourceMode, TomlConfig, ENV_CONFIG};
use recsync_common::SchemaVersion;
use recsync_svc::normalize::Normalizer;
use recsync_svc::persist::{Persister, SupabasePersister};
use recsync_svc::pipeline::{Pipeline, PipelineTimeouts};
use recsync_svc::source::{CommandProducer, LatestRowSource, ProducerSource, SourceReader};
use recsync_svc::{build_router, AppState};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for recsync-svc
///
/// Every option also has an environment variable and a config file key;
/// the command line wins.
#[derive(Parser, Debug)]
#[command(name = "recsync-svc")]
#[command(about = "Recommendation pipeline service")]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long, env = ENV_CONFIG)]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Where results come from: latest_row or producer
    #[arg(long)]
    source_mode: Option<SourceMode>,

    /// Local SQLite store holding the latest result
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Field registry: scoring, extended or sauna
    #[arg(short, long)]
    schema: Option<SchemaVersion>,

    /// Remote table receiving records
    #[arg(long)]
    remote_table: Option<String>,

    /// Remote write mode: append or upsert_by_user
    #[arg(long)]
    remote_mode: Option<PersistMode>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            host: self.host.clone(),
            port: self.port,
            log_level: self.log_level.clone(),
            source_mode: self.source_mode,
            database_path: self.database.clone(),
            schema: self.schema,
            remote_table: self.remote_table.clone(),
            remote_mode: self.remote_mode,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let overrides = args
        .overrides()
        .or(Overrides::from_env().context("Invalid environment configuration")?);
    let (config, config_path) = TomlConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;
    let config = config.apply(overrides);

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Build identification first, before any store is touched
    info!(
        "Starting recsync-svc v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    match &config_path {
        Some(path) => info!("Config file: {}", path.display()),
        None => warn!("No config file found, using defaults and environment"),
    }

    config.validate().context("Invalid configuration")?;

    let schema = config.schema.version;
    info!(schema = %schema, source = ?config.source.mode, "Pipeline configuration");

    let source: Arc<dyn SourceReader> = match config.source.mode {
        SourceMode::LatestRow => {
            let path = config.source.database_path();
            info!("Local store: {}", path.display());
            Arc::new(
                LatestRowSource::new(
                    path,
                    &config.source.table,
                    &config.source.order_column,
                    schema,
                )
                .context("Failed to configure local store reader")?,
            )
        }
        SourceMode::Producer => {
            let program = config
                .source
                .producer_command
                .clone()
                .context("source.producer_command is required in producer mode")?;
            info!("Producer command: {}", program);
            Arc::new(ProducerSource::new(CommandProducer::new(
                program,
                config.source.producer_args.clone(),
            )))
        }
    };

    let remote_url = config
        .remote
        .url
        .as_deref()
        .context("SUPABASE_URL is not set")?;
    let remote_key = config
        .remote
        .service_role_key
        .clone()
        .context("SUPABASE_SERVICE_ROLE_KEY is not set")?;
    let persister: Arc<dyn Persister> = Arc::new(
        SupabasePersister::new(
            remote_url,
            remote_key,
            &config.remote.table,
            config.remote.mode,
            Duration::from_millis(config.remote.timeout_ms),
        )
        .context("Failed to configure remote persister")?,
    );
    info!(
        "Remote table: {} ({:?})",
        config.remote.table, config.remote.mode
    );

    let timeouts = PipelineTimeouts {
        read: Duration::from_millis(config.source.timeout_ms),
        persist: Duration::from_millis(config.remote.timeout_ms),
    };
    let pipeline = Pipeline::new(source, Normalizer::new(schema), persister, timeouts);

    let app = build_router(AppState::new(pipeline), config.server.cors_permissive);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("recsync-svc listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
