mod cors;
mod routes;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use depot_core::normalize::sweep;
use depot_core::{FileStore, Mode, Normalizer, ServerConfig};
use tracing::{error, info};

use cors::cors_layer;
use routes::{depot_router, AppState};

/// depot: upload, normalize and serve files over HTTP.
#[derive(Parser)]
#[command(name = "depot-server")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Port to listen on.
    #[arg(long, default_value = "3001", env = "PORT")]
    port: u16,

    /// Address to bind to.
    #[arg(long, default_value = "0.0.0.0", env = "BIND")]
    bind: String,

    /// Public prefix of returned file URLs. Defaults to http://localhost:<port>.
    #[arg(long, env = "BASE_URL")]
    base_url: Option<String>,

    /// Directory holding stored files.
    #[arg(long, default_value = "./files", env = "UPLOAD_DIR")]
    upload_dir: PathBuf,

    /// Maximum upload size in megabytes.
    #[arg(long, default_value = "50", env = "MAX_FILE_SIZE")]
    max_file_size: u64,

    /// Cross-origin mode.
    #[arg(long, value_enum, default_value = "development", env = "APP_ENV")]
    app_env: AppEnv,

    /// Domains allowed to call the API in production (subdomains included).
    #[arg(long, value_delimiter = ',', env = "CORS_ALLOWED_DOMAINS")]
    cors_allowed_domains: Vec<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API (default).
    Serve,
    /// Convert every stored raster image to WebP, then exit.
    Normalize,
}

#[derive(Clone, Copy, ValueEnum)]
enum AppEnv {
    Development,
    Production,
}

impl From<AppEnv> for Mode {
    fn from(env: AppEnv) -> Self {
        match env {
            AppEnv::Development => Mode::Development,
            AppEnv::Production => Mode::Production,
        }
    }
}

fn configure_logging() {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_line_number(true)
        .with_target(false)
        .with_file(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    configure_logging();
    let args = Args::parse();

    let config = ServerConfig::new(
        args.port,
        args.base_url.clone(),
        &args.upload_dir,
        args.max_file_size,
        args.app_env.into(),
    )
    .unwrap_or_else(|e| {
        error!("invalid configuration: {e}");
        std::process::exit(1);
    });

    let store = FileStore::open(&config.upload_dir)
        .await
        .unwrap_or_else(|e| {
            error!(
                "failed to open upload directory {}: {e}",
                config.upload_dir.display()
            );
            std::process::exit(1);
        });

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, store, &args.bind, args.cors_allowed_domains).await,
        Command::Normalize => normalize(store).await,
    }
}

async fn serve(config: ServerConfig, store: FileStore, bind: &str, cors_domains: Vec<String>) {
    let mode = config.mode;
    match mode {
        Mode::Development => info!("CORS: development mode, all origins allowed"),
        Mode::Production if cors_domains.is_empty() => {
            info!("CORS: production mode with no allowed domains, cross-origin requests refused")
        }
        Mode::Production => info!("CORS: production mode, allowed domains: {cors_domains:?}"),
    }

    info!(
        "storing files in {} (max {}MB), public URL {}",
        config.upload_dir.display(),
        config.max_file_size_mb,
        config.base_url
    );

    let addr = format!("{bind}:{}", config.port);
    let state = Arc::new(AppState::new(Arc::new(config), store));
    let app = depot_router(state).layer(cors_layer(mode, cors_domains));

    info!("binding to {addr}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!("failed to bind to {addr}: {e}");
            std::process::exit(1);
        });

    info!("depot-server listening on http://{addr} ({mode})");
    if let Err(e) = axum::serve(listener, app).await {
        error!("server error: {e}");
        std::process::exit(1);
    }
}

async fn normalize(store: FileStore) {
    info!("normalizing stored images in {}", store.root().display());
    let normalizer = Normalizer::new(store);

    match sweep(&normalizer).await {
        Ok(report) => info!(
            "normalization finished: {} converted, {} skipped, {} failed",
            report.converted, report.skipped, report.failed
        ),
        Err(e) => {
            error!("normalization sweep failed: {e}");
            std::process::exit(1);
        }
    }
}
