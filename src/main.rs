//! Large-file ingestion service — HTTP entry point.

use clap::Parser;
use sermon_uploader_core::api::{build_router, AppState};
use sermon_uploader_core::batch::BatchCompleter;
use sermon_uploader_core::completion::CompletionPipeline;
use sermon_uploader_core::config::Config;
use sermon_uploader_core::metrics::Metrics;
use sermon_uploader_core::multipart::MultipartManager;
use sermon_uploader_core::notify::LoggingSink;
use sermon_uploader_core::presign::PresignCoordinator;
use sermon_uploader_core::proxy::StreamingProxy;
use sermon_uploader_core::storage::{MultipartStrategy, S3Backend};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter};

fn version_long() -> &'static str {
    static V: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    V.get_or_init(|| format!("{} (built {})", env!("CARGO_PKG_VERSION"), env!("SUC_BUILD_TIME")))
}

/// Large-file ingestion service fronting an S3-compatible object store
#[derive(Parser, Debug)]
#[command(name = "sermon-uploader-core")]
#[command(version = version_long())]
#[command(author, about, long_about = None)]
struct Cli {
    /// Listen address (overrides UPLOADER_LISTEN_ADDR)
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // PERF: explicit runtime builder instead of `#[tokio::main]` so
    // UPLOADER_BLOCKING_THREADS can bound the blocking pool before the
    // runtime starts; the default 512-thread pool is excessive for most
    // deployments.
    let pre_config = Config::from_env();
    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_all();
    if let Some(bt) = pre_config.blocking_threads {
        runtime_builder.max_blocking_threads(bt);
    }
    let runtime = runtime_builder.build()?;

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let initial_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("sermon_uploader_core=trace,tower_http=trace")
        } else {
            EnvFilter::new("sermon_uploader_core=info,tower_http=info")
        }
    });
    let (filter_layer, _log_reload_handle) = reload::Layer::new(initial_filter);
    tracing_subscriber::registry().with(filter_layer).with(tracing_subscriber::fmt::layer()).init();

    let mut config = Config::from_env();
    if let Some(ref addr) = cli.listen {
        config.listen_addr = addr.parse()?;
    }

    info!("Starting sermon-uploader-core v{} (built {})", env!("CARGO_PKG_VERSION"), env!("SUC_BUILD_TIME"));
    info!("  Listen address: {}", config.listen_addr);
    info!("  Bucket: {}", config.object_store.bucket);
    info!("  Large file threshold: {} bytes", config.large_file_threshold_bytes);
    info!("  Max upload size: {} bytes", config.max_upload_bytes);
    info!("  Session timeout: {:?}", config.session_timeout);
    if config.has_public_endpoint() {
        info!("  Public endpoint: configured (presigned-public route available)");
    } else {
        warn!("  Public endpoint: not configured — large uploads route through multipart/proxy only");
    }

    let metrics = Metrics::new();
    metrics.process_start_time_seconds.set(
        std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs_f64(),
    );
    metrics.build_info.with_label_values(&[env!("CARGO_PKG_VERSION")]).set(1.0);

    let backend = Arc::new(S3Backend::new(&config.object_store, MultipartStrategy::Native).await?);
    let multipart = Arc::new(MultipartManager::new(
        backend.clone(),
        config.upload_max_concurrent,
        config.max_upload_bytes,
        config.session_timeout,
    ));
    let base_url = config.object_store.public_endpoint.clone().unwrap_or_else(|| format!("http://{}", config.listen_addr));
    let proxy = Arc::new(StreamingProxy::new(backend.clone(), config.upload_max_concurrent_proxy, base_url));
    let completion = Arc::new(CompletionPipeline::new(backend.clone()));
    let batch = Arc::new(BatchCompleter::new(completion.clone(), Arc::new(LoggingSink), config.batch_threshold));
    let presign = PresignCoordinator::new(backend.clone());

    let state = Arc::new(AppState {
        backend: backend.clone(),
        config: config.clone(),
        presign,
        multipart: multipart.clone(),
        proxy,
        completion,
        batch,
        metrics,
    });

    // MSM sessions are reaped on a cadence well inside `session_timeout` so a
    // session never survives more than one reap cycle past its deadline.
    let reap_interval = (config.session_timeout / 4).max(Duration::from_secs(60));
    spawn_periodic(reap_interval, {
        let multipart = multipart.clone();
        move || {
            let multipart = multipart.clone();
            tokio::spawn(async move { multipart.reap_stale().await });
        }
    });

    let app = build_router(state);

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("sermon-uploader-core listening on http://{}", config.listen_addr);
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Spawn a background task that runs `f` every `interval`.
fn spawn_periodic(interval: Duration, f: impl Fn() + Send + 'static) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        loop {
            tick.tick().await;
            f();
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
