use clap::Parser;
use diskwatch::config::{ConfigBootstrap, ServerConfig};
use diskwatch::monitor::sampler::DiskSampler;
use diskwatch::monitor::scheduler::{LatestSample, Scheduler};
use diskwatch::monitor::warning::WarningDetector;
use diskwatch::notifications::senders::web_push_sender::WebPushSender;
use diskwatch::notifications::service::NotificationService;
use diskwatch::notifications::store::SubscriptionStore;
use diskwatch::notifications::vapid::ensure_vapid_keys;
use diskwatch::version::VERSION;
use diskwatch::web::{AppState, create_axum_router};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "diskwatch.toml")]
    config: PathBuf,
}

fn init_logging(log_dir: &Path) {
    // Log to a file: JSON format, daily rotation. Console only if the
    // directory cannot be used.
    let appender = std::fs::create_dir_all(log_dir)
        .map_err(|e| e.to_string())
        .and_then(|_| {
            RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("diskwatch")
                .filename_suffix("log")
                .build(log_dir)
                .map_err(|e| e.to_string())
        });
    let file_layer = match appender {
        Ok(appender) => Some(fmt::layer().with_writer(appender).with_ansi(false).json()),
        Err(e) => {
            eprintln!(
                "Warning: cannot write logs to {}: {e}. Logging to the console only.",
                log_dir.display()
            );
            None
        }
    };

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C.");
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
                error!(error = %e, "Failed to listen for SIGTERM.");
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
    warn!("Shutdown signal received. Stopping server.");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Manually check for --version before full parsing to keep the simple output.
    if std::env::args().any(|arg| arg == "--version") {
        println!("diskwatch version: {VERSION}");
        return Ok(());
    }

    let args = Args::parse();

    let (config, bootstrap) = match ServerConfig::load(&args.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Failed to load configuration from {}: {e}", args.config.display());
            return Err(e.into());
        }
    };

    init_logging(&config.log_dir());
    info!("Starting diskwatch, version: {}", VERSION);
    match bootstrap {
        ConfigBootstrap::Created => {
            info!(
                path = ?args.config,
                "Configuration file not found. Created it with default values."
            )
        }
        ConfigBootstrap::Completed => {
            info!(
                path = ?args.config,
                "Configuration file was missing keys. Filled them with defaults."
            )
        }
        ConfigBootstrap::Unchanged => {}
    }
    info!(
        disk_path = %config.disk_monitor.disk_path,
        usage_threshold = config.disk_monitor.usage_threshold,
        check_interval_minutes = config.disk_monitor.check_interval_minutes,
        enable_notifications = config.notifications.enable_notifications,
        subscription_file = ?config.subscription_file(),
        "Configuration loaded."
    );

    // --- VAPID keys ---
    let vapid_keys = match ensure_vapid_keys(
        &config.vapid_private_key_path(),
        &config.vapid_public_key_path(),
    )
    .await
    {
        Ok(keys) => keys,
        Err(e) => {
            error!(error = %e, "Failed to prepare VAPID keys.");
            return Err(e.into());
        }
    };
    info!(vapid_public_key = %vapid_keys.public_key, "VAPID keys ready.");

    // --- Notification Service Setup ---
    let subscription_store = Arc::new(SubscriptionStore::new(config.subscription_file()));
    let sender = Arc::new(WebPushSender::new(
        vapid_keys.private_key_pem,
        config.notifications.vapid_email.clone(),
    ));
    let notification_service = Arc::new(NotificationService::new(
        subscription_store.clone(),
        sender,
        config.delivery_timeout(),
        config.notifications.max_concurrent_deliveries,
    ));

    // --- Disk Check Scheduler ---
    let latest_sample = LatestSample::new();
    let detector = Arc::new(WarningDetector::from_config(&config, notification_service.clone()));
    let scheduler = Scheduler::new(
        Arc::new(DiskSampler::from_config(&config)),
        detector,
        latest_sample.clone(),
        config.check_interval(),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx));

    // --- HTTP Server ---
    let app_state = Arc::new(AppState {
        latest_sample,
        subscription_store,
        notification_service,
        vapid_public_key_path: config.vapid_public_key_path(),
    });
    let app = create_axum_router(app_state);

    let addr = SocketAddr::new(
        config.web_server.bind_address.parse()?,
        config.web_server.port,
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "HTTP server listening.");

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    let _ = shutdown_tx.send(());
    if let Err(e) = scheduler_handle.await {
        error!(error = %e, "Disk check scheduler task failed.");
    }

    if let Err(e) = serve_result {
        error!(error = %e, "HTTP server exited with an error.");
        return Err(e.into());
    }
    info!("diskwatch stopped.");
    Ok(())
}
