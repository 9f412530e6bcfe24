//! Call Bot
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing and, if configured, the Prometheus exporter
//! 3. Create the data directory and the cursor file
//! 4. Discover the homeserver and RTC foci
//! 5. Resolve identity and select the RTC focus
//! 6. Register built-in commands
//! 7. Run the sync loop until SIGINT/SIGTERM

#![warn(clippy::pedantic)]

use bot_service::bot::{Bot, SyncSettings};
use bot_service::calls::CallOrchestrator;
use bot_service::commands::builtin::BuiltinOptions;
use bot_service::commands::{register_builtin_commands, CommandRegistry};
use bot_service::config::{Config, DEFAULT_LOG_FILTER};
use bot_service::cursor::CursorStore;
use bot_service::discovery::discover;
use bot_service::homeserver::{HomeserverApi, MatrixHomeserverClient};
use bot_service::observability::init_metrics_exporter;
use bot_service::rtc::{default_media_connector, SfuTokenClient};
use bot_service::session::bootstrap;
use common::config::ObservabilityConfig;
use common::logging::init_tracing;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            let _ = init_tracing(&ObservabilityConfig {
                log_filter: DEFAULT_LOG_FILTER.to_string(),
                ..ObservabilityConfig::default()
            });
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    init_tracing(&config.observability)?;

    info!("Starting Call Bot");
    info!(
        homeserver_host = %config.homeserver_host,
        data_dir = %config.data_dir.display(),
        command_prefix = %config.command_prefix,
        sync_timeout_ms = config.sync_timeout_ms,
        sync_max_failures = config.sync_max_failures,
        disconnect_on_startup = config.disconnect_on_startup,
        "Configuration loaded successfully"
    );

    if let Some(addr) = &config.observability.metrics_bind_address {
        init_metrics_exporter(addr).map_err(|e| {
            error!(error = %e, "Failed to start metrics exporter");
            e
        })?;
        info!(address = %addr, "Prometheus exporter listening");
    }

    prepare_data_dir(&config.data_dir, &config.cursor_path()).await?;

    let client_config = discover(&config.homeserver_host).await.map_err(|e| {
        error!(error = %e, "Discovery failed");
        e
    })?;

    let homeserver: Arc<dyn HomeserverApi> = Arc::new(MatrixHomeserverClient::new(
        &client_config.homeserver_base_url,
        config.access_token.clone(),
        config.http_timeout,
    )?);

    let session = match bootstrap(homeserver.as_ref(), &client_config).await {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "Session bootstrap failed");
            homeserver.close().await;
            return Err(e.into());
        }
    };

    let sfu = Arc::new(SfuTokenClient::new(config.http_timeout)?);
    let calls = CallOrchestrator::new(
        Arc::clone(&homeserver),
        sfu,
        default_media_connector(),
        session,
    );

    let mut registry = CommandRegistry::new();
    register_builtin_commands(
        &mut registry,
        &BuiltinOptions {
            allowed_senders: config.allowed_senders.clone(),
            media_dir: config.media_dir.clone(),
        },
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        signal_cancel.cancel();
    });

    let bot = Bot::new(
        homeserver,
        calls,
        registry,
        CursorStore::new(config.cursor_path()),
        SyncSettings::from_config(&config),
    );
    bot.run(cancel).await?;

    info!("Call Bot shutdown complete");
    Ok(())
}

/// Create the data directory and an empty cursor file if they are missing.
/// The cursor store only overwrites an existing file.
async fn prepare_data_dir(data_dir: &Path, cursor_path: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(data_dir).await?;
    if !tokio::fs::try_exists(cursor_path).await? {
        tokio::fs::write(cursor_path, "").await?;
        info!(path = %cursor_path.display(), "Created cursor file");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
