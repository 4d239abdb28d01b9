use anyhow::Result;
use lpr_service::{api, LprServiceConfig, LprServiceState};
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = telemetry::init_with_service("lpr-service");

    info!(version = common::VERSION, "Starting LPR Service...");

    let config = LprServiceConfig::from_env()?;
    info!(
        bind = %config.bind_addr,
        source = %config.initial_source,
        cooldown_secs = config.cooldown.as_secs(),
        dedup_window_secs = config.dedup_window.as_secs(),
        "LPR Service configuration"
    );

    let state = LprServiceState::from_config(&config).await?;

    let app = api::router(state.clone());

    info!("Binding to {}", config.bind_addr);
    let listener = TcpListener::bind(config.bind_addr).await?;
    info!("LPR Service listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    Ok(())
}

async fn shutdown_signal(state: LprServiceState) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
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
                error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }

    info!("Shutting down gracefully...");
    if let Err(e) = state.shutdown().await {
        error!("Error during shutdown: {}", e);
    }
}
