//! Velero Sentinel binary entrypoint.

use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use sentinel_common::config::AppConfig;
use sentinel_engine::EventProcessor;
use sentinel_notifier::Pipeline;

use sentinel_api::routes::create_router;
use sentinel_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = AppConfig::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("sentinel=info,sentinel_api=info,sentinel_engine=info,sentinel_notifier=info,tower_http=info")
    });
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if config.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Velero Sentinel...");

    // Build every notifier before anything runs
    let notifier_config = config.notifier_config()?;
    let pipeline = Pipeline::new(&notifier_config)?;
    let notifiers: Vec<String> = pipeline
        .notifier_names()
        .into_iter()
        .map(String::from)
        .collect();
    tracing::info!(notifiers = ?notifiers, "Notification pipeline configured");

    let (intake, tasks) = pipeline.run();
    let state = AppState::new(EventProcessor::new(intake), notifiers);

    // Build router
    let app = create_router(state).layer(TraceLayer::new_for_http());

    // Start server
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("API server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router owned the last intake sender; the pipeline is draining now.
    tracing::warn!("Received shutdown command");
    tasks.join().await;
    tracing::warn!("Server shutdown complete");

    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
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
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
