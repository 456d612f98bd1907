#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use axum::{Router, routing::get};
use mien_api::{construct_router, state::State};
use std::sync::Arc;

mod config;
mod telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    telemetry::init_telemetry()?;

    tracing::info!("Starting Mien Fabric Classifier service");

    let config = config::Config::from_env()?;
    tracing::info!(
        model_path = %config.serving.model_path.display(),
        format = %config.serving.format(),
        "Loaded configuration"
    );

    let classifier = match mien_serving::bootstrap(&config.serving).await {
        Ok(classifier) => classifier,
        Err(e) => {
            tracing::error!(kind = e.kind().as_str(), "Startup failed: {}", e);
            return Err(e.into());
        }
    };

    let state = Arc::new(State::new(classifier, config.max_upload_bytes)?);

    let app = Router::new()
        .merge(construct_router(state))
        .route("/metrics", get(telemetry::handler));

    let addr = config.addr();
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {}", e);
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
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
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

    tracing::info!("Shutdown signal received");
}
