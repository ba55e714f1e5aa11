//! insights-server: CDS Hooks and clinical insight API binary entrypoint.

use std::net::SocketAddr;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use insights_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; real deployments use the environment
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = Config::from_env().context("Invalid configuration")?;

    if config.llm_api_token.is_some() {
        tracing::info!(model = %config.llm_model, "LLM token configured, AI features enabled");
    } else {
        tracing::warn!("LLM_API_TOKEN not set, AI endpoints will answer 500");
    }
    match (&config.fhir_base_url, &config.fhir_app_id) {
        (Some(base), Some(app_id)) => {
            tracing::info!(base_url = %base, app_id = %app_id, "FHIR server configured")
        }
        _ => tracing::warn!("FHIR_BASE_URL or FHIR_APP_ID not set, FHIR endpoints will answer 500"),
    }
    tracing::info!(
        concurrency = config.queue.concurrency,
        interval_cap = config.queue.interval_cap,
        interval_ms = config.queue.interval.as_millis() as u64,
        "AI queue limits"
    );
    tracing::info!("Rate limiting: {} requests/second", config.rate_limit_rps);

    let app = insights_server::build_app(&config);

    let addr: SocketAddr = config
        .bind_address
        .parse()
        .with_context(|| format!("Invalid bind address '{}'", config.bind_address))?;
    tracing::info!("Starting insights server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
