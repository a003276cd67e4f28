use anyhow::{Context, Result};
use std::future::Future;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod http;
mod upload;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("likenessd starting");

    let config = config::Config::load()?;
    tracing::info!(
        model_dir = %config.artifacts.model_dir.display(),
        listen = %config.listen,
        workers = config.workers,
        "configuration loaded"
    );

    let engine = match engine::spawn_engine(&config) {
        Ok(handle) => handle,
        Err(err) => {
            tracing::error!(error = %err, "engine failed to start; serving without models");
            engine::EngineHandle::unavailable(err.to_string())
        }
    };

    let state = http::AppState {
        engine,
        max_upload_bytes: config.max_upload_bytes,
    };
    let app = http::router(state, config.max_body_bytes);

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    tracing::info!(addr = %listener.local_addr()?, "likenessd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(tokio::signal::ctrl_c()))
        .await?;

    tracing::info!("likenessd shutting down");
    Ok(())
}

/// Resolve once `signal` fires. A signal handler that cannot be installed is
/// logged and the server keeps running without graceful shutdown.
async fn wait_for_shutdown<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(err) = signal.await {
        tracing::warn!(error = %err, "failed to listen for ctrl-c; graceful shutdown disabled");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_on_signal() {
        let done = tokio::time::timeout(Duration::from_millis(200), wait_for_shutdown(async { Ok(()) })).await;
        assert!(done.is_ok());
    }

    #[tokio::test]
    async fn test_failed_handler_keeps_serving() {
        let failing = async { Err(std::io::Error::other("no signal support")) };
        let done = tokio::time::timeout(Duration::from_millis(50), wait_for_shutdown(failing)).await;
        assert!(done.is_err());
    }
}
