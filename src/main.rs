//! Ragline HTTP server entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mimalloc::MiMalloc;
use tokio::net::TcpListener;
use tokio::signal;

use ragline::clock::SystemClock;
use ragline::config::Config;
use ragline::constants::STUB_EMBEDDING_DIM;
use ragline::embedding::{EmbeddingProvider, HttpEmbeddingProvider, StubEmbeddingProvider};
use ragline::gateway::{HandlerState, check_health, create_router_with_state};
use ragline::generation::{GenaiGenerator, Generator, MockGenerator};
use ragline::lifecycle::MaintenanceTasks;
use ragline::service::QueryService;
use ragline::vectordb::QdrantStore;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::args().any(|arg| arg == "--health-check") {
        std::process::exit(run_health_check().await);
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    config.validate()?;
    let addr: SocketAddr = config.socket_addr().parse()?;

    tracing::info!(
        bind_addr = %config.bind_addr,
        port = config.port,
        qdrant_url = %config.qdrant_url,
        collection = %config.collection,
        "Ragline starting"
    );

    let store = Arc::new(
        QdrantStore::new(config.qdrant_url.clone(), config.collection.clone())
            .with_text_field(config.text_field.clone()),
    );

    let provider: Arc<dyn EmbeddingProvider> = match &config.embedding_url {
        Some(url) => Arc::new(HttpEmbeddingProvider::new(
            url.clone(),
            config.embedding_model.clone(),
            config.embedding_api_key.clone(),
            config.embedding_timeout,
        )?),
        None => {
            tracing::warn!("No RAGLINE_EMBEDDING_URL configured, running stub embedder");
            Arc::new(StubEmbeddingProvider::new(STUB_EMBEDDING_DIM))
        }
    };

    let generator: Arc<dyn Generator> = if config.mock_provider {
        tracing::warn!("RAGLINE_MOCK_PROVIDER set, answers come from the mock generator");
        Arc::new(MockGenerator::new())
    } else {
        Arc::new(GenaiGenerator::new(config.generation_model.clone()))
    };

    let service = QueryService::build(&config, store, provider, generator, SystemClock::shared());
    let tasks = MaintenanceTasks::start(
        &service,
        config.result_cache.sweep_interval,
        config.pool.health_check_interval,
    );

    let app = create_router_with_state(HandlerState::new(service.clone()));

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tasks.stop().await;
    service.shutdown().await;

    tracing::info!("Ragline shutdown complete");
    Ok(())
}

/// Container health check; runs on the server's own runtime.
async fn run_health_check() -> i32 {
    let port = std::env::var("RAGLINE_PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(8080);

    let base_url = format!("http://127.0.0.1:{}", port);
    if check_health(&base_url, Duration::from_secs(1)).await {
        0
    } else {
        1
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
