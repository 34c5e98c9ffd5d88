//! Test server harness.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ragline::clock::SystemClock;
use ragline::config::Config;
use ragline::embedding::MockEmbeddingProvider;
use ragline::gateway::{HandlerState, create_router_with_state};
use ragline::generation::MockGenerator;
use ragline::service::QueryService;
use ragline::vectordb::MockVectorStore;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const STARTUP_WAIT_TIMEOUT_SECS: u64 = 5;
const STARTUP_POLL_INTERVAL_MS: u64 = 50;

pub const DIM: usize = 8;

/// Unit vector along axis `i`.
pub fn axis(i: usize) -> Vec<f32> {
    let mut v = vec![0.0; DIM];
    v[i] = 1.0;
    v
}

/// Config tuned for fast tests: short batch window and quick retries.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.batcher.flush_delay = Duration::from_millis(5);
    config.pool.acquire_timeout = Duration::from_millis(200);
    config.retry = config
        .retry
        .with_base_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(5));
    config
}

/// Service wired to in-memory mocks, with handles kept for assertions.
pub struct TestStack {
    pub service: QueryService<MockVectorStore>,
    pub provider: Arc<MockEmbeddingProvider>,
    pub store: Arc<MockVectorStore>,
    pub generator: Arc<MockGenerator>,
}

impl TestStack {
    pub fn new(config: Config) -> Self {
        let provider = Arc::new(MockEmbeddingProvider::new());
        let store = Arc::new(MockVectorStore::new());
        let generator = Arc::new(MockGenerator::new());

        let service = QueryService::build(
            &config,
            Arc::clone(&store),
            provider.clone(),
            generator.clone(),
            SystemClock::shared(),
        );

        Self {
            service,
            provider,
            store,
            generator,
        }
    }

    /// Seeds the "summarize hb1" query and its matching bill document.
    pub fn with_hb1(self) -> Self {
        self.provider.set_vector("summarize hb1", axis(0));
        self.store
            .add_document("hb1", "HB1 expands broadband grants for rural counties.", axis(0));
        self
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub stack: TestStack,
    _server_handle: JoinHandle<()>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn wait_for_server_ready(
    addr: SocketAddr,
    timeout: Duration,
    interval: Duration,
) -> Result<(), ServerStartupError> {
    let start = std::time::Instant::now();

    loop {
        if start.elapsed() > timeout {
            return Err(ServerStartupError::Timeout);
        }

        match tokio::net::TcpStream::connect(addr).await {
            Ok(_) => return Ok(()),
            Err(_) => {
                tokio::time::sleep(interval).await;
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerStartupError {
    #[error("Server failed to start within timeout")]
    Timeout,
    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

/// Spawns the HTTP gateway on an ephemeral port in front of `stack`.
///
/// Every external dependency is mocked: the vector store, the embedding
/// provider and the generator all live in memory.
pub async fn spawn_test_server(stack: TestStack) -> Result<TestServer, ServerStartupError> {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
    let local_addr = listener.local_addr()?;

    let app = create_router_with_state(HandlerState::new(stack.service.clone()));
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .unwrap();
    });

    wait_for_server_ready(
        local_addr,
        Duration::from_secs(STARTUP_WAIT_TIMEOUT_SECS),
        Duration::from_millis(STARTUP_POLL_INTERVAL_MS),
    )
    .await?;

    Ok(TestServer {
        addr: local_addr,
        stack,
        _server_handle: server_handle,
        shutdown_tx: Some(shutdown_tx),
    })
}
