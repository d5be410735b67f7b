//! `PulseServer`: accept loop, heartbeat monitor and HTTP side port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use pulse_codec::FrameCodec;
use pulse_settings::BackendKind;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::backend::{self, IoBackend};
use crate::config::ServerConfig;
use crate::connection::CloseReason;
use crate::errors::{Result, ServerError};
use crate::handler::MessageHandler;
use crate::health::{self, HealthResponse};
use crate::heartbeat::HeartbeatMonitor;
use crate::lifecycle::ServerCore;
use crate::metrics::WS_UPGRADE_FAILURES_TOTAL;
use crate::registry::Registry;
use crate::shutdown::ShutdownCoordinator;

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Bound on waiting for in-flight handshakes at shutdown.
const HANDSHAKE_DRAIN: Duration = Duration::from_secs(2);

/// Shared state for the HTTP side port.
#[derive(Clone)]
pub struct AppState {
    /// Live connections.
    pub registry: Arc<Registry>,
    /// When the server was created.
    pub start_time: Instant,
    /// Configured backend.
    pub backend: BackendKind,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The WebSocket application-protocol server.
pub struct PulseServer {
    config: ServerConfig,
    core: Arc<ServerCore>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    backend: Mutex<Option<Arc<dyn IoBackend>>>,
    metrics: Option<PrometheusHandle>,
}

impl PulseServer {
    /// Create a server. Nothing is bound until [`PulseServer::listen`].
    pub fn new(config: ServerConfig, handler: Arc<dyn MessageHandler>, codec: FrameCodec) -> Self {
        let core = Arc::new(ServerCore::new(
            Registry::new(),
            handler,
            Arc::new(codec),
            config.decode_error_policy,
        ));
        Self {
            config,
            core,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            backend: Mutex::new(None),
            metrics: None,
        }
    }

    /// Serve `/metrics` from this handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Bind the listener and start serving.
    ///
    /// Returns the bound address and the accept-loop task, which finishes
    /// after shutdown has closed every connection. A bind failure is the
    /// only fatal error; per-connection failures never stop the loop. A
    /// server that was already shut down refuses with `Closed`.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>)> {
        if self.shutdown.is_shutting_down() {
            return Err(ServerError::Closed);
        }
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local = listener.local_addr()?;

        let backend = backend::build(self.core.clone(), &self.config)?;
        *self.backend.lock() = Some(backend.clone());

        let cancel = self.shutdown.token();
        let monitor = HeartbeatMonitor::new(
            self.core.registry().clone(),
            self.config.liveness_timeout,
            self.config.heartbeat_period,
        )
        .with_ping_on_sweep(self.config.ping_on_sweep);
        let monitor = tokio::spawn(monitor.run(cancel.clone()));

        info!(
            addr = %local,
            backend = %self.config.backend,
            liveness_timeout = ?self.config.liveness_timeout,
            heartbeat_period = ?self.config.heartbeat_period,
            "pulse server listening"
        );
        let handle = tokio::spawn(accept_loop(
            listener,
            backend,
            self.core.clone(),
            cancel,
            monitor,
        ));
        Ok((local, handle))
    }

    /// Router for the HTTP side port.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: self.core.registry().clone(),
            start_time: self.start_time,
            backend: self.config.backend,
            metrics: self.metrics.clone(),
        };
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    /// Serve [`PulseServer::router`] on `addr` until shutdown.
    pub async fn serve_http(&self, addr: &str) -> Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_owned(),
                source,
            })?;
        let local = listener.local_addr()?;
        let router = self.router();
        let cancel = self.shutdown.token();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(cancel.cancelled_owned())
                .await
            {
                warn!(error = %e, "http side port failed");
            }
        });
        info!(addr = %local, "health endpoint listening");
        Ok((local, handle))
    }

    /// Live connections.
    pub fn registry(&self) -> &Arc<Registry> {
        self.core.registry()
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The running backend, once listening.
    pub fn backend(&self) -> Option<Arc<dyn IoBackend>> {
        self.backend.lock().clone()
    }

    /// Registered connections.
    pub fn connection_count(&self) -> usize {
        self.core.registry().len()
    }
}

async fn accept_loop(
    listener: TcpListener,
    backend: Arc<dyn IoBackend>,
    core: Arc<ServerCore>,
    cancel: CancellationToken,
    monitor: JoinHandle<crate::heartbeat::HeartbeatResult>,
) {
    let handshakes = TaskTracker::new();
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(%peer, error = %e, "set_nodelay failed");
                    }
                    let backend = backend.clone();
                    let _ = handshakes.spawn(async move {
                        if let Err(e) = backend.accept(stream, peer).await {
                            counter!(WS_UPGRADE_FAILURES_TOTAL).increment(1);
                            warn!(%peer, error = %e, "websocket upgrade failed");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
    drop(listener);

    let _ = handshakes.close();
    if tokio::time::timeout(HANDSHAKE_DRAIN, handshakes.wait()).await.is_err() {
        warn!("in-flight handshakes did not finish before shutdown");
    }
    let closed = core.registry().close_all(CloseReason::Shutdown);
    backend.shutdown().await;
    if let Err(e) = monitor.await {
        warn!(error = %e, "heartbeat monitor task failed");
    }
    info!(closed, "pulse server stopped");
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.registry.len(),
        state.backend,
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed".to_owned()),
    }
}
