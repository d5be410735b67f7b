//! Dedicated-task backend: one read task and one write task per connection.
//!
//! The write task owns the outbound queue and the ping ticker. The read task
//! wraps every read in the read timeout, so any frame, ping or pong refreshes
//! the deadline. Either task failing closes the connection, which cancels
//! the other through the connection's token.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use pulse_settings::BackendKind;
use tokio::net::TcpStream;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async_with_config};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, trace, warn};

use super::{IoBackend, ws_config};
use crate::config::ServerConfig;
use crate::connection::{CloseReason, Connection, Transport};
use crate::errors::{Result, ServerError};
use crate::lifecycle::ServerCore;
use crate::queue::{OutboundQueue, PushOutcome};

/// Bound on the best-effort Close frame written at teardown.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Bound on waiting for connection tasks at shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

enum Outbound {
    Frame(Vec<u8>),
    Ping,
}

struct QueuedTransport {
    queue: Arc<OutboundQueue<Outbound>>,
    cancel: CancellationToken,
}

impl Transport for QueuedTransport {
    fn send_frame(&self, frame: Vec<u8>) -> Result<PushOutcome> {
        Ok(self.queue.push(Outbound::Frame(frame)))
    }

    fn ping(&self) -> Result<()> {
        match self.queue.push(Outbound::Ping) {
            PushOutcome::Closed => Err(ServerError::Closed),
            _ => Ok(()),
        }
    }

    fn close(&self) {
        self.queue.close();
        self.cancel.cancel();
    }

    fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}

/// Spawns a reader and a writer task for every connection.
pub struct TaskBackend {
    core: Arc<ServerCore>,
    config: ServerConfig,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl TaskBackend {
    /// Create the backend.
    pub fn new(core: Arc<ServerCore>, config: &ServerConfig) -> Self {
        Self {
            core,
            config: config.clone(),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl IoBackend for TaskBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Tasks
    }

    #[instrument(skip(self, stream))]
    async fn accept(&self, stream: TcpStream, peer: SocketAddr) -> Result<Arc<Connection>> {
        if self.cancel.is_cancelled() {
            return Err(ServerError::Closed);
        }
        let ws = time::timeout(
            self.config.handshake_timeout,
            accept_async_with_config(stream, Some(ws_config(&self.config))),
        )
        .await
        .map_err(|_| ServerError::Timeout("handshake"))?
        .map_err(|e| ServerError::Upgrade(e.to_string()))?;

        let queue = Arc::new(OutboundQueue::new(self.config.queue_capacity, self.config.overflow_policy));
        let cancel = self.cancel.child_token();
        let transport = QueuedTransport {
            queue: queue.clone(),
            cancel: cancel.clone(),
        };
        let conn = self.core.attach(peer, Box::new(transport));

        let (sink, source) = ws.split();
        let _ = self.tracker.spawn(write_loop(
            self.core.clone(),
            conn.clone(),
            queue,
            sink,
            cancel.clone(),
            self.config.ping_period,
        ));
        let _ = self.tracker.spawn(read_loop(
            self.core.clone(),
            conn.clone(),
            source,
            cancel,
            self.config.read_timeout,
        ));
        Ok(conn)
    }

    async fn shutdown(&self) {
        self.cancel.cancel();
        let _ = self.tracker.close();
        if time::timeout(DRAIN_TIMEOUT, self.tracker.wait()).await.is_err() {
            warn!(remaining = self.tracker.len(), "connection tasks did not stop in time");
        }
        info!("task backend stopped");
    }
}

async fn write_loop(
    core: Arc<ServerCore>,
    conn: Arc<Connection>,
    queue: Arc<OutboundQueue<Outbound>>,
    mut sink: WsSink,
    cancel: CancellationToken,
    ping_period: Duration,
) {
    let mut ticker = time::interval_at(Instant::now() + ping_period, ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let message = tokio::select! {
            () = cancel.cancelled() => break,
            item = queue.pop() => match item {
                Some(Outbound::Frame(frame)) => Message::Binary(Bytes::from(frame)),
                Some(Outbound::Ping) => Message::Ping(Bytes::new()),
                None => break,
            },
            _ = ticker.tick() => {
                trace!(conn_id = %conn.id(), "sending ping");
                Message::Ping(Bytes::new())
            }
        };
        // A peer that stops reading parks the send; closing must still win.
        let written = tokio::select! {
            () = cancel.cancelled() => {
                debug!(conn_id = %conn.id(), "closed mid-write, dropping socket");
                return;
            }
            written = sink.send(message) => written,
        };
        if let Err(e) = written {
            warn!(conn_id = %conn.id(), error = %e, "write failed");
            core.release(&conn, CloseReason::WriteError);
            return;
        }
    }

    // Best effort: the peer may already be gone.
    let _ = time::timeout(CLOSE_GRACE, async {
        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;
    })
    .await;
    debug!(conn_id = %conn.id(), "writer stopped");
}

async fn read_loop(
    core: Arc<ServerCore>,
    conn: Arc<Connection>,
    mut source: WsSource,
    cancel: CancellationToken,
    read_timeout: Duration,
) {
    let reason = loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break CloseReason::Shutdown,
            next = time::timeout(read_timeout, source.next()) => next,
        };
        let message = match next {
            Err(_) => {
                debug!(conn_id = %conn.id(), ?read_timeout, "read deadline expired");
                break CloseReason::Timeout;
            }
            Ok(None) => break CloseReason::PeerClosed,
            Ok(Some(Err(e))) => {
                debug!(conn_id = %conn.id(), error = %e, "read failed");
                break CloseReason::ReadError;
            }
            Ok(Some(Ok(message))) => message,
        };
        match message {
            Message::Binary(data) => {
                if core.deliver(&conn, &data).is_err() {
                    break CloseReason::Decode;
                }
            }
            Message::Text(_) => {
                if core.protocol_violation(&conn, "text frame").is_err() {
                    break CloseReason::Decode;
                }
            }
            Message::Ping(_) | Message::Pong(_) => conn.touch(),
            Message::Close(frame) => {
                debug!(conn_id = %conn.id(), ?frame, "peer sent close");
                break CloseReason::PeerClosed;
            }
            Message::Frame(_) => {}
        }
    };
    core.release(&conn, reason);
}
