//! `PulseClient`: connect, three session loops, bounded reconnect.
//!
//! Each session runs a read loop, a write loop and a heartbeat loop that
//! share one cancellation token. Whichever loop notices a failure cancels
//! it, the other two wind down, and the session supervisor reports the
//! disconnect. [`PulseClient::run`] then reconnects according to the
//! backoff policy.

use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use pulse_codec::header::next_msg_id;
use pulse_codec::{FrameCodec, MessageType};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::backoff::{self, BackoffPolicy};
use crate::config::ClientConfig;
use crate::errors::{ClientError, Result};
use crate::handler::ClientHandler;
use crate::state::ClientState;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Bound on the closing handshake when a session ends.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// One live session. Dropping it leaves the loops running.
#[derive(Debug)]
pub struct Session {
    done: CancellationToken,
    supervisor: JoinHandle<()>,
}

impl Session {
    /// Stop the session loops.
    pub fn close(&self) {
        self.done.cancel();
    }

    /// Whether the session loops have been told to stop.
    pub fn is_closed(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Wait until every loop has exited and the disconnect was reported.
    pub async fn closed(self) {
        if let Err(e) = self.supervisor.await {
            warn!(error = %e, "session supervisor failed");
        }
    }
}

/// WebSocket client for the Pulse application protocol.
pub struct PulseClient {
    config: ClientConfig,
    codec: Arc<FrameCodec>,
    handler: Arc<dyn ClientHandler>,
    backoff: Box<dyn BackoffPolicy>,
    state: Arc<watch::Sender<ClientState>>,
    outbound_tx: mpsc::Sender<Vec<u8>>,
    outbound_rx: Arc<Mutex<mpsc::Receiver<Vec<u8>>>>,
    msg_id: AtomicU16,
    stop: CancellationToken,
}

impl PulseClient {
    /// Create a client. Nothing is dialed until [`PulseClient::connect`] or
    /// [`PulseClient::run`].
    pub fn new(config: ClientConfig, codec: FrameCodec, handler: Arc<dyn ClientHandler>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (state, _) = watch::channel(ClientState::Disconnected);
        let backoff = backoff::from_config(&config.reconnect);
        Self {
            config,
            codec: Arc::new(codec),
            handler,
            backoff,
            state: Arc::new(state),
            outbound_tx,
            outbound_rx: Arc::new(Mutex::new(outbound_rx)),
            msg_id: AtomicU16::new(0),
            stop: CancellationToken::new(),
        }
    }

    /// Replace the reconnect policy from the config.
    #[must_use]
    pub fn with_backoff(mut self, policy: impl BackoffPolicy + 'static) -> Self {
        self.backoff = Box::new(policy);
        self
    }

    /// Current state.
    pub fn state(&self) -> ClientState {
        *self.state.borrow()
    }

    /// Observe state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ClientState> {
        self.state.subscribe()
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn set_state(&self, next: ClientState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(from = %prev, to = %next, "client state");
        }
    }

    // ── Sending ─────────────────────────────────────────────────────

    /// Queue a message with the next message id and codec defaults.
    ///
    /// Never blocks. Returns `false` when the message was dropped: the
    /// queue is full, the client is stopped, or encoding failed.
    pub fn send(&self, msg_type: MessageType, type_id: u16, payload: &[u8]) -> bool {
        if self.stop.is_cancelled() {
            return false;
        }
        let msg_id = self.next_msg_id();
        let frame = match self.codec.outbound(msg_type, type_id, msg_id, payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(type_id, error = %e, "failed to encode outbound message");
                return false;
            }
        };
        match self.outbound_tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    type_id,
                    msg_id,
                    capacity = self.config.queue_capacity,
                    "outbound queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Fire-and-forget Notify.
    pub fn notify(&self, type_id: u16, payload: &[u8]) -> bool {
        self.send(MessageType::Notify, type_id, payload)
    }

    /// Next outbound message id, wrapping modulo 8192.
    ///
    /// The first id is 1; server pushes follow the same sequence.
    pub fn next_msg_id(&self) -> u16 {
        match self
            .msg_id
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| Some(next_msg_id(id)))
        {
            Ok(prev) | Err(prev) => next_msg_id(prev),
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Dial, handshake and start the session loops.
    #[instrument(skip(self), fields(addr = %self.config.addr))]
    pub async fn connect(&self) -> Result<Session> {
        if self.stop.is_cancelled() {
            return Err(ClientError::Stopped);
        }
        self.set_state(ClientState::Connecting);
        let url = self.config.url();
        let dialed = tokio::select! {
            () = self.stop.cancelled() => Err(ClientError::Stopped),
            dialed = time::timeout(self.config.connect_timeout, connect_async(url.as_str())) => match dialed {
                Err(_) => Err(ClientError::Timeout("connect")),
                Ok(Err(e)) => Err(ClientError::Connect {
                    addr: self.config.addr.clone(),
                    reason: e.to_string(),
                }),
                Ok(Ok((ws, _))) => Ok(ws),
            },
        };
        let ws = match dialed {
            Ok(ws) => ws,
            Err(e) => {
                self.set_state(ClientState::Disconnected);
                return Err(e);
            }
        };

        info!(%url, "connected");
        self.set_state(ClientState::Connected);
        self.handler.on_connected();
        Ok(self.start_session(ws))
    }

    fn start_session(&self, ws: WsStream) -> Session {
        let done = self.stop.child_token();
        let (sink, source) = ws.split();
        let (ping_tx, ping_rx) = mpsc::channel(1);

        let mut loops = JoinSet::new();
        let _ = loops.spawn(write_loop(sink, self.outbound_rx.clone(), ping_rx, done.clone()));
        let _ = loops.spawn(read_loop(
            source,
            self.codec.clone(),
            self.handler.clone(),
            done.clone(),
            self.config.read_timeout,
        ));
        let _ = loops.spawn(heartbeat_loop(ping_tx, done.clone(), self.config.ping_period));

        let state = self.state.clone();
        let handler = self.handler.clone();
        let supervisor = tokio::spawn(async move {
            while loops.join_next().await.is_some() {}
            let _ = state.send_replace(ClientState::Disconnected);
            handler.on_disconnected();
            info!("disconnected");
        });
        Session { done, supervisor }
    }

    /// Wait out the backoff and dial again until a session comes up or the
    /// policy gives up.
    pub async fn reconnect(&self) -> Result<Session> {
        let mut attempt = 0;
        loop {
            let Some(delay) = self.backoff.delay(attempt) else {
                warn!(attempts = attempt, "giving up reconnecting");
                return Err(ClientError::ReconnectExhausted { attempts: attempt });
            };
            info!(attempt = attempt + 1, ?delay, "reconnecting");
            tokio::select! {
                () = self.stop.cancelled() => return Err(ClientError::Stopped),
                () = time::sleep(delay) => {}
            }
            match self.connect().await {
                Ok(session) => return Ok(session),
                Err(ClientError::Stopped) => return Err(ClientError::Stopped),
                Err(e) => warn!(attempt = attempt + 1, error = %e, "reconnect failed"),
            }
            attempt += 1;
        }
    }

    /// Connect, then keep the client connected until shutdown or until
    /// reconnecting gives up.
    ///
    /// The first connect is not retried. Returns `Ok` after
    /// [`PulseClient::shutdown`].
    pub async fn run(&self) -> Result<()> {
        let mut session = match self.connect().await {
            Ok(session) => session,
            Err(ClientError::Stopped) => return self.finish(Ok(())),
            Err(e) => return self.finish(Err(e)),
        };
        loop {
            session.closed().await;
            if self.stop.is_cancelled() {
                return self.finish(Ok(()));
            }
            session = match self.reconnect().await {
                Ok(session) => session,
                Err(ClientError::Stopped) => return self.finish(Ok(())),
                Err(e) => return self.finish(Err(e)),
            };
        }
    }

    fn finish(&self, result: Result<()>) -> Result<()> {
        self.stop.cancel();
        self.set_state(ClientState::Stopped);
        result
    }

    /// Stop the current session and any pending reconnect.
    pub fn shutdown(&self) {
        info!("client shutting down");
        self.stop.cancel();
    }
}

async fn write_loop(
    mut sink: WsSink,
    outbound: Arc<Mutex<mpsc::Receiver<Vec<u8>>>>,
    mut pings: mpsc::Receiver<()>,
    done: CancellationToken,
) {
    // Held for the whole session; the next session takes it over.
    let mut outbound = outbound.lock().await;
    loop {
        let message = tokio::select! {
            () = done.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => Message::Binary(Bytes::from(frame)),
                None => break,
            },
            Some(()) = pings.recv() => {
                trace!("sending ping");
                Message::Ping(Bytes::new())
            }
        };
        // A server that stops reading parks the send; the session must
        // still end when another loop gives up.
        let written = tokio::select! {
            () = done.cancelled() => {
                debug!("session ended mid-write, dropping socket");
                return;
            }
            written = sink.send(message) => written,
        };
        if let Err(e) = written {
            warn!(error = %e, "write failed");
            break;
        }
    }
    done.cancel();
    let _ = time::timeout(CLOSE_GRACE, sink.close()).await;
    debug!("writer stopped");
}

async fn read_loop(
    mut source: WsSource,
    codec: Arc<FrameCodec>,
    handler: Arc<dyn ClientHandler>,
    done: CancellationToken,
    read_timeout: Duration,
) {
    loop {
        let next = tokio::select! {
            () = done.cancelled() => break,
            next = time::timeout(read_timeout, source.next()) => next,
        };
        match next {
            Err(_) => {
                warn!(?read_timeout, "read deadline expired");
                break;
            }
            Ok(None) => {
                info!("server closed the connection");
                break;
            }
            Ok(Some(Err(e))) => {
                warn!(error = %e, "read failed");
                break;
            }
            Ok(Some(Ok(Message::Binary(data)))) => match codec.decode(&data) {
                Ok(envelope) => handler.on_message(envelope),
                Err(e) => warn!(len = data.len(), error = %e, "undecodable frame from server"),
            },
            Ok(Some(Ok(Message::Close(frame)))) => {
                debug!(?frame, "server sent close");
                break;
            }
            // Any other frame just refreshes the deadline.
            Ok(Some(Ok(_))) => {}
        }
    }
    done.cancel();
    debug!("reader stopped");
}

async fn heartbeat_loop(pings: mpsc::Sender<()>, done: CancellationToken, period: Duration) {
    let period = period.max(Duration::from_millis(1));
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = done.cancelled() => break,
            _ = ticker.tick() => {
                // A full slot means the previous ping is still pending.
                if let Err(mpsc::error::TrySendError::Closed(())) = pings.try_send(()) {
                    break;
                }
            }
        }
    }
    done.cancel();
}
