//! Readiness-multiplexed backend built on `mio`.
//!
//! A small fixed set of poll threads serves every connection. Each thread
//! owns one [`Poll`]; connections are assigned round-robin at accept time.
//! Handlers run inline on the poll thread and must not block.
//!
//! mio is edge-triggered, so a readable event drains the socket until
//! `WouldBlock`, which is what re-arms it. Writes happen on the caller's
//! thread; when the kernel buffer is full the remainder stays in the
//! WebSocket write buffer and the socket is re-registered for writable
//! interest until the poll thread flushes it.

use std::collections::HashMap;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use mio::net::TcpStream as MioStream;
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use parking_lot::Mutex;
use pulse_settings::{BackendKind, OverflowPolicy};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{self, Error as WsError, HandshakeError, Message, WebSocket};
use tracing::{debug, error, info, instrument, warn};

use super::{IoBackend, ws_config};
use crate::config::ServerConfig;
use crate::connection::{CloseReason, Connection, Transport};
use crate::errors::{Result, ServerError};
use crate::lifecycle::ServerCore;
use crate::queue::PushOutcome;

const WAKE: Token = Token(0);
const POLL_TICK: Duration = Duration::from_millis(100);
const EVENTS_CAPACITY: usize = 1024;
const MIN_WRITE_BUFFER: usize = 256 * 1024;
const MAX_WRITE_BUFFER: usize = 64 * 1024 * 1024;

type Ws = WebSocket<MioStream>;

/// Upgraded socket shared by its connection (writes) and its poll thread (reads).
struct Socket {
    ws: Mutex<Ws>,
    /// Duplicate handle used for socket options and shutdown without the ws lock.
    control: std::net::TcpStream,
    token: Token,
    registry: Arc<Registry>,
    write_pending: AtomicBool,
    policy: OverflowPolicy,
    capacity: usize,
}

impl Socket {
    fn write(&self, message: Message) -> Result<PushOutcome> {
        let mut ws = self.ws.lock();
        match ws.send(message) {
            Ok(()) => Ok(PushOutcome::Queued),
            Err(WsError::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => {
                self.arm_writable(&mut ws)?;
                Ok(PushOutcome::Queued)
            }
            // The WebSocket buffer cannot evict what it already framed.
            Err(WsError::WriteBufferFull(_)) => Ok(match self.policy {
                OverflowPolicy::Disconnect => PushOutcome::Full,
                OverflowPolicy::DropOldest | OverflowPolicy::DropNewest => PushOutcome::DroppedNewest,
            }),
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(PushOutcome::Closed),
            Err(e) => Err(ServerError::Write(e.to_string())),
        }
    }

    fn arm_writable(&self, ws: &mut Ws) -> io::Result<()> {
        if !self.write_pending.swap(true, Ordering::AcqRel) {
            self.registry
                .reregister(ws.get_mut(), self.token, Interest::READABLE | Interest::WRITABLE)?;
        }
        Ok(())
    }

    /// Push buffered bytes out, dropping writable interest once empty.
    fn flush(&self) -> Result<()> {
        let mut ws = self.ws.lock();
        match ws.flush() {
            Ok(()) => {
                if self.write_pending.swap(false, Ordering::AcqRel) {
                    self.registry
                        .reregister(ws.get_mut(), self.token, Interest::READABLE)?;
                }
                Ok(())
            }
            Err(WsError::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(ServerError::Write(e.to_string())),
        }
    }
}

struct PollTransport(Arc<Socket>);

impl Transport for PollTransport {
    fn send_frame(&self, frame: Vec<u8>) -> Result<PushOutcome> {
        self.0.write(Message::Binary(Bytes::from(frame)))
    }

    fn ping(&self) -> Result<()> {
        match self.0.write(Message::Ping(Bytes::new()))? {
            PushOutcome::Closed => Err(ServerError::Closed),
            _ => Ok(()),
        }
    }

    fn close(&self) {
        // The poll thread may be mid-read; skip the Close frame rather than wait.
        if let Some(mut ws) = self.0.ws.try_lock() {
            let _ = ws.close(None);
            let _ = ws.flush();
        }
        let _ = self.0.control.shutdown(Shutdown::Both);
    }

    fn capacity(&self) -> usize {
        self.0.capacity
    }
}

struct Entry {
    socket: Arc<Socket>,
    conn: Arc<Connection>,
}

/// The half of a poll thread visible to the accept path.
struct WorkerShared {
    registry: Arc<Registry>,
    waker: Waker,
    pending: Mutex<Vec<Entry>>,
    stop: AtomicBool,
}

struct Worker {
    poll: Poll,
    shared: Arc<WorkerShared>,
    core: Arc<ServerCore>,
    entries: HashMap<Token, Entry>,
    read_timeout: Duration,
    ping_period: Duration,
    last_ping: Instant,
}

impl Worker {
    fn run(mut self) {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        loop {
            if let Err(e) = self.poll.poll(&mut events, Some(POLL_TICK)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %e, "poll failed, stopping poll thread");
                break;
            }
            if self.shared.stop.load(Ordering::Acquire) {
                break;
            }
            self.adopt_pending();
            for event in &events {
                let token = event.token();
                if token == WAKE {
                    continue;
                }
                self.handle(
                    token,
                    event.is_error(),
                    event.is_readable() || event.is_read_closed(),
                    event.is_writable(),
                );
            }
            self.scan();
        }

        self.adopt_pending();
        let tokens: Vec<Token> = self.entries.keys().copied().collect();
        for token in tokens {
            self.retire(token, CloseReason::Shutdown);
        }
        debug!("poll thread stopped");
    }

    fn adopt_pending(&mut self) {
        let adopted = std::mem::take(&mut *self.shared.pending.lock());
        for entry in adopted {
            let token = entry.socket.token;
            let (socket, conn) = (entry.socket.clone(), entry.conn.clone());
            let _ = self.entries.insert(token, entry);
            // The handshake may have buffered frames that will never raise an event.
            if let Some(reason) = drain(&self.core, &socket, &conn) {
                self.retire(token, reason);
            }
        }
    }

    fn handle(&mut self, token: Token, error: bool, readable: bool, writable: bool) {
        let Some(entry) = self.entries.get(&token) else {
            return;
        };
        let (socket, conn) = (entry.socket.clone(), entry.conn.clone());

        if error {
            debug!(conn_id = %conn.id(), "socket error event");
            self.retire(token, CloseReason::ReadError);
            return;
        }
        if writable {
            if let Err(e) = socket.flush() {
                warn!(conn_id = %conn.id(), error = %e, "flush failed");
                self.retire(token, CloseReason::WriteError);
                return;
            }
        }
        if readable {
            if let Some(reason) = drain(&self.core, &socket, &conn) {
                self.retire(token, reason);
            }
        }
    }

    /// Deadline and liveness pass, once per tick.
    fn scan(&mut self) {
        let now = Instant::now();
        let ping_due = now.duration_since(self.last_ping) >= self.ping_period;
        if ping_due {
            self.last_ping = now;
        }
        let mut dead = Vec::new();
        for (token, entry) in &self.entries {
            if entry.conn.is_closed() {
                dead.push((*token, CloseReason::Local));
            } else if entry.conn.idle() > self.read_timeout {
                debug!(conn_id = %entry.conn.id(), "read deadline expired");
                dead.push((*token, CloseReason::Timeout));
            } else if ping_due {
                let _ = entry.conn.ping();
            }
        }
        for (token, reason) in dead {
            self.retire(token, reason);
        }
    }

    /// Deregister and release. Never re-armed afterwards.
    fn retire(&mut self, token: Token, reason: CloseReason) {
        let Some(entry) = self.entries.remove(&token) else {
            return;
        };
        {
            let mut ws = entry.socket.ws.lock();
            if let Err(e) = self.poll.registry().deregister(ws.get_mut()) {
                debug!(conn_id = %entry.conn.id(), error = %e, "deregister failed");
            }
        }
        self.core.release(&entry.conn, reason);
    }
}

/// Read until `WouldBlock`. `Some` means the connection is finished.
fn drain(core: &ServerCore, socket: &Socket, conn: &Arc<Connection>) -> Option<CloseReason> {
    loop {
        if conn.is_closed() {
            return Some(CloseReason::Local);
        }
        let read = socket.ws.lock().read();
        match read {
            Ok(Message::Binary(data)) => {
                if core.deliver(conn, &data).is_err() {
                    return Some(CloseReason::Decode);
                }
            }
            Ok(Message::Text(_)) => {
                if core.protocol_violation(conn, "text frame").is_err() {
                    return Some(CloseReason::Decode);
                }
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => conn.touch(),
            Ok(Message::Close(_)) => return Some(CloseReason::PeerClosed),
            Ok(Message::Frame(_)) => {}
            Err(WsError::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => return None,
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {
                return Some(CloseReason::PeerClosed);
            }
            Err(e) => {
                debug!(conn_id = %conn.id(), error = %e, "read failed");
                return Some(CloseReason::ReadError);
            }
        }
    }
}

/// Upper bound on bytes parked in one connection's WebSocket write buffer.
fn write_buffer_limit(config: &ServerConfig) -> usize {
    config
        .max_message_size
        .saturating_add(16)
        .saturating_mul(config.queue_capacity)
        .clamp(MIN_WRITE_BUFFER, MAX_WRITE_BUFFER)
}

/// `mio` poll threads shared by every connection.
pub struct PollerBackend {
    core: Arc<ServerCore>,
    config: ServerConfig,
    ws_config: WebSocketConfig,
    workers: Vec<Arc<WorkerShared>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    next_worker: AtomicUsize,
    next_token: AtomicUsize,
    stopped: AtomicBool,
}

impl PollerBackend {
    /// Start `config.poller_threads` poll threads.
    ///
    /// Must be called inside a tokio runtime; poll threads enter it so
    /// handlers can spawn tasks.
    pub fn new(core: Arc<ServerCore>, config: &ServerConfig) -> Result<Self> {
        let runtime = Handle::try_current().map_err(io::Error::other)?;
        let count = config.poller_threads.max(1);
        let mut workers = Vec::with_capacity(count);
        let mut threads = Vec::with_capacity(count);

        for i in 0..count {
            let poll = Poll::new()?;
            let waker = Waker::new(poll.registry(), WAKE)?;
            let shared = Arc::new(WorkerShared {
                registry: Arc::new(poll.registry().try_clone()?),
                waker,
                pending: Mutex::new(Vec::new()),
                stop: AtomicBool::new(false),
            });
            let worker = Worker {
                poll,
                shared: shared.clone(),
                core: core.clone(),
                entries: HashMap::new(),
                read_timeout: config.read_timeout,
                ping_period: config.ping_period,
                last_ping: Instant::now(),
            };
            let rt = runtime.clone();
            let thread = std::thread::Builder::new()
                .name(format!("pulse-poll-{i}"))
                .spawn(move || {
                    let _guard = rt.enter();
                    worker.run();
                })?;
            workers.push(shared);
            threads.push(thread);
        }
        info!(threads = count, "poller backend started");

        Ok(Self {
            core,
            config: config.clone(),
            ws_config: ws_config(config).max_write_buffer_size(write_buffer_limit(config)),
            workers,
            threads: Mutex::new(threads),
            next_worker: AtomicUsize::new(0),
            next_token: AtomicUsize::new(1),
            stopped: AtomicBool::new(false),
        })
    }

    fn next_worker(&self) -> &Arc<WorkerShared> {
        let i = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        &self.workers[i]
    }
}

#[async_trait]
impl IoBackend for PollerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Poller
    }

    #[instrument(skip(self, stream))]
    async fn accept(&self, stream: TcpStream, peer: SocketAddr) -> Result<Arc<Connection>> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(ServerError::Closed);
        }
        // Handshake in blocking mode on a worker, bounded by socket timeouts.
        let std_stream = stream.into_std()?;
        let control = std_stream.try_clone()?;
        control.set_nonblocking(false)?;
        control.set_read_timeout(Some(self.config.handshake_timeout))?;
        control.set_write_timeout(Some(self.config.handshake_timeout))?;
        let _ = control.set_nodelay(true);

        let mio_stream = MioStream::from_std(std_stream);
        let ws_config = self.ws_config;
        let ws = tokio::task::spawn_blocking(move || {
            tungstenite::accept_with_config(mio_stream, Some(ws_config))
        })
        .await
        .map_err(|e| ServerError::Upgrade(e.to_string()))?
        .map_err(|e| match e {
            HandshakeError::Interrupted(_) => ServerError::Timeout("handshake"),
            HandshakeError::Failure(e) => ServerError::Upgrade(e.to_string()),
        })?;

        control.set_read_timeout(None)?;
        control.set_write_timeout(None)?;
        control.set_nonblocking(true)?;

        let worker = self.next_worker();
        let token = Token(self.next_token.fetch_add(1, Ordering::Relaxed));
        let socket = Arc::new(Socket {
            ws: Mutex::new(ws),
            control,
            token,
            registry: worker.registry.clone(),
            write_pending: AtomicBool::new(false),
            policy: self.config.overflow_policy,
            capacity: self.config.queue_capacity,
        });
        {
            let mut ws = socket.ws.lock();
            worker
                .registry
                .register(ws.get_mut(), token, Interest::READABLE)?;
        }

        let conn = self.core.attach(peer, Box::new(PollTransport(socket.clone())));
        worker.pending.lock().push(Entry {
            socket,
            conn: conn.clone(),
        });
        if let Err(e) = worker.waker.wake() {
            warn!(conn_id = %conn.id(), error = %e, "failed to wake poll thread");
        }
        Ok(conn)
    }

    async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        for worker in &self.workers {
            worker.stop.store(true, Ordering::Release);
            if let Err(e) = worker.waker.wake() {
                warn!(error = %e, "failed to wake poll thread");
            }
        }
        let threads = std::mem::take(&mut *self.threads.lock());
        let joined = tokio::task::spawn_blocking(move || {
            threads.into_iter().map(JoinHandle::join).filter(|joined| joined.is_err()).count()
        })
        .await;
        match joined {
            Ok(0) => info!("poller backend stopped"),
            Ok(panicked) => error!(panicked, "poll threads panicked"),
            Err(e) => error!(error = %e, "failed to join poll threads"),
        }
    }
}
