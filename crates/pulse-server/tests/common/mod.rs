//! Shared helpers: boot a server, drive it with a real WebSocket client.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use pulse_codec::{Envelope, FrameCodec, Header};
use pulse_server::{CloseReason, Connection, ConnectionId, MessageHandler, PulseServer, ServerConfig};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug)]
pub enum Event {
    Connected(ConnectionId),
    Message(ConnectionId, Envelope),
    Disconnected(ConnectionId, Option<CloseReason>),
}

/// Forwards every hook to a channel; optionally answers each message.
pub struct Recorder {
    tx: mpsc::UnboundedSender<Event>,
    reply: Option<Vec<u8>>,
}

impl MessageHandler for Recorder {
    fn on_connect(&self, conn: &Arc<Connection>) {
        let _ = self.tx.send(Event::Connected(conn.id()));
    }

    fn on_message(&self, conn: &Arc<Connection>, envelope: Envelope) {
        if let Some(reply) = &self.reply {
            let _ = conn.reply(&envelope.header, reply);
        }
        let _ = self.tx.send(Event::Message(conn.id(), envelope));
    }

    fn on_disconnect(&self, conn: &Arc<Connection>) {
        let _ = self.tx.send(Event::Disconnected(conn.id(), conn.close_reason()));
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub server: Arc<PulseServer>,
    pub events: mpsc::UnboundedReceiver<Event>,
    pub accept_loop: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn boot(config: ServerConfig) -> Self {
        Self::boot_with(config, None).await
    }

    pub async fn boot_with(config: ServerConfig, reply: Option<&[u8]>) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let handler = Recorder {
            tx,
            reply: reply.map(<[u8]>::to_vec),
        };
        let server = Arc::new(PulseServer::new(config, Arc::new(handler), FrameCodec::default()));
        let (addr, accept_loop) = server.listen().await.unwrap();
        Self {
            addr,
            server,
            events,
            accept_loop,
        }
    }

    pub async fn connect(&self) -> WsStream {
        let (ws, _) = timeout(TIMEOUT, connect_async(format!("ws://{}/ws", self.addr)))
            .await
            .expect("connect timed out")
            .expect("connect failed");
        ws
    }

    pub async fn next_event(&mut self) -> Event {
        timeout(TIMEOUT, self.events.recv())
            .await
            .expect("no server event in time")
            .expect("event channel closed")
    }

    /// Skip events until a message arrives.
    pub async fn next_message(&mut self) -> (ConnectionId, Envelope) {
        loop {
            if let Event::Message(id, env) = self.next_event().await {
                return (id, env);
            }
        }
    }

    /// Skip events until `id` disconnects; returns its close reason.
    pub async fn disconnected(&mut self, id: ConnectionId) -> Option<CloseReason> {
        loop {
            if let Event::Disconnected(got, reason) = self.next_event().await {
                if got == id {
                    return reason;
                }
            }
        }
    }

    pub async fn wait_for_connections(&self, n: usize) {
        timeout(TIMEOUT, async {
            while self.server.connection_count() != n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("connection count never reached");
    }

    pub async fn stop(self) {
        self.server.shutdown().shutdown();
        timeout(Duration::from_secs(15), self.accept_loop)
            .await
            .expect("server did not stop")
            .unwrap();
    }
}

pub async fn send(ws: &mut WsStream, header: &Header, payload: &[u8]) {
    let frame = FrameCodec::default().encode(header, payload).unwrap();
    ws.send(Message::Binary(frame.into())).await.unwrap();
}

/// Next application frame, skipping control frames. `None` once closed.
pub async fn recv(ws: &mut WsStream) -> Option<Envelope> {
    loop {
        match timeout(TIMEOUT, ws.next()).await.expect("no frame in time") {
            Some(Ok(Message::Binary(data))) => return Some(FrameCodec::default().decode(&data).unwrap()),
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
            Some(Ok(Message::Text(text))) => panic!("unexpected text frame: {text}"),
            Some(Ok(Message::Close(_)) | Err(_)) | None => return None,
        }
    }
}

/// Read until the server closes the socket.
pub async fn expect_closed(ws: &mut WsStream) {
    timeout(TIMEOUT, async {
        while let Some(Ok(msg)) = ws.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    })
    .await
    .expect("server never closed the connection");
}
