//! Server network layer: WebSocket connections and the tick loop
//!
//! Connection tasks never touch simulation state. They decode frames and
//! forward [`ServerMessage`]s to the single loop in [`NetworkServer::run`],
//! which owns the [`SessionManager`]. Outbound notifications go through one
//! unbounded channel per connection, drained by that connection's writer
//! task, so a slow socket never holds up the others.

use crate::config::ServerConfig;
use crate::session_manager::SessionManager;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::protocol::{decode, encode};
use shared::stats::{latency_ms, timestamp};
use shared::{
    HandshakeRequest, HandshakeResponse, InputBatch, InputEvent, ReplicationError, RollingAverage,
    SessionId, StateNotification,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

/// Messages sent from connection tasks to the server loop
#[derive(Debug)]
pub enum ServerMessage {
    Handshake {
        request: HandshakeRequest,
        outbound: mpsc::UnboundedSender<Message>,
        reply: oneshot::Sender<HandshakeResponse>,
    },
    HandshakeComplete {
        session_id: SessionId,
    },
    Input {
        session_id: SessionId,
        events: Vec<InputEvent>,
        /// Client clock when the batch was sent, if it said
        sent_at: Option<f64>,
    },
    Disconnected {
        session_id: SessionId,
    },
    Shutdown,
}

/// Cloneable handle for stopping a running server
#[derive(Debug, Clone)]
pub struct ServerHandle {
    server_tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ServerHandle {
    pub fn shutdown(&self) {
        if self.server_tx.send(ServerMessage::Shutdown).is_err() {
            debug!("Server already stopped");
        }
    }
}

/// WebSocket front end plus the authoritative tick loop
pub struct NetworkServer {
    config: ServerConfig,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    sessions: SessionManager,
    outbound: HashMap<SessionId, mpsc::UnboundedSender<Message>>,
    accept_task: Option<JoinHandle<()>>,
    stats: LoopStats,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl NetworkServer {
    pub async fn bind(config: ServerConfig, sessions: SessionManager) -> shared::Result<Self> {
        let listener = TcpListener::bind(config.address())
            .await
            .map_err(ReplicationError::transport)?;
        let local_addr = listener.local_addr().map_err(ReplicationError::transport)?;
        info!("Server listening on {}", local_addr);

        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            listener: Some(listener),
            local_addr,
            sessions,
            outbound: HashMap::new(),
            accept_task: None,
            stats: LoopStats::default(),
            server_tx,
            server_rx,
        })
    }

    /// Address actually bound, useful when binding port 0
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            server_tx: self.server_tx.clone(),
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Runs until [`ServerHandle::shutdown`] is called
    pub async fn run(&mut self) -> shared::Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| ReplicationError::transport("server is already running"))?;
        self.accept_task = Some(tokio::spawn(accept_loop(
            listener,
            self.server_tx.clone(),
            self.config.handshake_timeout,
        )));

        let mut tick_interval = interval(self.config.tick_duration());
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_tick = Instant::now();

        info!("Server started at {} Hz", self.config.update_rate);

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::Shutdown) | None => break,
                        Some(message) => self.handle_message(message),
                    }
                },

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_tick).as_secs_f32();
                    last_tick = now;

                    let started = Instant::now();
                    let notifications = self.sessions.tick(dt);
                    self.stats.record_tick(dt, started.elapsed());
                    self.broadcast(notifications);
                },
            }
        }

        self.shutdown();
        Ok(())
    }

    fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Handshake {
                request,
                outbound,
                reply,
            } => {
                let response = self.sessions.begin_session(request);
                let session_id = response.session_id.clone();
                if reply.send(response).is_err() {
                    debug!("Connection for session {} went away mid-handshake", session_id);
                    self.sessions.disconnect(&session_id);
                    return;
                }
                self.outbound.insert(session_id, outbound);
            }
            ServerMessage::HandshakeComplete { session_id } => {
                self.sessions.complete_handshake(&session_id);
            }
            ServerMessage::Input {
                session_id,
                events,
                sent_at,
            } => {
                if let Some(sent_at) = sent_at {
                    self.stats.record_input(sent_at);
                }
                self.sessions.enqueue_events(&session_id, events);
            }
            ServerMessage::Disconnected { session_id } => {
                info!("Session {} disconnected", session_id);
                self.outbound.remove(&session_id);
                self.sessions.disconnect(&session_id);
            }
            ServerMessage::Shutdown => {}
        }
    }

    /// Queues each notification on its session's writer. A failed queue only
    /// affects that session.
    fn broadcast(&mut self, notifications: Vec<(SessionId, StateNotification)>) {
        let sent_at = timestamp();
        for (session_id, mut notification) in notifications {
            let Some(outbound) = self.outbound.get(&session_id) else {
                continue;
            };
            notification.time = Some(sent_at);
            let text = match encode(&notification) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode notification for {}: {}", session_id, e);
                    continue;
                }
            };
            if outbound.send(Message::Text(text)).is_err() {
                warn!("Writer for session {} is gone", session_id);
                self.outbound.remove(&session_id);
                self.sessions.disconnect(&session_id);
            }
        }
    }

    /// Stops accepting connections and aborts every connection task,
    /// including handshakes still in flight
    pub fn shutdown(&mut self) {
        if let Some(accept_task) = self.accept_task.take() {
            accept_task.abort();
        }
        self.outbound.clear();
        info!("Server shut down");
    }
}

/// Rolling tick rate, tick cost and input latency, logged once per window
#[derive(Debug, Default)]
struct LoopStats {
    tick_rate: RollingAverage,
    tick_ms: RollingAverage,
    input_delivery_ms: RollingAverage,
}

impl LoopStats {
    fn record_tick(&mut self, dt: f32, processing: Duration) {
        if dt > 0.0 {
            self.tick_rate.push(1.0 / f64::from(dt));
        }
        self.tick_ms.push(processing.as_secs_f64() * 1000.0);
        if let Some(rate) = self.tick_rate.report() {
            info!(
                "Server running at {:.1} Hz, {:.2} ms per tick",
                rate,
                self.tick_ms.average().unwrap_or_default()
            );
        }
    }

    fn record_input(&mut self, sent_at: f64) {
        self.input_delivery_ms.push(latency_ms(sent_at));
        if let Some(delivery) = self.input_delivery_ms.report() {
            info!("Input delivery {:.2} ms", delivery);
        }
    }
}

/// Accepts sockets until aborted. Connection tasks live in the join set, so
/// aborting this task drops and aborts them as well.
async fn accept_loop(
    listener: TcpListener,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    handshake_timeout: Duration,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    debug!("Accepted connection from {}", addr);
                    connections.spawn(handle_connection(stream, addr, server_tx.clone(), handshake_timeout));
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            },

            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished {
                    if e.is_panic() {
                        error!("Connection task panicked: {}", e);
                    }
                }
            },
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    handshake_timeout: Duration,
) {
    match serve_connection(stream, server_tx, handshake_timeout).await {
        Ok(()) => debug!("Connection from {} closed", addr),
        Err(e) => warn!("Connection from {} ended: {}", addr, e),
    }
}

async fn serve_connection(
    stream: TcpStream,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    handshake_timeout: Duration,
) -> shared::Result<()> {
    let socket = accept_async(stream).await.map_err(ReplicationError::transport)?;
    let (mut write, mut read) = socket.split();

    let request: HandshakeRequest = match timeout(handshake_timeout, next_text(&mut read)).await {
        Ok(Some(text)) => decode(&text?)?,
        Ok(None) => return Ok(()),
        Err(_) => return Err(ReplicationError::HandshakeTimeout(handshake_timeout)),
    };

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let (reply_tx, reply_rx) = oneshot::channel();
    server_tx
        .send(ServerMessage::Handshake {
            request,
            outbound: outbound_tx,
            reply: reply_tx,
        })
        .map_err(ReplicationError::transport)?;
    let response = reply_rx.await.map_err(ReplicationError::transport)?;
    let session_id = response.session_id.clone();

    if let Err(e) = write.send(Message::Text(encode(&response)?)).await {
        let _ = server_tx.send(ServerMessage::Disconnected { session_id });
        return Err(ReplicationError::transport(e));
    }
    let _ = server_tx.send(ServerMessage::HandshakeComplete {
        session_id: session_id.clone(),
    });

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if let Err(e) = write.send(message).await {
                warn!("Failed to send notification: {}", e);
                break;
            }
        }
        let _ = write.close().await;
    });

    while let Some(text) = next_text(&mut read).await {
        let batch = match text.and_then(|text| decode::<InputBatch>(&text)) {
            Ok(batch) => batch,
            Err(e) if e.is_per_message() => {
                warn!("Session {} sent a malformed message: {}", session_id, e);
                continue;
            }
            Err(e) => {
                warn!("Session {} read failed: {}", session_id, e);
                break;
            }
        };
        if batch.events.is_empty() {
            continue;
        }
        let input = ServerMessage::Input {
            session_id: session_id.clone(),
            events: batch.events,
            sent_at: batch.time,
        };
        if server_tx.send(input).is_err() {
            break;
        }
    }

    let _ = server_tx.send(ServerMessage::Disconnected { session_id });
    writer.abort();
    Ok(())
}

/// Next text frame, skipping control frames. `None` once the peer closed.
async fn next_text(
    read: &mut futures_util::stream::SplitStream<WebSocketStream<TcpStream>>,
) -> Option<shared::Result<String>> {
    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => return Some(Ok(text)),
            Ok(Message::Binary(bytes)) => {
                return Some(
                    String::from_utf8(bytes)
                        .map_err(|e| ReplicationError::protocol(format!("binary frame is not utf-8: {}", e))),
                )
            }
            Ok(Message::Close(_)) => return None,
            Ok(_) => continue,
            Err(e) => return Some(Err(ReplicationError::transport(e))),
        }
    }
    None
}
