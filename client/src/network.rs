//! Remote scene client: connection, handshake and notification intake

use crate::config::ClientConfig;
use crate::game::ShadowScene;
use crate::input::InputQueue;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::protocol::{decode, encode};
use shared::stats::{latency_ms, timestamp};
use shared::{
    DrawSurface, HandshakeRequest, HandshakeResponse, InputEvent, ReplicationError, RollingAverage,
    StateNotification,
};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// `Disconnected -> Connecting -> Handshaking -> Connected -> Disconnected`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Handshaking,
    Connected,
}

pub struct RemoteSceneClient {
    config: ClientConfig,
    state: ClientState,
    scene: Option<ShadowScene>,
    input: InputQueue,
    sink: Option<SplitSink<Socket, Message>>,
    notifications: Option<mpsc::UnboundedReceiver<StateNotification>>,
    reader: Option<JoinHandle<()>>,
    stats: IntakeStats,
}

impl RemoteSceneClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            state: ClientState::Disconnected,
            scene: None,
            input: InputQueue::new(),
            sink: None,
            notifications: None,
            reader: None,
            stats: IntakeStats::default(),
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ClientState::Connected
    }

    pub fn scene(&self) -> Option<&ShadowScene> {
        self.scene.as_ref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.scene.as_ref().map(ShadowScene::session_id)
    }

    /// Milliseconds between the server sending a notification and its arrival here
    pub fn delivery_latency(&self) -> &RollingAverage {
        &self.stats.delivery_ms
    }

    /// Milliseconds spent applying each notification to the shadow scene
    pub fn processing_time(&self) -> &RollingAverage {
        &self.stats.processing_ms
    }

    /// Connects and performs the handshake. Running out of connection
    /// attempts yields [`ReplicationError::ConnectionFailed`].
    pub async fn connect(&mut self) -> shared::Result<()> {
        self.state = ClientState::Connecting;
        let mut socket = match self.open().await {
            Ok(socket) => socket,
            Err(e) => {
                self.state = ClientState::Disconnected;
                return Err(e);
            }
        };

        self.state = ClientState::Handshaking;
        let response = match self.handshake(&mut socket).await {
            Ok(response) => response,
            Err(e) => {
                self.state = ClientState::Disconnected;
                let _ = socket.close(None).await;
                return Err(e);
            }
        };
        info!(
            "Connected as session {} with {} entities",
            response.session_id,
            response.full_entity_states.len()
        );

        let (sink, stream) = socket.split();
        let (tx, rx) = mpsc::unbounded_channel();
        self.reader = Some(tokio::spawn(read_notifications(stream, tx)));
        self.sink = Some(sink);
        self.notifications = Some(rx);
        self.scene = Some(ShadowScene::from_handshake(&response));
        self.state = ClientState::Connected;
        Ok(())
    }

    async fn open(&self) -> shared::Result<Socket> {
        let url = self.config.url();
        let attempts = self.config.connect_attempts.max(1);

        for attempt in 1..=attempts {
            match connect_async(url.as_str()).await {
                Ok((socket, _)) => return Ok(socket),
                Err(e) => {
                    warn!("Connection attempt {}/{} to {} failed: {}", attempt, attempts, url, e);
                    if attempt < attempts {
                        sleep(self.config.retry_delay).await;
                    }
                }
            }
        }
        Err(ReplicationError::ConnectionFailed { url, attempts })
    }

    async fn handshake(&self, socket: &mut Socket) -> shared::Result<HandshakeResponse> {
        let request = HandshakeRequest {
            resolution: self.config.resolution,
            client_data: self.config.client_data.clone(),
        };
        socket
            .send(Message::Text(encode(&request)?))
            .await
            .map_err(ReplicationError::transport)?;

        timeout(self.config.handshake_timeout, read_handshake_reply(socket))
            .await
            .map_err(|_| ReplicationError::HandshakeTimeout(self.config.handshake_timeout))?
    }

    /// Queues a local input event for the next update. Input is dropped
    /// unless the client is connected.
    pub fn push_event(&mut self, event: impl Into<InputEvent>) {
        if !self.is_connected() {
            debug!("Dropping input while {:?}", self.state);
            return;
        }
        self.input.push(event);
    }

    pub fn queued_events(&self) -> usize {
        self.input.len()
    }

    /// One local tick: sends queued input as a single batch, then applies
    /// every notification received since the last call. Returns how many
    /// notifications were applied.
    pub async fn update(&mut self) -> shared::Result<usize> {
        self.flush_input().await?;
        Ok(self.apply_pending())
    }

    /// Like [`RemoteSceneClient::update`] but waits up to `wait` for at least
    /// one notification to arrive.
    pub async fn update_within(&mut self, wait: Duration) -> shared::Result<usize> {
        self.flush_input().await?;
        let Some(notifications) = self.notifications.as_mut() else {
            return Ok(0);
        };
        let received = timeout(wait, notifications.recv()).await;
        let first = match received {
            Ok(Some(notification)) => notification,
            Ok(None) => {
                self.mark_disconnected();
                return Ok(0);
            }
            Err(_) => return Ok(0),
        };
        if let Some(scene) = self.scene.as_mut() {
            self.stats.apply(scene, first);
        }
        Ok(1 + self.apply_pending())
    }

    async fn flush_input(&mut self) -> shared::Result<()> {
        let Some(sink) = self.sink.as_mut() else {
            return Ok(());
        };
        let Some(mut batch) = self.input.flush() else {
            return Ok(());
        };
        batch.time = Some(timestamp());
        debug!("Sending {} input events", batch.events.len());
        sink.send(Message::Text(encode(&batch)?))
            .await
            .map_err(ReplicationError::transport)
    }

    fn apply_pending(&mut self) -> usize {
        let (Some(notifications), Some(scene)) = (self.notifications.as_mut(), self.scene.as_mut()) else {
            return 0;
        };
        let stats = &mut self.stats;
        let mut applied = 0;
        let closed = loop {
            match notifications.try_recv() {
                Ok(notification) => {
                    stats.apply(scene, notification);
                    applied += 1;
                }
                Err(mpsc::error::TryRecvError::Empty) => break false,
                Err(mpsc::error::TryRecvError::Disconnected) => break true,
            }
        };
        if closed {
            self.mark_disconnected();
        }
        applied
    }

    fn mark_disconnected(&mut self) {
        if self.state != ClientState::Disconnected {
            info!("Server closed the connection");
            self.state = ClientState::Disconnected;
        }
        self.notifications = None;
    }

    /// Replays the latest screen instructions onto `surface`
    pub fn draw(&self, surface: &mut (dyn DrawSurface + 'static)) -> usize {
        self.scene.as_ref().map_or(0, |scene| scene.draw(surface))
    }

    /// Closes the connection and waits for the close frame to be written
    pub async fn close(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.close().await {
                debug!("Error closing connection: {}", e);
            }
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.notifications = None;
        self.state = ClientState::Disconnected;
    }
}

impl Drop for RemoteSceneClient {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Rolling delivery latency and apply cost, logged once per window
#[derive(Debug, Default)]
struct IntakeStats {
    delivery_ms: RollingAverage,
    processing_ms: RollingAverage,
}

impl IntakeStats {
    fn apply(&mut self, scene: &mut ShadowScene, notification: StateNotification) {
        if let Some(sent_at) = notification.time {
            self.delivery_ms.push(latency_ms(sent_at));
        }
        let started = Instant::now();
        scene.apply(notification);
        self.processing_ms.push(started.elapsed().as_secs_f64() * 1000.0);

        if let Some(processing) = self.processing_ms.report() {
            match self.delivery_ms.average() {
                Some(delivery) => info!("State delivery {:.2} ms, processing {:.2} ms", delivery, processing),
                None => info!("State processing {:.2} ms", processing),
            }
        }
    }
}

async fn read_handshake_reply(socket: &mut Socket) -> shared::Result<HandshakeResponse> {
    while let Some(frame) = socket.next().await {
        match frame.map_err(ReplicationError::transport)? {
            Message::Text(text) => return decode(&text),
            Message::Close(_) => break,
            _ => continue,
        }
    }
    Err(ReplicationError::protocol("connection closed during handshake"))
}

async fn read_notifications(
    mut stream: SplitStream<Socket>,
    tx: mpsc::UnboundedSender<StateNotification>,
) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match decode::<StateNotification>(&text) {
                Ok(notification) => {
                    if tx.send(notification).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Skipping malformed notification: {}", e),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("Connection error: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::ActorsState;
    use std::collections::BTreeMap;

    fn notification(time: Option<f64>) -> StateNotification {
        StateNotification {
            actors: ActorsState::default(),
            screen: Some(Vec::new()),
            time,
        }
    }

    #[tokio::test]
    async fn test_connection_failed_after_budget() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut client = RemoteSceneClient::new(ClientConfig {
            host: "127.0.0.1".to_string(),
            port,
            connect_attempts: 3,
            retry_delay: Duration::from_millis(10),
            ..ClientConfig::default()
        });

        match client.connect().await {
            Err(ReplicationError::ConnectionFailed { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected ConnectionFailed, got {:?}", other.map(|_| ())),
        }
        assert_eq!(client.state(), ClientState::Disconnected);
    }

    #[test]
    fn test_update_without_connection_is_noop() {
        tokio_test::block_on(async {
            let mut client = RemoteSceneClient::new(ClientConfig::default());
            client.push_event(shared::SceneEvent::KeyDown { key: 32 });
            assert_eq!(client.update().await.unwrap(), 0);
            assert_eq!(client.queued_events(), 0);
            assert!(client.scene().is_none());
        });
    }

    #[test]
    fn test_intake_measures_delivery_and_processing() {
        let mut scene = ShadowScene::from_handshake(&HandshakeResponse {
            session_id: "abc".to_string(),
            full_entity_states: BTreeMap::new(),
            screen_baseline: Vec::new(),
        });
        let mut stats = IntakeStats::default();

        stats.apply(&mut scene, notification(Some(timestamp() - 0.02)));
        stats.apply(&mut scene, notification(None));

        assert_eq!(stats.delivery_ms.len(), 1);
        assert!(stats.delivery_ms.average().unwrap() >= 20.0);
        assert_eq!(stats.processing_ms.len(), 2);
    }
}
