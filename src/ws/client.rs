//! One connection to the real-time event server, spec.md §4.3. Grounded
//! on the teacher's `twitch::ws::{connect_twitch_ws, writer, ping_loop}`
//! split-sink pattern, generalized into the full welcome/authenticate/
//! subscribe/keepalive/reconnect state machine the spec calls for.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use color_eyre::eyre::{Context, Result};
use flume::Sender;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use super::protocol::{self, PubsubEnvelope, ServerMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Unopened,
    Unwelcomed,
    Unauthenticated,
    Open,
    Closed,
}

/// A forwarded, deduplicated PubSub notification: `(topic, scope, payload)`.
pub type Notification = (String, String, String);

pub struct WsClient {
    pub id: u64,
    state: Mutex<ClientState>,
    created_at: Instant,
    last_message_time: Mutex<Instant>,
    keepalive_timeout: Mutex<Duration>,
    pending_topics: Mutex<VecDeque<String>>,
    in_flight: Mutex<HashMap<String, String>>,
    subscribed: Mutex<HashMap<String, String>>,
    dedup_last: Mutex<Option<(String, String)>>,
    outbound: Mutex<Option<Sender<Message>>>,
    next_request_id: AtomicU64,
}

impl WsClient {
    pub fn new(id: u64, topics: Vec<String>) -> Arc<Self> {
        Arc::new(WsClient {
            id,
            state: Mutex::new(ClientState::Unopened),
            created_at: Instant::now(),
            last_message_time: Mutex::new(Instant::now()),
            keepalive_timeout: Mutex::new(Duration::from_secs(300)),
            pending_topics: Mutex::new(topics.into_iter().collect()),
            in_flight: Mutex::new(HashMap::new()),
            subscribed: Mutex::new(HashMap::new()),
            dedup_last: Mutex::new(None),
            outbound: Mutex::new(None),
            next_request_id: AtomicU64::new(0),
        })
    }

    pub async fn state(&self) -> ClientState {
        *self.state.lock().await
    }

    async fn set_state(&self, s: ClientState) {
        *self.state.lock().await = s;
    }

    pub async fn topic_count(&self) -> usize {
        self.pending_topics.lock().await.len()
            + self.in_flight.lock().await.len()
            + self.subscribed.lock().await.len()
    }

    pub async fn has_topic(&self, topic: &str) -> bool {
        if self.pending_topics.lock().await.iter().any(|t| t == topic) {
            return true;
        }
        if self.in_flight.lock().await.values().any(|t| t == topic) {
            return true;
        }
        self.subscribed.lock().await.values().any(|t| t == topic)
    }

    pub async fn queue_topic(&self, topic: String) {
        self.pending_topics.lock().await.push_back(topic);
    }

    /// All topics this client is responsible for, pending or subscribed —
    /// used to seed the replacement client on reconnect, spec.md §4.4.
    pub async fn all_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.pending_topics.lock().await.iter().cloned().collect();
        topics.extend(self.in_flight.lock().await.values().cloned());
        topics.extend(self.subscribed.lock().await.values().cloned());
        topics
    }

    /// `stale()`, spec.md §4.3: Closed is always stale; past Unopened with
    /// no message within the keepalive window (when the internet is up)
    /// is stale; stuck in Unopened for 5 minutes (when the internet is
    /// up) is stale.
    pub async fn stale(&self, internet_reachable: bool) -> bool {
        match self.state().await {
            ClientState::Closed => true,
            ClientState::Unopened => {
                internet_reachable && self.created_at.elapsed() > Duration::from_secs(300)
            }
            _ => {
                if !internet_reachable {
                    return false;
                }
                let timeout = *self.keepalive_timeout.lock().await;
                self.last_message_time.lock().await.elapsed() > timeout
            }
        }
    }

    pub async fn close(&self) {
        self.set_state(ClientState::Closed).await;
        *self.outbound.lock().await = None;
    }

    /// Drive the full connection lifecycle: connect, welcome, authenticate,
    /// flush pending subscriptions, then loop reading frames until closed
    /// or the socket errors. Forwarded notifications go out on `notify_tx`.
    pub async fn run(
        self: Arc<Self>,
        url: &str,
        token: &str,
        notify_tx: Sender<Notification>,
    ) -> Result<()> {
        self.set_state(ClientState::Unwelcomed).await;
        let request = http::Request::builder()
            .uri(url)
            .header("Authorization", format!("OAuth {token}"))
            .header("Host", "localhost")
            .header("upgrade", "websocket")
            .header("connection", "upgrade")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .header("sec-websocket-version", 13)
            .body(())
            .context("building websocket upgrade request")?;
        let (socket, _) = connect_async(request)
            .await
            .context("connecting to the real-time event server")?;
        let (mut write, mut read) = socket.split();

        let (tx, rx) = flume::unbounded::<Message>();
        *self.outbound.lock().await = Some(tx.clone());
        tokio::spawn(async move {
            let mut rx = rx.into_stream();
            while let Some(msg) = rx.next().await {
                if write.send(msg).await.is_err() {
                    break;
                }
            }
        });

        tx.send_async(Message::Text(
            protocol::authenticate_message(token).to_string(),
        ))
        .await
        .ok();

        while let Some(frame) = read.next().await {
            let frame = frame.context("reading websocket frame")?;
            let Message::Text(text) = frame else {
                continue;
            };
            *self.last_message_time.lock().await = Instant::now();
            let value: serde_json::Value = match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(err) => {
                    tracing::warn!(%err, "malformed server message, ignoring");
                    continue;
                }
            };
            let parsed = match protocol::parse_server_message(&value) {
                Ok(p) => p,
                Err(err) => {
                    tracing::warn!(%err, "unrecognized server message, ignoring");
                    continue;
                }
            };
            match parsed {
                ServerMessage::Welcome {
                    keepalive_sec,
                    session_id: _,
                } => {
                    *self.keepalive_timeout.lock().await =
                        Duration::from_secs(keepalive_sec + 5);
                    self.set_state(ClientState::Unauthenticated).await;
                }
                ServerMessage::AuthenticateResponse { ok, error_code } => {
                    if ok {
                        self.set_state(ClientState::Open).await;
                        self.flush_pending(&tx).await;
                    } else {
                        tracing::warn!(?error_code, "authentication rejected");
                        self.close().await;
                        break;
                    }
                }
                ServerMessage::SubscribeResponse {
                    request_id,
                    ok,
                    subscription_id,
                } => {
                    self.handle_subscribe_response(request_id, ok, subscription_id, &tx)
                        .await;
                }
                ServerMessage::Keepalive => {}
                ServerMessage::Notification {
                    subscription_id,
                    pubsub,
                } => {
                    self.forward_notification(&subscription_id, pubsub, &notify_tx)
                        .await;
                }
                ServerMessage::Reconnect => {
                    tracing::info!(client_id = self.id, "server requested reconnect");
                    self.close().await;
                    break;
                }
            }
        }

        if self.state().await != ClientState::Closed {
            self.close().await;
        }
        Ok(())
    }

    async fn flush_pending(&self, tx: &Sender<Message>) {
        let mut pending = self.pending_topics.lock().await;
        let mut in_flight = self.in_flight.lock().await;
        while let Some(topic) = pending.pop_front() {
            let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst).to_string();
            let msg = protocol::subscribe_message(&request_id, &topic);
            if tx.send_async(Message::Text(msg.to_string())).await.is_err() {
                pending.push_front(topic);
                break;
            }
            in_flight.insert(request_id, topic);
        }
    }

    async fn handle_subscribe_response(
        &self,
        request_id: Option<String>,
        ok: bool,
        subscription_id: Option<String>,
        tx: &Sender<Message>,
    ) {
        let Some(request_id) = request_id else {
            return;
        };
        let topic = self.in_flight.lock().await.remove(&request_id);
        let Some(topic) = topic else { return };
        if ok {
            if let Some(sub_id) = subscription_id {
                self.subscribed.lock().await.insert(sub_id, topic);
            }
        } else {
            tracing::warn!(topic, "subscribe rejected, requeueing");
            self.pending_topics.lock().await.push_front(topic);
            self.flush_pending(tx).await;
        }
    }

    async fn forward_notification(
        &self,
        subscription_id: &str,
        pubsub: PubsubEnvelope,
        notify_tx: &Sender<Notification>,
    ) {
        if !self.subscribed.lock().await.contains_key(subscription_id) {
            tracing::debug!(subscription_id, "notification for unknown subscription");
            return;
        };
        let dedup_key = (pubsub.scope.clone(), pubsub.message.clone());
        let mut last = self.dedup_last.lock().await;
        if last.as_ref() == Some(&dedup_key) {
            return;
        }
        *last = Some(dedup_key);
        drop(last);
        notify_tx
            .send_async((pubsub.topic, pubsub.scope, pubsub.message))
            .await
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stale_when_closed_regardless_of_internet() {
        let c = WsClient::new(0, vec![]);
        c.close().await;
        assert!(c.stale(false).await);
        assert!(c.stale(true).await);
    }

    #[tokio::test]
    async fn unopened_is_not_stale_before_timeout() {
        let c = WsClient::new(0, vec![]);
        assert!(!c.stale(true).await);
    }

    #[tokio::test]
    async fn queued_topic_is_counted_and_found() {
        let c = WsClient::new(0, vec!["foo.1".into()]);
        assert_eq!(c.topic_count().await, 1);
        assert!(c.has_topic("foo.1").await);
        c.queue_topic("bar.2".into()).await;
        assert_eq!(c.topic_count().await, 2);
    }
}
