//! Routes topic subscriptions across N concurrent clients, at most K=50
//! topics each, spec.md §4.4. Reconnects are idempotent under a
//! pool-wide lock so that a stray `on_reconnect` plus `on_close` from
//! the same socket never spawns two replacements.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flume::{Receiver, Sender};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::client::{ClientState, Notification, WsClient};

const MAX_TOPICS_PER_CLIENT: usize = 50;
const RECONNECT_BACKOFF: Duration = Duration::from_secs(30);
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const DNS_PROBE_TARGETS: &[&str] = &["1.1.1.1:53", "8.8.8.8:53"];

pub struct Pool {
    clients: Mutex<Vec<Arc<WsClient>>>,
    next_id: AtomicU64,
    force_close: AtomicBool,
    url: String,
    token: String,
    notify_tx: Sender<Notification>,
}

impl Pool {
    pub fn new(url: String, token: String) -> (Arc<Self>, Receiver<Notification>) {
        let (tx, rx) = flume::unbounded();
        (
            Arc::new(Pool {
                clients: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                force_close: AtomicBool::new(false),
                url,
                token,
                notify_tx: tx,
            }),
            rx,
        )
    }

    pub async fn topic_count(&self) -> usize {
        let clients = self.clients.lock().await;
        let mut total = 0;
        for c in clients.iter() {
            total += c.topic_count().await;
        }
        total
    }

    /// `submit(topic)`, spec.md §4.4: no-op if an open client already
    /// holds it; otherwise place it on the first client with room, or
    /// spin up a new one.
    pub async fn submit(self: &Arc<Self>, topic: String) {
        let mut clients = self.clients.lock().await;
        for client in clients.iter() {
            if client.state().await != ClientState::Closed && client.has_topic(&topic).await {
                return;
            }
        }
        for client in clients.iter() {
            if client.state().await != ClientState::Closed
                && client.topic_count().await < MAX_TOPICS_PER_CLIENT
            {
                client.queue_topic(topic).await;
                return;
            }
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let new_client = WsClient::new(id, vec![topic]);
        clients.push(new_client.clone());
        drop(clients);
        self.spawn_client(new_client);
    }

    fn spawn_client(self: &Arc<Self>, client: Arc<WsClient>) {
        let pool = self.clone();
        let url = self.url.clone();
        let token = self.token.clone();
        tokio::spawn(async move {
            if let Err(err) = client.clone().run(&url, &token, pool.notify_tx.clone()).await {
                tracing::warn!(client_id = client.id, %err, "client connection ended");
            }
        });
    }

    /// Idempotent reconnect for the client observed at `index` holding
    /// `observed_id` — if the slot has already been replaced, this is a
    /// no-op, spec.md §4.4.
    pub async fn reconnect(self: &Arc<Self>, index: usize, observed_id: u64) {
        let old_topics = {
            let mut clients = self.clients.lock().await;
            let Some(current) = clients.get(index) else {
                return;
            };
            if current.id != observed_id {
                return;
            }
            let topics = current.all_topics().await;
            current.close().await;
            let new_client = WsClient::new(
                self.next_id.fetch_add(1, Ordering::SeqCst),
                topics.clone(),
            );
            clients[index] = new_client;
            topics
        };
        let _ = old_topics;

        if self.force_close.load(Ordering::Relaxed) {
            return;
        }
        tokio::time::sleep(RECONNECT_BACKOFF).await;
        while !internet_reachable().await {
            if self.force_close.load(Ordering::Relaxed) {
                return;
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        if self.force_close.load(Ordering::Relaxed) {
            return;
        }
        let client = self.clients.lock().await.get(index).cloned();
        if let Some(client) = client {
            self.spawn_client(client);
        }
    }

    async fn check_stale_connections(self: &Arc<Self>) {
        let reachable = internet_reachable().await;
        let candidates: Vec<(usize, u64)> = {
            let clients = self.clients.lock().await;
            let mut out = Vec::new();
            for (idx, client) in clients.iter().enumerate() {
                if client.stale(reachable).await {
                    out.push((idx, client.id));
                }
            }
            out
        };
        for (idx, id) in candidates {
            self.reconnect(idx, id).await;
        }
    }

    pub async fn run_health_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        loop {
            interval.tick().await;
            if self.force_close.load(Ordering::Relaxed) {
                break;
            }
            self.check_stale_connections().await;
        }
    }

    /// Sets `force_close`, closes every client, clears the list. Clients
    /// already queued to reconnect see the flag and skip the open step.
    pub async fn shutdown(&self) {
        self.force_close.store(true, Ordering::Relaxed);
        let mut clients = self.clients.lock().await;
        for client in clients.iter() {
            client.close().await;
        }
        clients.clear();
    }
}

async fn internet_reachable() -> bool {
    for target in DNS_PROBE_TARGETS {
        if tokio::time::timeout(Duration::from_secs(3), TcpStream::connect(target))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
        {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn submit_reuses_existing_client_for_same_topic() {
        let (pool, _rx) = Pool::new("wss://example.invalid/ws".into(), "token".into());
        // Avoid spawning real network tasks in the test: exercise the
        // bookkeeping path directly instead of through submit()'s spawn.
        let client = WsClient::new(0, vec!["foo.1".into()]);
        pool.clients.lock().await.push(client.clone());
        assert!(client.has_topic("foo.1").await);
        assert_eq!(pool.topic_count().await, 1);
    }

    #[tokio::test]
    async fn at_most_k_topics_land_on_one_client() {
        let client = WsClient::new(0, (0..MAX_TOPICS_PER_CLIENT).map(|i| i.to_string()).collect());
        assert_eq!(client.topic_count().await, MAX_TOPICS_PER_CLIENT);
    }
}
