//! Top-level owner of per-process state, spec.md §3/§5. Holds every
//! streamer behind its own lock, the single GQL chokepoint, the
//! notification fan-out, and the shutdown flag every long-running loop
//! polls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};

use crate::config::Config;
use crate::gql::Client;
use crate::model::{ChannelId, EventId, StreamerLock};
use crate::notify::SinkList;

pub struct Miner {
    pub streamers: HashMap<ChannelId, Arc<StreamerLock>>,
    pub gql: Client,
    pub notifications: SinkList,
    pub config: Config,
    /// One cancellation handle per scheduled bet timer, spec.md §4.6;
    /// dropped (and thus fired) on shutdown.
    pub bet_timers: Mutex<HashMap<EventId, oneshot::Sender<()>>>,
    shutting_down: AtomicBool,
}

impl Miner {
    pub fn new(
        streamers: HashMap<ChannelId, Arc<StreamerLock>>,
        gql: Client,
        notifications: SinkList,
        config: Config,
    ) -> Self {
        Miner {
            streamers,
            gql,
            notifications,
            config,
            bet_timers: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    /// Flip the process-wide `running=false` flag, spec.md §5, and
    /// cancel every outstanding bet timer. Every chunked sleep in the
    /// Watch Scheduler and Drop Sync loops observes the flag within ~0.5s.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
        self.bet_timers.lock().await.clear();
    }

    pub fn streamer(&self, channel_id: &str) -> Option<Arc<StreamerLock>> {
        self.streamers.get(channel_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BetSettings, DelayMode, FeatureToggles, StreamerSettings};
    use crate::config::strategy::Strategy;
    use crate::model::Streamer;
    use crate::notify::TracingSink;
    use crate::session::ClientSession;
    use tokio::sync::RwLock;

    fn test_settings() -> StreamerSettings {
        StreamerSettings {
            bet: BetSettings {
                strategy: Strategy::MostVoted,
                percentage: 5.0,
                max_points: 1000,
                minimum_points: 0,
                stealth_mode: false,
                filter_condition: None,
                delay: 5.0,
                delay_mode: DelayMode::FromStart,
            },
            toggles: FeatureToggles::default(),
        }
    }

    #[tokio::test]
    async fn shutdown_flag_is_observed_after_flip() {
        let session = Arc::new(RwLock::new(ClientSession {
            access_token: "t".into(),
            device_id: "d".into(),
            session_id: "s".into(),
            client_version: "v".into(),
            user_agent: "ua".into(),
            user_id: "u1".into(),
        }));
        let mut streamers = HashMap::new();
        streamers.insert(
            "123".to_owned(),
            StreamerLock::new(Streamer::new("123".into(), "foo".into(), test_settings())),
        );
        let miner = Miner::new(
            streamers,
            Client::new(session),
            SinkList(vec![Box::new(TracingSink)]),
            Config {
                streamers: HashMap::new(),
                priority: vec![],
            },
        );
        assert!(!miner.is_shutting_down());
        miner.shutdown().await;
        assert!(miner.is_shutting_down());
        assert!(miner.streamer("123").is_some());
        assert!(miner.streamer("missing").is_none());
    }
}
