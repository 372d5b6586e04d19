use std::collections::HashMap;
use std::sync::Arc;

use color_eyre::eyre::{eyre, Context, Result};
use tokio::{fs, join};
use tracing::info;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use validator::Validate;

mod config;
mod dispatcher;
mod drops;
mod gql;
mod json;
mod miner;
mod model;
mod notify;
mod predictions;
mod session;
mod streak;
mod watch;
mod ws;

use config::Config;
use gql::Client;
use miner::Miner;
use model::{ChannelId, Streamer, StreamerLock};
use notify::{SinkList, TracingSink};
use session::ClientSession;

const CONFIG_PATH: &str = "config.yaml";
const TOKENS_PATH: &str = "tokens.json";
const STREAK_PATH: &str = "watch_streak.json";
const WS_URL: &str = "wss://pubsub-edge.twitch.tv/v1";

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_env("LOG"))
        .init();

    let config: Config = serde_yaml::from_str(
        &fs::read_to_string(CONFIG_PATH)
            .await
            .with_context(|| format!("reading config file {CONFIG_PATH}"))?,
    )
    .context("parsing config file")?;
    config.validate_all().context("validating config file")?;
    info!(streamer_count = config.streamers.len(), "parsed config file");

    if config.streamers.is_empty() {
        return Err(eyre!("no streamers in config file"));
    }

    let session = ClientSession::load(TOKENS_PATH)
        .await
        .context("load tokens.json (run the login sequence first)")?;
    let user_id = session.user_id.clone();
    let session = Arc::new(tokio::sync::RwLock::new(session));

    let gql = Client::new(session.clone());

    let mut streamers: HashMap<ChannelId, Arc<StreamerLock>> = HashMap::new();
    for (login, settings) in &config.streamers {
        let channel_id = gql
            .get_id_from_login(login)
            .await
            .with_context(|| format!("resolving channel id for {login}"))?;
        streamers.insert(
            channel_id.clone(),
            StreamerLock::new(Streamer::new(channel_id, login.clone(), settings.clone())),
        );
    }
    info!(resolved = streamers.len(), "resolved streamer channel ids");

    let channel_ids: Vec<ChannelId> = streamers.keys().cloned().collect();

    let miner = Arc::new(Miner::new(streamers, gql, SinkList(vec![Box::new(TracingSink)]), config));

    let token = session.read().await.access_token.clone();
    let (pool, notifications) = ws::Pool::new(WS_URL.to_owned(), token);

    for channel_id in &channel_ids {
        pool.submit(format!("video-playback-by-id.{channel_id}")).await;
        pool.submit(format!("raid.{channel_id}")).await;
        pool.submit(format!("community-moments-channel-v1.{channel_id}")).await;
        pool.submit(format!("community-points-channel-v1.{channel_id}")).await;
        pool.submit(format!("predictions-channel-v1.{channel_id}")).await;
    }
    pool.submit(format!("community-points-user-v1.{user_id}")).await;
    pool.submit(format!("predictions-user-v1.{user_id}")).await;

    info!("everything ok, starting twitch channel points miner");

    let health_loop = tokio::spawn(pool.clone().run_health_loop());
    let dispatcher_loop = tokio::spawn(dispatcher::run(miner.clone(), notifications));
    let watch_loop = tokio::spawn(watch::run(miner.clone(), STREAK_PATH.to_owned()));
    let drop_sync_loop = tokio::spawn(drops::run(miner.clone()));

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown requested");
        miner.shutdown().await;
        pool.shutdown().await;
    };

    let (_, dispatcher_res, watch_res, drop_res) =
        join!(shutdown, dispatcher_loop, watch_loop, drop_sync_loop);
    health_loop.abort();

    dispatcher_res.context("dispatcher task panicked")?;
    watch_res.context("watch scheduler task panicked")?.context("watch scheduler")?;
    drop_res.context("drop sync task panicked")?;

    Ok(())
}
