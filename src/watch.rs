//! Per-tick selection of ≤2 streamers to "watch" and the HLS-handshake
//! sequence that earns points, spec.md §4.7. Scraping style (substring
//! search over a fetched page rather than a full parser) is grounded on
//! the teacher's `twitch::api::get_spade_url`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use color_eyre::eyre::{bail, eyre, Context, Result};

use crate::config::PriorityKind;
use crate::drops::drops_condition;
use crate::miner::Miner;
use crate::notify::EventKind;
use crate::streak::WatchStreakStore;

const TICK_INTERVAL: Duration = Duration::from_secs(20);
const MAX_SELECTED: usize = 2;
const ONLINE_GRACE: chrono::Duration = chrono::Duration::seconds(30);
const STREAK_OFFLINE_GRACE: chrono::Duration = chrono::Duration::seconds(30 * 60);
const STREAK_MINUTE_CAP: u32 = 7;
const STREAK_TTL: Duration = Duration::from_secs(6 * 3600);
const HANDSHAKE_BUDGET: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct CandidateSnapshot {
    pub channel_id: String,
    pub login: String,
    pub channel_points: u32,
    pub total_multiplier_factor: f64,
    pub streak_eligible: bool,
    pub drops_eligible: bool,
}

/// Pure selection algorithm, spec.md §4.7: walk the priority list in
/// order, extending the chosen set (never duplicating) until full.
pub fn select(
    priority: &[PriorityKind],
    configured_order: &[String],
    candidates: &[CandidateSnapshot],
) -> Vec<String> {
    let mut chosen: Vec<String> = Vec::new();
    let mut chosen_set: HashSet<String> = HashSet::new();
    let by_id: HashMap<&str, &CandidateSnapshot> = candidates
        .iter()
        .map(|c| (c.channel_id.as_str(), c))
        .collect();

    let mut push = |id: &str, chosen: &mut Vec<String>, chosen_set: &mut HashSet<String>| {
        if chosen.len() < MAX_SELECTED && chosen_set.insert(id.to_owned()) {
            chosen.push(id.to_owned());
        }
    };

    for tag in priority {
        if chosen.len() >= MAX_SELECTED {
            break;
        }
        match tag {
            PriorityKind::Order => {
                for id in configured_order {
                    if by_id.contains_key(id.as_str()) {
                        push(id, &mut chosen, &mut chosen_set);
                    }
                }
            }
            PriorityKind::PointsAscending | PriorityKind::PointsDescending => {
                let mut sorted: Vec<&CandidateSnapshot> = candidates.iter().collect();
                sorted.sort_by_key(|c| c.channel_points);
                if matches!(tag, PriorityKind::PointsDescending) {
                    sorted.reverse();
                }
                for c in sorted {
                    push(&c.channel_id, &mut chosen, &mut chosen_set);
                }
            }
            PriorityKind::Streak => {
                for c in candidates.iter().filter(|c| c.streak_eligible) {
                    push(&c.channel_id, &mut chosen, &mut chosen_set);
                }
            }
            PriorityKind::Drops => {
                for c in candidates.iter().filter(|c| c.drops_eligible) {
                    push(&c.channel_id, &mut chosen, &mut chosen_set);
                }
            }
            PriorityKind::Subscribed => {
                let mut subs: Vec<&CandidateSnapshot> = candidates
                    .iter()
                    .filter(|c| c.total_multiplier_factor > 0.0)
                    .collect();
                subs.sort_by(|a, b| {
                    b.total_multiplier_factor
                        .partial_cmp(&a.total_multiplier_factor)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                for c in subs {
                    push(&c.channel_id, &mut chosen, &mut chosen_set);
                }
            }
        }
    }
    chosen
}

async fn gather_candidates(miner: &Arc<Miner>, streak_store: &WatchStreakStore) -> Vec<CandidateSnapshot> {
    let now = Utc::now();
    let mut out = Vec::new();
    for lock in miner.streamers.values() {
        let streamer = lock.0.read().await;
        if !streamer.is_online {
            continue;
        }
        let Some(online_at) = streamer.online_at else {
            continue;
        };
        if now - online_at < ONLINE_GRACE {
            continue;
        }
        let streak_eligible = streamer.settings.toggles.watch_streak
            && streamer.watch_streak_missing
            && streamer
                .offline_at
                .map(|off| now - off >= STREAK_OFFLINE_GRACE)
                .unwrap_or(true)
            && streamer.minute_watched < STREAK_MINUTE_CAP
            && !streak_store.is_within_ttl(&streamer.login, STREAK_TTL, now);
        out.push(CandidateSnapshot {
            channel_id: streamer.channel_id.clone(),
            login: streamer.login.clone(),
            channel_points: streamer.channel_points,
            total_multiplier_factor: streamer.total_multiplier_factor(),
            streak_eligible,
            drops_eligible: drops_condition(&streamer),
        });
    }
    out
}

async fn watch_one(miner: &Arc<Miner>, channel_id: &str, streak_store: &mut WatchStreakStore) -> Result<()> {
    let http = reqwest::Client::new();
    let Some(lock) = miner.streamer(channel_id) else {
        return Ok(());
    };

    let (login, needs_refresh) = {
        let streamer = lock.0.read().await;
        (
            streamer.login.clone(),
            streamer.stream.as_ref().map(|s| s.update_required).unwrap_or(false),
        )
    };

    if needs_refresh {
        refresh_stream_info(miner, channel_id, &login).await?;
    }

    let token = miner
        .gql
        .get_playback_access_token(&login)
        .await
        .map_err(|e| eyre!("getPlaybackAccessToken failed: {e}"))?;

    let playlist_url = format!(
        "https://usher.ttvnw.net/api/channel/hls/{login}.m3u8?sig={}&token={}",
        token.signature, token.value
    );
    let playlist_body = http.get(&playlist_url).send().await?.text().await?;
    let media_playlist_url = last_nonempty_line(&playlist_body)
        .ok_or_else(|| eyre!("empty master playlist for {login}"))?
        .to_owned();

    let media_body = http.get(&media_playlist_url).send().await?.text().await?;
    let segment_url = second_to_last_nonempty_line(&media_body)
        .ok_or_else(|| eyre!("empty media playlist for {login}"))?
        .to_owned();

    http.head(&segment_url).send().await?;

    let spade_url = {
        let streamer = lock.0.read().await;
        streamer.stream.as_ref().and_then(|s| s.last_spade_url.clone())
    };
    let Some(spade_url) = spade_url else {
        bail!("no spade url known for {login}, skipping minute-watched POST");
    };

    let response = http
        .post(&spade_url)
        .header("Client-Id", "ue6666qo983tsx6so1t0vnawi233wa")
        .send()
        .await?;

    if response.status().as_u16() == 204 {
        let mut streamer = lock.0.write().await;
        let previous_minutes: HashMap<String, u32> = streamer
            .stream
            .as_ref()
            .map(|s| {
                s.campaigns
                    .iter()
                    .flat_map(|c| c.drops.iter().map(|d| (d.id.clone(), d.current_minutes_watched)))
                    .collect()
            })
            .unwrap_or_default();
        streamer.minute_watched += 1;
        if streamer.settings.toggles.watch_streak && streamer.watch_streak_missing {
            streamer.watch_streak_missing = false;
            streak_store.mark(&login, Utc::now());
        }
        if let Some(stream) = streamer.stream.as_ref() {
            for campaign in &stream.campaigns {
                for drop in &campaign.drops {
                    let prev = previous_minutes.get(&drop.id).copied().unwrap_or(0);
                    if drop.is_printable(prev) {
                        miner.notifications.send(
                            EventKind::DropStatus,
                            &format!(
                                "{login}: drop {} at {:.0}%",
                                drop.id,
                                drop.percentage_progress()
                            ),
                        );
                    }
                }
            }
        }
    }

    Ok(())
}

async fn refresh_stream_info(miner: &Arc<Miner>, channel_id: &str, login: &str) -> Result<()> {
    use crate::gql::ops::StreamInfoOutcome;

    let outcome = miner
        .gql
        .video_player_stream_info(login)
        .await
        .map_err(|e| eyre!("videoPlayerStreamInfo failed: {e}"))?;
    let Some(lock) = miner.streamer(channel_id) else {
        return Ok(());
    };
    let mut streamer = lock.0.write().await;
    match outcome {
        StreamInfoOutcome::Offline => {
            streamer.mark_offline(Utc::now());
        }
        StreamInfoOutcome::Info(info) => {
            if let Some(stream) = streamer.stream.as_mut() {
                stream.broadcast_id = Some(info.broadcast_id);
                stream.game = info.game;
                stream.title = info.title;
                stream.tags = info.tags;
                stream.viewer_count = info.viewer_count;
                stream.update_required = false;
            }
        }
    }
    Ok(())
}

fn last_nonempty_line(body: &str) -> Option<&str> {
    body.lines().rev().find(|l| !l.trim().is_empty())
}

fn second_to_last_nonempty_line(body: &str) -> Option<&str> {
    body.lines()
        .rev()
        .filter(|l| !l.trim().is_empty())
        .nth(1)
}

/// Scrape `"spade_url":"…"` from a streamer's public page, mirroring the
/// teacher's substring-search approach to `settings.<hash>.js`.
pub fn extract_spade_url(page_body: &str) -> Option<String> {
    let (_, after) = page_body.split_once("\"spade_url\":\"")?;
    let (url, _) = after.split_once('"')?;
    Some(url.replace("\\/", "/"))
}

pub async fn run(miner: Arc<Miner>, streak_path: String) -> Result<()> {
    let mut streak_store = WatchStreakStore::load(&streak_path)
        .await
        .context("loading watch-streak cache")?;
    loop {
        if miner.is_shutting_down() {
            break;
        }
        let candidates = gather_candidates(&miner, &streak_store).await;
        let configured_order: Vec<String> = miner.streamers.keys().cloned().collect();
        let chosen = select(&miner.config.priority, &configured_order, &candidates);

        for channel_id in &chosen {
            let result = tokio::time::timeout(
                HANDSHAKE_BUDGET,
                watch_one(&miner, channel_id, &mut streak_store),
            )
            .await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!(channel_id, %err, "watch tick failed for streamer"),
                Err(_) => tracing::warn!(channel_id, "watch tick exceeded 20s budget"),
            }
        }
        streak_store.flush().await.ok();

        sleep_in_chunks(&miner, TICK_INTERVAL).await;
    }
    Ok(())
}

async fn sleep_in_chunks(miner: &Arc<Miner>, total: Duration) {
    let mut remaining = total;
    let chunk = Duration::from_millis(500);
    while remaining > Duration::ZERO && !miner.is_shutting_down() {
        let step = chunk.min(remaining);
        tokio::time::sleep(step).await;
        remaining -= step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, points: u32, factor: f64, streak: bool, drops: bool) -> CandidateSnapshot {
        CandidateSnapshot {
            channel_id: id.into(),
            login: id.into(),
            channel_points: points,
            total_multiplier_factor: factor,
            streak_eligible: streak,
            drops_eligible: drops,
        }
    }

    #[test]
    fn streak_subscribed_points_ascending_scenario() {
        // literal scenario from spec.md §8.1.
        let candidates = vec![
            candidate("A", 10, 1.5, true, false),
            candidate("B", 100, 0.0, false, false),
            candidate("C", 200, 0.0, false, false),
        ];
        let priority = vec![
            PriorityKind::Streak,
            PriorityKind::Subscribed,
            PriorityKind::PointsAscending,
        ];
        let chosen = select(&priority, &[], &candidates);
        assert_eq!(chosen, vec!["A".to_owned(), "B".to_owned()]);
    }

    #[test]
    fn never_selects_more_than_two() {
        let candidates = vec![
            candidate("A", 1, 0.0, false, false),
            candidate("B", 2, 0.0, false, false),
            candidate("C", 3, 0.0, false, false),
        ];
        let chosen = select(&[PriorityKind::PointsAscending], &[], &candidates);
        assert_eq!(chosen.len(), 2);
    }

    #[test]
    fn order_priority_respects_configured_sequence() {
        let candidates = vec![
            candidate("A", 1, 0.0, false, false),
            candidate("B", 2, 0.0, false, false),
        ];
        let chosen = select(
            &[PriorityKind::Order],
            &["B".to_owned(), "A".to_owned()],
            &candidates,
        );
        assert_eq!(chosen, vec!["B".to_owned(), "A".to_owned()]);
    }

    #[test]
    fn spade_url_is_scraped_from_page_body() {
        let body = r#"{"some":"json","spade_url":"https:\/\/video-edge.spade.com\/track","more":1}"#;
        assert_eq!(
            extract_spade_url(body),
            Some("https://video-edge.spade.com/track".to_owned())
        );
    }

    #[test]
    fn playlist_line_extraction() {
        let master = "#EXTM3U\nhttps://a.example/high.m3u8\nhttps://a.example/low.m3u8\n";
        assert_eq!(last_nonempty_line(master), Some("https://a.example/low.m3u8"));

        let media = "#EXTM3U\nhttps://a.example/seg1.ts\nhttps://a.example/seg2.ts\n";
        assert_eq!(
            second_to_last_nonempty_line(media),
            Some("https://a.example/seg1.ts")
        );
    }
}
