//! Message Dispatcher, spec.md §4.5: the only consumer of the pool's
//! PubSub stream. Maps `(topic, scope, payload)` to a state mutation or
//! a hand-off into the Event Prediction Manager.

use std::sync::Arc;

use flume::Receiver;
use serde_json::Value;

use crate::miner::Miner;
use crate::model::{Multiplier, PredictionResult, ResultKind};
use crate::notify::EventKind;
use crate::predictions;
use crate::ws::Notification;

pub async fn run(miner: Arc<Miner>, notifications: Receiver<Notification>) {
    loop {
        if miner.is_shutting_down() {
            break;
        }
        let next = tokio::time::timeout(std::time::Duration::from_millis(500), notifications.recv_async()).await;
        let (topic, scope, payload) = match next {
            Ok(Ok(msg)) => msg,
            Ok(Err(_)) => break,
            Err(_) => continue,
        };
        if let Err(err) = dispatch(&miner, &topic, &scope, &payload).await {
            tracing::warn!(topic, scope, %err, "failed to dispatch pubsub message");
        }
    }
}

async fn dispatch(miner: &Arc<Miner>, topic: &str, scope: &str, payload: &str) -> color_eyre::Result<()> {
    let value: Value = serde_json::from_str(payload)?;
    match topic {
        "community-points-user-v1" => handle_community_points_user(miner, &value).await,
        "video-playback-by-id" => handle_video_playback(miner, scope, &value).await,
        "raid" => handle_raid(miner, scope, &value).await,
        "community-moments-channel-v1" => handle_moment(miner, scope, &value).await,
        "community-points-channel-v1" => handle_community_points_channel(miner, scope, &value).await,
        "predictions-channel-v1" => handle_predictions_channel(miner, scope, &value).await,
        "predictions-user-v1" => handle_predictions_user(miner, &value).await,
        _ => {
            tracing::debug!(topic, "ignoring unhandled pubsub topic");
            Ok(())
        }
    }
}

/// `community-points-user-v1`: point-earning events for the authed user
/// across every channel, keyed by `channel_id` inside the payload.
async fn handle_community_points_user(miner: &Arc<Miner>, value: &Value) -> color_eyre::Result<()> {
    let Some(msg_type) = value["type"].as_str() else {
        return Ok(());
    };
    if msg_type != "points-earned" && msg_type != "points-spent" && msg_type != "claim-available" {
        return Ok(());
    }
    let data = &value["data"];
    let Some(channel_id) = data["channel_id"].as_str() else {
        return Ok(());
    };
    let Some(lock) = miner.streamer(channel_id) else {
        return Ok(());
    };
    let mut streamer = lock.0.write().await;
    match msg_type {
        "points-earned" => {
            // Trust the server-reported balance, not our own running total;
            // the history delta still comes from `point_gain`.
            let delta = data["point_gain"]["total_points"].as_u64().unwrap_or(0);
            let reported_balance = data["balance"]["balance"].as_u64();
            streamer.record_history(crate::model::HistoryReason::PointsEarned, delta as i64);
            streamer.channel_points = reported_balance
                .map(|b| b as u32)
                .unwrap_or_else(|| streamer.channel_points.saturating_add(delta as u32));
            streamer.active_multipliers = data["point_gain"]["multipliers"]
                .as_array()
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .filter_map(|m| {
                    Some(Multiplier {
                        reason_code: m["reason_code"].as_str()?.to_owned(),
                        factor: m["factor"].as_f64().unwrap_or(0.0),
                    })
                })
                .collect();
        }
        "points-spent" => {
            if let Some(balance) = data["balance"]["balance"].as_u64() {
                streamer.channel_points = balance as u32;
            }
        }
        "claim-available" => {
            let claim_id = data["claim"]["id"].as_str().map(str::to_owned);
            drop(streamer);
            if let Some(claim_id) = claim_id {
                match miner.gql.claim_community_points(channel_id, &claim_id).await {
                    Ok(()) => miner.notifications.send(EventKind::BonusClaim, "claimed bonus points"),
                    Err(err) => tracing::warn!(%err, "failed to claim bonus points"),
                }
            }
        }
        _ => {}
    }
    Ok(())
}

/// `video-playback-by-id.<channel_id>`: stream-up/down transitions.
async fn handle_video_playback(miner: &Arc<Miner>, channel_id: &str, value: &Value) -> color_eyre::Result<()> {
    let Some(msg_type) = value["type"].as_str() else {
        return Ok(());
    };
    let Some(lock) = miner.streamer(channel_id) else {
        return Ok(());
    };
    let mut streamer = lock.0.write().await;
    match msg_type {
        "stream-up" => {
            streamer.mark_online(chrono::Utc::now());
            streamer.watch_streak_missing = true;
            let login = streamer.login.clone();
            drop(streamer);
            miner
                .notifications
                .send(EventKind::StreamerOnline, &format!("{login} went live"));
        }
        "stream-down" => {
            streamer.mark_offline(chrono::Utc::now());
            let login = streamer.login.clone();
            drop(streamer);
            miner
                .notifications
                .send(EventKind::StreamerOffline, &format!("{login} went offline"));
        }
        "viewcount" => {
            let long_enough = streamer
                .online_at
                .is_some_and(|t| chrono::Utc::now() - t > chrono::Duration::seconds(30));
            if long_enough {
                if let Some(stream) = streamer.stream.as_mut() {
                    stream.update_required = true;
                }
            }
        }
        _ => {}
    }
    Ok(())
}

/// `raid.<channel_id>`: auto-follow into the raid target if enabled.
async fn handle_raid(miner: &Arc<Miner>, channel_id: &str, value: &Value) -> color_eyre::Result<()> {
    let Some(lock) = miner.streamer(channel_id) else {
        return Ok(());
    };
    let follow_raid = lock.0.read().await.settings.toggles.follow_raid;
    if !follow_raid {
        return Ok(());
    }
    let Some(raid_id) = value["raid"]["id"].as_str() else {
        return Ok(());
    };
    {
        let streamer = lock.0.read().await;
        if streamer.joined_raid_id.as_deref() == Some(raid_id) {
            return Ok(());
        }
    }
    match miner.gql.join_raid(raid_id).await {
        Ok(()) => {
            lock.0.write().await.joined_raid_id = Some(raid_id.to_owned());
            miner.notifications.send(EventKind::JoinRaid, "joined raid");
        }
        Err(err) => tracing::warn!(%err, "failed to join raid"),
    }
    Ok(())
}

/// `community-moments-channel-v1.<channel_id>`: claim a moment the instant it appears.
async fn handle_moment(miner: &Arc<Miner>, channel_id: &str, value: &Value) -> color_eyre::Result<()> {
    let Some(lock) = miner.streamer(channel_id) else {
        return Ok(());
    };
    let claim_moments = lock.0.read().await.settings.toggles.claim_moments;
    if !claim_moments {
        return Ok(());
    }
    let Some(moment_id) = value["data"]["moment_id"].as_str() else {
        return Ok(());
    };
    match miner.gql.claim_moment(moment_id).await {
        Ok(()) => miner.notifications.send(EventKind::MomentClaim, "claimed community moment"),
        Err(err) => tracing::warn!(%err, "failed to claim moment"),
    }
    Ok(())
}

/// `community-points-channel-v1.<channel_id>`: community goal lifecycle
/// (create/update/delete, spec.md §3 CommunityGoal). On create/update we
/// store the goal and contribute toward every in-stock goal for the
/// streamer; on delete we drop it.
async fn handle_community_points_channel(
    miner: &Arc<Miner>,
    channel_id: &str,
    value: &Value,
) -> color_eyre::Result<()> {
    let Some(msg_type) = value["type"].as_str() else {
        return Ok(());
    };
    let Some(lock) = miner.streamer(channel_id) else {
        return Ok(());
    };
    let community_goals_enabled = lock.0.read().await.settings.toggles.community_goals;
    if !community_goals_enabled {
        return Ok(());
    }
    let Some(goal_id) = value["data"]["community_goal"]["id"].as_str() else {
        return Ok(());
    };

    match msg_type {
        "community-goal-created" | "community-goal-updated" => {
            let goal_data = &value["data"]["community_goal"];
            let goal = crate::model::CommunityGoal {
                id: goal_id.to_owned(),
                title: goal_data["title"].as_str().unwrap_or_default().to_owned(),
                amount_needed: goal_data["goal_amount"].as_u64().unwrap_or(0),
                points_contributed: goal_data["points_contributed"].as_u64().unwrap_or(0),
                per_stream_user_maximum_contribution: goal_data["per_stream_user_maximum_contribution"]
                    .as_u64()
                    .unwrap_or(0),
                status: goal_data["status"].as_str().unwrap_or_default().to_owned(),
                is_in_stock: goal_data["is_in_stock"].as_bool().unwrap_or(true),
                contributed_this_stream: lock
                    .0
                    .read()
                    .await
                    .community_goals
                    .get(goal_id)
                    .map(|g| g.contributed_this_stream)
                    .unwrap_or(0),
            };
            lock.0.write().await.community_goals.insert(goal_id.to_owned(), goal);
            contribute_to_community_goals(miner, channel_id, lock).await;
        }
        "community-goal-deleted" => {
            lock.0.write().await.community_goals.remove(goal_id);
        }
        _ => {}
    }
    Ok(())
}

/// `contributeToCommunityGoals(streamer)`: contribute toward every started,
/// in-stock goal up to its bound, spec.md §3.
async fn contribute_to_community_goals(miner: &Arc<Miner>, channel_id: &str, lock: Arc<crate::model::StreamerLock>) {
    let targets: Vec<(String, u64)> = {
        let streamer = lock.0.read().await;
        let channel_points = streamer.channel_points;
        streamer
            .community_goals
            .values()
            .filter(|g| g.status == "STARTED" && g.is_in_stock)
            .map(|g| (g.id.clone(), g.contribution_bound(channel_points)))
            .filter(|(_, bound)| *bound > 0)
            .collect()
    };
    for (goal_id, bound) in targets {
        match miner.gql.contribute_to_community_goal(channel_id, &goal_id, bound).await {
            Ok(()) => {
                let mut streamer = lock.0.write().await;
                if let Some(goal) = streamer.community_goals.get_mut(&goal_id) {
                    goal.contributed_this_stream += bound;
                }
                drop(streamer);
                miner
                    .notifications
                    .send(EventKind::GainFor, &format!("contributed {bound} to goal {goal_id}"));
            }
            Err(err) => tracing::warn!(%err, "failed to contribute to community goal"),
        }
    }
}

/// `predictions-channel-v1.<channel_id>`: event lifecycle (created/updated/resolved).
async fn handle_predictions_channel(miner: &Arc<Miner>, channel_id: &str, value: &Value) -> color_eyre::Result<()> {
    let Some(msg_type) = value["type"].as_str() else {
        return Ok(());
    };
    let Some(event_raw) = value.get("data").and_then(|d| d.get("event")) else {
        return Ok(());
    };
    let event = crate::gql::ops::parse_event_prediction(event_raw)?;

    match msg_type {
        "event-created" => predictions::handle_event_created(miner, channel_id, event).await,
        "event-updated" => {
            if event.status == crate::model::EventStatus::Resolved {
                if let Some(result) = parse_prediction_result(event_raw) {
                    predictions::handle_result(miner, channel_id, &event.id, result).await;
                    return Ok(());
                }
            }
            predictions::handle_event_updated(miner, channel_id, event).await;
        }
        _ => {}
    }
    Ok(())
}

fn parse_prediction_result(event_raw: &Value) -> Option<PredictionResult> {
    let winning_outcome_id = event_raw["winning_outcome_id"].as_str()?;
    let chosen = event_raw["outcomes"]
        .as_array()?
        .iter()
        .find(|o| o["id"].as_str() == Some(winning_outcome_id))?;
    let canceled = event_raw["status"].as_str() == Some("CANCELED");
    if canceled {
        return Some(PredictionResult {
            kind: ResultKind::Refund,
            points_won: 0,
        });
    }
    let _ = chosen;
    None
}

/// `predictions-user-v1`: confirms our own bet was recorded server-side.
async fn handle_predictions_user(miner: &Arc<Miner>, value: &Value) -> color_eyre::Result<()> {
    let Some(msg_type) = value["type"].as_str() else {
        return Ok(());
    };
    if msg_type != "prediction-made" && msg_type != "prediction-result" {
        return Ok(());
    }
    let data = &value["data"];
    let Some(channel_id) = data["channel_id"].as_str() else {
        return Ok(());
    };
    let Some(event_id) = data["prediction"]["event_id"].as_str() else {
        return Ok(());
    };

    match msg_type {
        "prediction-made" => {
            let prediction = crate::model::Prediction {
                outcome_id: data["prediction"]["outcome_id"].as_str().unwrap_or_default().to_owned(),
                points: data["prediction"]["points"].as_u64().unwrap_or(0) as u32,
                result: None,
            };
            predictions::handle_prediction_made(miner, channel_id, &event_id.to_owned(), prediction).await;
        }
        "prediction-result" => {
            let result_str = data["prediction"]["result"]["type"].as_str().unwrap_or("");
            let kind = match result_str {
                "WIN" => ResultKind::Win,
                "REFUND" => ResultKind::Refund,
                _ => ResultKind::Lose,
            };
            let points_won = data["prediction"]["result"]["points_won"].as_u64().unwrap_or(0) as u32;
            predictions::handle_result(
                miner,
                channel_id,
                &event_id.to_owned(),
                PredictionResult { kind, points_won },
            )
            .await;
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canceled_event_yields_refund_result() {
        let event_raw = serde_json::json!({
            "winning_outcome_id": "o1",
            "status": "CANCELED",
            "outcomes": [{"id": "o1"}],
        });
        let result = parse_prediction_result(&event_raw).unwrap();
        assert_eq!(result.kind, ResultKind::Refund);
    }

    #[test]
    fn resolved_event_without_explicit_cancel_defers_to_user_channel() {
        let event_raw = serde_json::json!({
            "winning_outcome_id": "o1",
            "status": "RESOLVED",
            "outcomes": [{"id": "o1"}],
        });
        assert!(parse_prediction_result(&event_raw).is_none());
    }
}
