use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::distributions::{Alphanumeric, DistString};
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};

use crate::drops::Campaign;
use crate::session::ClientSession;

use super::ops::{self, ChannelPointsContext, PlaybackAccessToken, StreamInfoOutcome};
use super::retry::{with_retry, AttemptError, AttemptStrategy, RetryError};

const GQL_ENDPOINT: &str = "https://gql.twitch.tv/gql";
const CLIENT_ID: &str = "ue6666qo983tsx6so1t0vnawi233wa";

/// `StreamerDoesNotExist` bubbles up so the caller can drop the streamer
/// from the active set, spec.md §7.
#[derive(Debug, thiserror::Error)]
pub enum GqlOpError {
    #[error(transparent)]
    Retry(#[from] RetryError),
    #[error("streamer does not exist")]
    StreamerDoesNotExist,
}

/// Single chokepoint for all server communication, spec.md §4.2. Holds
/// the [`ClientSession`] (auth token, device id, session id, client
/// version, user agent) and funnels every outbound call through one
/// retry policy plus a rate-limited error log (§5, §7: at most once per
/// 60s per operation+message).
pub struct Client {
    http: reqwest::Client,
    session: Arc<RwLock<ClientSession>>,
    strategy: AttemptStrategy,
    last_logged: Mutex<HashMap<(&'static str, String), Instant>>,
}

impl Client {
    pub fn new(session: Arc<RwLock<ClientSession>>) -> Self {
        Client {
            http: reqwest::Client::new(),
            session,
            strategy: AttemptStrategy::default(),
            last_logged: Mutex::new(HashMap::new()),
        }
    }

    async fn headers(&self) -> Vec<(&'static str, String)> {
        let session = self.session.read().await;
        vec![
            ("Authorization", format!("OAuth {}", session.access_token)),
            ("Client-Id", CLIENT_ID.to_owned()),
            ("Client-Session-Id", session.session_id.clone()),
            ("Client-Version", session.client_version.clone()),
            ("User-Agent", session.user_agent.clone()),
            ("X-Device-Id", session.device_id.clone()),
        ]
    }

    async fn log_recoverable_error(&self, operation: &'static str, message: &str) {
        let key = (operation, message.to_owned());
        let mut log = self.last_logged.lock().await;
        let now = Instant::now();
        let should_log = match log.get(&key) {
            Some(last) => now.duration_since(*last) > Duration::from_secs(60),
            None => true,
        };
        if should_log {
            tracing::warn!(operation, message, "gql operation failed");
            log.insert(key, now);
        }
    }

    async fn post_single(&self, body: Value) -> Result<Value, AttemptError> {
        let mut req = self.http.post(GQL_ENDPOINT).json(&body);
        for (k, v) in self.headers().await {
            req = req.header(k, v);
        }
        let res = req
            .send()
            .await
            .map_err(|e| AttemptError::Transport(e.to_string()))?;
        if !res.status().is_success() {
            return Err(AttemptError::Transport(format!(
                "http status {}",
                res.status()
            )));
        }
        let value: Value = res
            .json()
            .await
            .map_err(|e| AttemptError::Parse(e.to_string()))?;
        if let Some(errors) = value.get("errors").and_then(|e| e.as_array()) {
            if let Some(first) = errors.first().and_then(|e| e["message"].as_str()) {
                return Err(AttemptError::Graphql(first.to_owned()));
            }
        }
        Ok(value.get("data").cloned().unwrap_or(Value::Null))
    }

    async fn post_batch(&self, bodies: Vec<Value>) -> Result<Vec<Value>, AttemptError> {
        let expected = bodies.len();
        let mut req = self.http.post(GQL_ENDPOINT).json(&bodies);
        for (k, v) in self.headers().await {
            req = req.header(k, v);
        }
        let res = req
            .send()
            .await
            .map_err(|e| AttemptError::Transport(e.to_string()))?;
        if !res.status().is_success() {
            return Err(AttemptError::Transport(format!(
                "http status {}",
                res.status()
            )));
        }
        let value: Value = res
            .json()
            .await
            .map_err(|e| AttemptError::Parse(e.to_string()))?;
        let array = value
            .as_array()
            .ok_or_else(|| AttemptError::Parse("batched response was not an array".into()))?;
        if array.len() != expected {
            return Err(AttemptError::Parse(format!(
                "expected {expected} batch responses, got {}",
                array.len()
            )));
        }
        Ok(array
            .iter()
            .map(|item| item.get("data").cloned().unwrap_or(Value::Null))
            .collect())
    }

    async fn call(
        &self,
        operation: &'static str,
        body_factory: impl Fn() -> Value,
    ) -> Result<Value, RetryError> {
        let result = with_retry(operation, self.strategy, || {
            let body = body_factory();
            async move { self.post_single(body).await }
        })
        .await;
        if let Err(err) = &result {
            if let Some(last) = err.errors.last() {
                self.log_recoverable_error(operation, &last.to_string()).await;
            }
        }
        result
    }

    async fn call_batch(
        &self,
        operation: &'static str,
        bodies: Vec<Value>,
    ) -> Result<Vec<Value>, RetryError> {
        with_retry(operation, self.strategy, || {
            let bodies = bodies.clone();
            async move { self.post_batch(bodies).await }
        })
        .await
    }

    pub async fn video_player_stream_info(
        &self,
        username: &str,
    ) -> Result<StreamInfoOutcome, GqlOpError> {
        let data = self
            .call("videoPlayerStreamInfo", || {
                ops::envelope(
                    "VideoPlayerStreamInfoOverlayChannel",
                    json!({ "channel": username }),
                    "198492e0857f30a4856aaf7e1ce1fab0dd7bd35480f8a8452bf1d07732ab9cb9",
                )
            })
            .await?;
        Ok(ops::parse_video_player_stream_info(&data)?)
    }

    pub async fn get_id_from_login(&self, username: &str) -> Result<String, GqlOpError> {
        let data = self
            .call("getIdFromLogin", || {
                ops::envelope(
                    "GetUserID",
                    json!({ "login": username }),
                    "stub-hash-getuserid",
                )
            })
            .await?;
        ops::parse_user_id(&data)?.ok_or(GqlOpError::StreamerDoesNotExist)
    }

    pub async fn channel_follows(
        &self,
        limit: u32,
        order: &str,
    ) -> Result<Vec<String>, GqlOpError> {
        let mut logins = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let data = self
                .call("channelFollows", || {
                    ops::envelope(
                        "ChannelFollows",
                        json!({ "limit": limit, "order": order, "cursor": cursor }),
                        "stub-hash-channelfollows",
                    )
                })
                .await?;
            let edges = data["follows"]["edges"].as_array().cloned().unwrap_or_default();
            if edges.is_empty() {
                break;
            }
            for edge in &edges {
                if let Some(login) = edge["node"]["login"].as_str() {
                    logins.push(login.to_owned());
                }
            }
            cursor = edges.last().and_then(|e| e["cursor"].as_str()).map(str::to_owned);
            if cursor.is_none() || logins.len() as u32 >= limit {
                break;
            }
        }
        Ok(logins)
    }

    pub async fn join_raid(&self, raid_id: &str) -> Result<(), GqlOpError> {
        self.call("joinRaid", || {
            ops::envelope(
                "JoinRaid",
                json!({ "input": { "raidID": raid_id } }),
                "c6a332a86d1087fbbb1a8623aa01bd1313d2386e7c63be60fdb2d1901f01a4ae",
            )
        })
        .await?;
        Ok(())
    }

    pub async fn get_playback_access_token(
        &self,
        username: &str,
    ) -> Result<PlaybackAccessToken, GqlOpError> {
        let data = self
            .call("getPlaybackAccessToken", || {
                ops::envelope(
                    "PlaybackAccessToken",
                    json!({
                        "login": username,
                        "isLive": true,
                        "isVod": false,
                        "vodID": "",
                        "playerType": "site",
                    }),
                    "stub-hash-playbacktoken",
                )
            })
            .await?;
        Ok(ops::parse_playback_access_token(&data)?)
    }

    pub async fn get_channel_points_context(
        &self,
        username: &str,
    ) -> Result<ChannelPointsContext, GqlOpError> {
        let data = self
            .call("getChannelPointsContext", || {
                ops::envelope(
                    "ChannelPointsContext",
                    json!({ "channelLogin": username }),
                    "1530a003a7d374b0380b79db0be0534f30ff46e61cffa2bc0e2468a909fbc024",
                )
            })
            .await?;
        Ok(ops::parse_channel_points_context(&data)?)
    }

    pub async fn make_prediction(
        &self,
        event_id: &str,
        outcome_id: &str,
        points: u32,
    ) -> Result<Option<String>, GqlOpError> {
        let transaction_id = Alphanumeric.sample_string(&mut rand::thread_rng(), 32);
        let data = self
            .call("makePrediction", || {
                ops::envelope(
                    "MakePrediction",
                    json!({ "input": {
                        "eventID": event_id,
                        "outcomeID": outcome_id,
                        "points": points,
                        "transactionID": transaction_id,
                    }}),
                    "b44682ecc88358817009f20e69d75081b1e58825bb40aa53d5dbadcc17c881d8",
                )
            })
            .await?;
        Ok(ops::parse_make_prediction_error(&data)?)
    }

    pub async fn claim_community_points(
        &self,
        channel_id: &str,
        claim_id: &str,
    ) -> Result<(), GqlOpError> {
        self.call("claimCommunityPoints", || {
            ops::envelope(
                "ClaimCommunityPoints",
                json!({ "input": { "channelID": channel_id, "claimID": claim_id } }),
                "46aaeebe02c99afdf4fc97c7c0cba964124bf6b0af229395f1f6d1feed05b3d0",
            )
        })
        .await?;
        Ok(())
    }

    pub async fn claim_moment(&self, moment_id: &str) -> Result<(), GqlOpError> {
        self.call("claimMoment", || {
            ops::envelope(
                "ClaimCommunityMoment",
                json!({ "input": { "momentID": moment_id } }),
                "stub-hash-claimmoment",
            )
        })
        .await?;
        Ok(())
    }

    pub async fn get_available_drops(&self, channel_id: &str) -> Result<Vec<String>, GqlOpError> {
        let data = self
            .call("getAvailableDrops", || {
                ops::envelope(
                    "DropsHighlightService_AvailableDrops",
                    json!({ "channelID": channel_id }),
                    "stub-hash-availabledrops",
                )
            })
            .await?;
        Ok(data["channel"]["viewerDropCampaigns"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|c| c["id"].as_str().map(str::to_owned))
            .collect())
    }

    pub async fn get_inventory(&self) -> Result<Vec<Campaign>, GqlOpError> {
        let data = self
            .call("getInventory", || {
                ops::envelope("Inventory", json!({}), "stub-hash-inventory")
            })
            .await?;
        Ok(parse_campaign_list(
            &data["currentUser"]["inventory"]["dropCampaignsInProgress"],
        ))
    }

    pub async fn get_viewer_drops_dashboard(&self) -> Result<Vec<Campaign>, GqlOpError> {
        let data = self
            .call("getViewerDropsDashboard", || {
                ops::envelope(
                    "ViewerDropsDashboard",
                    json!({ "fetchRewardCampaigns": false }),
                    "stub-hash-dashboard",
                )
            })
            .await?;
        Ok(parse_campaign_list(
            &data["currentUser"]["dropCampaigns"],
        ))
    }

    /// Batched in chunks of 20, spec.md §4.2.
    pub async fn get_drop_campaign_details(
        &self,
        ids: &[String],
    ) -> Result<Vec<Campaign>, GqlOpError> {
        let mut all = Vec::new();
        for chunk in ids.chunks(20) {
            let bodies: Vec<Value> = chunk
                .iter()
                .map(|id| {
                    ops::envelope(
                        "DropCampaignDetails",
                        json!({ "dropID": id }),
                        "stub-hash-campaigndetails",
                    )
                })
                .collect();
            let responses = self.call_batch("getDropCampaignDetails", bodies).await?;
            for item in responses {
                if let Some(campaign) = item["user"]["dropCampaign"].as_object() {
                    all.push(parse_one_campaign(&Value::Object(campaign.clone())));
                } else {
                    tracing::debug!("skipping unparseable batch element in getDropCampaignDetails");
                }
            }
        }
        Ok(all)
    }

    pub async fn claim_drop_rewards(&self, drop_instance_id: &str) -> Result<(), GqlOpError> {
        let data = self
            .call("claimDropRewards", || {
                ops::envelope(
                    "DropsPage_ClaimDropRewards",
                    json!({ "input": { "dropInstanceID": drop_instance_id } }),
                    "stub-hash-claimdrop",
                )
            })
            .await?;
        let status = data["claimDropRewards"]["status"].as_str().unwrap_or("");
        let has_errors = data["claimDropRewards"]["errors"]
            .as_array()
            .map(|e| !e.is_empty())
            .unwrap_or(false);
        // ELIGIBLE_FOR_ALL and DROP_INSTANCE_ALREADY_CLAIMED both count as success, spec.md §7.
        if has_errors && status != "ELIGIBLE_FOR_ALL" && status != "DROP_INSTANCE_ALREADY_CLAIMED" {
            return Err(GqlOpError::Retry(RetryError {
                operation: "claimDropRewards",
                errors: vec![AttemptError::Graphql(format!("claim failed: status={status}"))],
            }));
        }
        Ok(())
    }

    pub async fn get_user_points_contribution(
        &self,
        username: &str,
    ) -> Result<Vec<(String, u64)>, GqlOpError> {
        let data = self
            .call("getUserPointsContribution", || {
                ops::envelope(
                    "CommunityGoalsUserContributions",
                    json!({ "channelLogin": username }),
                    "stub-hash-goalcontrib",
                )
            })
            .await?;
        Ok(data["community"]["channel"]["communityPointsSettings"]["goals"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|g| {
                let id = g["id"].as_str()?.to_owned();
                let amount = g["self"]["pointsContributed"].as_u64().unwrap_or(0);
                Some((id, amount))
            })
            .collect())
    }

    pub async fn contribute_to_community_goal(
        &self,
        channel_id: &str,
        goal_id: &str,
        amount: u64,
    ) -> Result<(), GqlOpError> {
        self.call("contributeToCommunityGoal", || {
            ops::envelope(
                "ContributeCommunityPointsCommunityGoal",
                json!({ "input": {
                    "channelID": channel_id,
                    "goalID": goal_id,
                    "amount": amount,
                }}),
                "stub-hash-contribgoal",
            )
        })
        .await?;
        Ok(())
    }
}

fn parse_campaign_list(value: &Value) -> Vec<Campaign> {
    value
        .as_array()
        .cloned()
        .unwrap_or_default()
        .iter()
        .map(parse_one_campaign)
        .collect()
}

fn parse_one_campaign(v: &Value) -> Campaign {
    use crate::drops::{CampaignStatus, Drop};
    let status = match v["status"].as_str().unwrap_or("") {
        "ACTIVE" => CampaignStatus::Active,
        "UPCOMING" => CampaignStatus::Upcoming,
        _ => CampaignStatus::Expired,
    };
    let starts_at = v["startAt"]
        .as_str()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&chrono::Utc))
        .unwrap_or_else(chrono::Utc::now);
    let ends_at = v["endAt"]
        .as_str()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&chrono::Utc))
        .unwrap_or_else(chrono::Utc::now);
    let allow_channel_ids = v["allow"]["channels"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|c| c["id"].as_str().map(str::to_owned))
        .collect();
    let drops = v["timeBasedDrops"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .map(|d| Drop {
            id: d["id"].as_str().unwrap_or_default().to_owned(),
            required_minutes_watched: d["requiredMinutesWatched"].as_u64().unwrap_or(0) as u32,
            required_subs: d["requiredSubs"].as_u64().unwrap_or(0) as u32,
            current_minutes_watched: d["self"]["currentMinutesWatched"].as_u64().unwrap_or(0) as u32,
            has_preconditions_met: d["self"]["hasPreconditionsMet"].as_bool().unwrap_or(false),
            drop_instance_id: d["self"]["dropInstanceID"].as_str().map(str::to_owned),
            is_claimed: d["self"]["isClaimed"].as_bool().unwrap_or(false),
        })
        .collect();
    Campaign {
        id: v["id"].as_str().unwrap_or_default().to_owned(),
        game: v["game"]["name"].as_str().unwrap_or_default().to_owned(),
        starts_at,
        ends_at,
        status,
        drops,
        allow_channel_ids,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_drop_rewards_already_claimed_is_success() {
        let status = "DROP_INSTANCE_ALREADY_CLAIMED";
        let has_errors = true;
        let is_failure =
            has_errors && status != "ELIGIBLE_FOR_ALL" && status != "DROP_INSTANCE_ALREADY_CLAIMED";
        assert!(!is_failure);
    }
}
