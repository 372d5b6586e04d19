//! Typed request/response shapes for each GQL operation. Every response
//! is parsed through [`crate::json`] — a raw `serde_json::Value` never
//! escapes this module.

use serde_json::{json, Value};

use crate::json::{
    decode_array, decode_f64, decode_list, decode_optional_property, decode_property, decode_str,
    decode_u64, DecodeError,
};
use crate::model::{CommunityGoal, EventPrediction, EventStatus, Outcome, TopPredictor};

/// One GQL operation envelope, spec.md §6: `{operationName, variables, extensions}`.
pub fn envelope(operation_name: &str, variables: Value, sha256_hash: &str) -> Value {
    json!({
        "operationName": operation_name,
        "variables": variables,
        "extensions": {
            "persistedQuery": { "sha256Hash": sha256_hash, "version": 1 }
        }
    })
}

/// Result of the offline-detection boundary (design note §9): an
/// explicit discriminated result rather than an exception.
pub enum StreamInfoOutcome {
    Info(StreamInfo),
    Offline,
}

pub struct StreamInfo {
    pub broadcast_id: String,
    pub game: Option<String>,
    pub title: Option<String>,
    pub tags: Vec<String>,
    pub viewer_count: u32,
}

pub fn parse_video_player_stream_info(root: &Value) -> Result<StreamInfoOutcome, DecodeError> {
    let user = decode_property(root, "user", Ok)?;
    let stream = decode_optional_property(user, "stream", Ok)?;
    match stream {
        None => Ok(StreamInfoOutcome::Offline),
        Some(stream) => Ok(StreamInfoOutcome::Info(StreamInfo {
            broadcast_id: decode_property(stream, "id", decode_str)?.to_owned(),
            game: decode_optional_property(stream, "game", |g| {
                decode_property(g, "name", decode_str).map(str::to_owned)
            })?,
            title: decode_optional_property(stream, "title", decode_str)?.map(str::to_owned),
            tags: decode_optional_property(stream, "tags", |t| decode_list(t, decode_str))?
                .unwrap_or_default()
                .into_iter()
                .map(str::to_owned)
                .collect(),
            viewer_count: decode_optional_property(stream, "viewersCount", decode_u64)?
                .unwrap_or(0) as u32,
        })),
    }
}

pub fn parse_user_id(root: &Value) -> Result<Option<String>, DecodeError> {
    let id = decode_optional_property(root, "user", |u| {
        decode_property(u, "id", decode_str).map(str::to_owned)
    })?;
    Ok(id.flatten())
}

pub struct PlaybackAccessToken {
    pub signature: String,
    pub value: String,
}

pub fn parse_playback_access_token(root: &Value) -> Result<PlaybackAccessToken, DecodeError> {
    decode_property(root, "streamPlaybackAccessToken", |t| {
        Ok(PlaybackAccessToken {
            signature: decode_property(t, "signature", decode_str)?.to_owned(),
            value: decode_property(t, "value", decode_str)?.to_owned(),
        })
    })
}

pub struct ChannelPointsContext {
    pub balance: u32,
    pub available_claim_id: Option<String>,
    pub goals: Vec<CommunityGoal>,
}

pub fn parse_channel_points_context(root: &Value) -> Result<ChannelPointsContext, DecodeError> {
    decode_property(root, "community", |community| {
        decode_property(community, "channel", |channel| {
            let self_ = decode_property(channel, "self", Ok)?;
            let balance = decode_property(self_, "communityPoints", |cp| {
                decode_property(cp, "balance", decode_u64)
            })? as u32;
            let available_claim_id = decode_optional_property(self_, "availableClaim", |c| {
                decode_property(c, "id", decode_str).map(str::to_owned)
            })?;
            let goals = decode_optional_property(channel, "communityPointsSettings", |settings| {
                decode_property(settings, "goals", |g| decode_list(g, parse_goal))
            })?
            .unwrap_or_default();
            Ok(ChannelPointsContext {
                balance,
                available_claim_id,
                goals,
            })
        })
    })
}

fn parse_goal(v: &Value) -> Result<CommunityGoal, DecodeError> {
    Ok(CommunityGoal {
        id: decode_property(v, "id", decode_str)?.to_owned(),
        title: decode_property(v, "title", decode_str)?.to_owned(),
        amount_needed: decode_property(v, "goalAmount", decode_u64)?,
        points_contributed: decode_property(v, "pointsContributed", decode_u64)?,
        per_stream_user_maximum_contribution: decode_optional_property(
            v,
            "perStreamUserMaximumContribution",
            decode_u64,
        )?
        .unwrap_or(u64::MAX),
        status: decode_property(v, "status", decode_str)?.to_owned(),
        is_in_stock: decode_optional_property(v, "isInStock", |b| {
            crate::json::decode_bool(b)
        })?
        .unwrap_or(true),
        contributed_this_stream: 0,
    })
}

pub fn parse_make_prediction_error(root: &Value) -> Result<Option<String>, DecodeError> {
    decode_property(root, "makePrediction", |m| {
        decode_optional_property(m, "error", |e| {
            decode_property(e, "code", decode_str).map(str::to_owned)
        })
    })
}

/// Parse one PubSub-shaped event payload into an [`EventPrediction`],
/// shared by the GQL `ChannelPointsPredictionContext` response and the
/// `predictions-channel-v1` PubSub topic (same wire shape, spec.md §6).
pub fn parse_event_prediction(v: &Value) -> Result<EventPrediction, DecodeError> {
    let id = decode_property(v, "id", decode_str)?.to_owned();
    let title = decode_property(v, "title", decode_str)?.to_owned();
    let created_at_str = decode_property(v, "createdAt", decode_str)?.to_owned();
    let created_at = chrono::DateTime::parse_from_rfc3339(&created_at_str)
        .map_err(|_| DecodeError::WrongType {
            path: vec![crate::json::PathSegment::Key("createdAt".into())],
            expected: "RFC3339 timestamp",
            actual: created_at_str.clone(),
        })?
        .with_timezone(&chrono::Utc);
    let prediction_window_seconds = decode_property(v, "predictionWindowSeconds", decode_f64)?;
    let status_str = decode_property(v, "status", decode_str)?;
    let status = match status_str {
        "ACTIVE" => EventStatus::Active,
        "LOCKED" => EventStatus::Locked,
        "RESOLVED" => EventStatus::Resolved,
        _ => EventStatus::Canceled,
    };
    let outcomes = decode_property(v, "outcomes", |o| decode_list(o, parse_outcome))?;
    Ok(EventPrediction::new(
        id,
        title,
        created_at,
        prediction_window_seconds,
        status,
        outcomes,
    ))
}

fn parse_outcome(v: &Value) -> Result<Outcome, DecodeError> {
    let top_predictors = decode_optional_property(v, "topPredictors", |arr| {
        decode_list(arr, |p| {
            decode_property(p, "points", decode_u64).map(|points| TopPredictor { points })
        })
    })?
    .unwrap_or_default();
    Ok(Outcome {
        id: decode_property(v, "id", decode_str)?.to_owned(),
        color: decode_optional_property(v, "color", decode_str)?
            .unwrap_or("")
            .to_owned(),
        title: decode_property(v, "title", decode_str)?.to_owned(),
        total_points: decode_property(v, "totalPoints", decode_u64)?,
        total_users: decode_property(v, "totalUsers", decode_u64)?,
        top_predictors,
        percentage_users: 0.0,
        odds: 0.0,
        odds_percentage: 0.0,
        top_points: 0,
    })
}

pub fn require_array(v: &Value) -> Result<&Vec<Value>, DecodeError> {
    decode_array(v)
}
