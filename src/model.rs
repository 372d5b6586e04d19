//! Per-streamer data model: §3 of the spec. Owned by the [`crate::miner::Miner`]
//! for process lifetime; mutated by the dispatcher, the watch scheduler and
//! GQL responses behind each streamer's own lock (see [`StreamerLock`]).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::config::StreamerSettings;

pub type ChannelId = String;
pub type EventId = String;
pub type OutcomeId = String;

/// A streamer is looked up only through this map; an [`EventPrediction`]
/// never stores a back-reference to its owning `Streamer`, only
/// `Streamer` stores `event_id -> EventPrediction` (breaks the
/// Streamer <-> EventPrediction <-> Streamer cycle the original had).
#[derive(Debug)]
pub struct StreamerLock(pub RwLock<Streamer>);

impl StreamerLock {
    pub fn new(streamer: Streamer) -> Arc<Self> {
        Arc::new(Self(RwLock::new(streamer)))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Streamer {
    pub channel_id: ChannelId,
    pub login: String,
    pub channel_points: u32,
    pub is_online: bool,
    pub online_at: Option<DateTime<Utc>>,
    pub offline_at: Option<DateTime<Utc>>,
    pub stream: Option<Stream>,
    pub active_multipliers: Vec<Multiplier>,
    pub community_goals: HashMap<String, CommunityGoal>,
    pub event_predictions: HashMap<EventId, EventPrediction>,
    pub settings: StreamerSettings,
    pub history: HashMap<HistoryReason, (u64, i64)>,
    #[serde(skip)]
    pub minute_watched: u32,
    #[serde(skip)]
    pub watch_streak_missing: bool,
    #[serde(skip)]
    pub last_claim_refresh: Option<Instant>,
    #[serde(skip)]
    pub joined_raid_id: Option<String>,
}

impl Streamer {
    pub fn new(channel_id: ChannelId, login: String, settings: StreamerSettings) -> Self {
        Streamer {
            channel_id,
            login,
            channel_points: 0,
            is_online: false,
            online_at: None,
            offline_at: None,
            stream: None,
            active_multipliers: Vec::new(),
            community_goals: HashMap::new(),
            event_predictions: HashMap::new(),
            settings,
            history: HashMap::new(),
            minute_watched: 0,
            watch_streak_missing: false,
            last_claim_refresh: None,
            joined_raid_id: None,
        }
    }

    pub fn mark_online(&mut self, now: DateTime<Utc>) {
        self.is_online = true;
        self.online_at = Some(now);
        if self.stream.is_none() {
            self.stream = Some(Stream::default());
        }
    }

    pub fn mark_offline(&mut self, now: DateTime<Utc>) {
        self.is_online = false;
        self.offline_at = Some(now);
        self.stream = None;
    }

    pub fn total_multiplier_factor(&self) -> f64 {
        self.active_multipliers.iter().map(|m| m.factor).sum()
    }

    /// Record a history entry; `counter` of `-1` is used by result
    /// reconciliation to cancel out an earlier entry for the same reason.
    pub fn record_history(&mut self, reason: HistoryReason, delta: i64) {
        let entry = self.history.entry(reason).or_insert((0, 0));
        entry.0 += 1;
        entry.1 += delta;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HistoryReason {
    PointsEarned,
    PointsSpent,
    Prediction,
    PredictionCorrection,
    Bonus,
    Moment,
    CommunityGoal,
}

#[derive(Debug, Clone, Serialize)]
pub struct Multiplier {
    pub reason_code: String,
    pub factor: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Stream {
    pub broadcast_id: Option<String>,
    pub game: Option<String>,
    pub title: Option<String>,
    pub tags: Vec<String>,
    pub viewer_count: u32,
    pub last_spade_url: Option<String>,
    pub campaigns: Vec<crate::drops::Campaign>,
    pub campaigns_ids: std::collections::HashSet<String>,
    pub update_required: bool,
}

/// §3 EventPrediction. Invariant: sum of outcome totals equal the event
/// totals — enforced in [`EventPrediction::recompute`], never trusted
/// blindly from the wire.
#[derive(Debug, Clone, Serialize)]
pub struct EventPrediction {
    pub id: EventId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub prediction_window_seconds: f64,
    pub status: EventStatus,
    pub outcomes: Vec<Outcome>,
    pub total_points: u64,
    pub total_users: u64,
    pub prediction: Option<Prediction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventStatus {
    Active,
    Locked,
    Resolved,
    Canceled,
}

#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub id: OutcomeId,
    pub color: String,
    pub title: String,
    pub total_points: u64,
    pub total_users: u64,
    pub top_predictors: Vec<TopPredictor>,
    pub percentage_users: f64,
    pub odds: f64,
    pub odds_percentage: f64,
    pub top_points: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopPredictor {
    pub points: u64,
}

impl EventPrediction {
    pub fn new(
        id: EventId,
        title: String,
        created_at: DateTime<Utc>,
        prediction_window_seconds: f64,
        status: EventStatus,
        mut outcomes: Vec<Outcome>,
    ) -> Self {
        let total_points = outcomes.iter().map(|o| o.total_points).sum();
        let total_users = outcomes.iter().map(|o| o.total_users).sum();
        for o in &mut outcomes {
            o.recompute(total_points, total_users);
        }
        EventPrediction {
            id,
            title,
            created_at,
            prediction_window_seconds,
            status,
            outcomes,
            total_points,
            total_users,
            prediction: None,
        }
    }

    /// Replace outcome stats on an `event-updated` notification, keeping
    /// the user's own `prediction` attached (the "update" branch of the
    /// Tracker sub-manager from spec.md §4.6).
    pub fn apply_update(&mut self, mut new: EventPrediction) {
        new.prediction = self.prediction.take();
        *self = new;
    }
}

impl Outcome {
    pub fn recompute(&mut self, event_total_points: u64, event_total_users: u64) {
        self.percentage_users = if event_total_users == 0 {
            0.0
        } else {
            100.0 * self.total_users as f64 / event_total_users as f64
        };
        self.odds = if self.total_points == 0 {
            0.0
        } else {
            event_total_points as f64 / self.total_points as f64
        };
        self.odds_percentage = if self.odds == 0.0 {
            0.0
        } else {
            100.0 / self.odds
        };
        self.top_points = self.top_predictors.iter().map(|p| p.points).max().unwrap_or(0);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub outcome_id: OutcomeId,
    pub points: u32,
    pub result: Option<PredictionResult>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PredictionResult {
    pub kind: ResultKind,
    pub points_won: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResultKind {
    Win,
    Lose,
    Refund,
}

impl PredictionResult {
    /// Net gain in channel points for this result.
    pub fn net_gain(&self, points_placed: u32) -> i64 {
        match self.kind {
            ResultKind::Win => self.points_won as i64 - points_placed as i64,
            ResultKind::Lose => -(points_placed as i64),
            ResultKind::Refund => 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommunityGoal {
    pub id: String,
    pub title: String,
    pub amount_needed: u64,
    pub points_contributed: u64,
    pub per_stream_user_maximum_contribution: u64,
    pub status: String,
    pub is_in_stock: bool,
    #[serde(skip)]
    pub contributed_this_stream: u64,
}

impl CommunityGoal {
    pub fn amount_left(&self) -> u64 {
        self.amount_needed.saturating_sub(self.points_contributed)
    }

    /// Bound the user's next contribution per spec.md §3:
    /// `min(amount_left, per_stream_max - already_contributed, streamer.channel_points)`.
    pub fn contribution_bound(&self, streamer_points: u32) -> u64 {
        let remaining_allowance = self
            .per_stream_user_maximum_contribution
            .saturating_sub(self.contributed_this_stream);
        self.amount_left()
            .min(remaining_allowance)
            .min(streamer_points as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(total_points: u64, total_users: u64, top: &[u64]) -> Outcome {
        Outcome {
            id: "o".into(),
            color: "blue".into(),
            title: "t".into(),
            total_points,
            total_users,
            top_predictors: top.iter().map(|p| TopPredictor { points: *p }).collect(),
            percentage_users: 0.0,
            odds: 0.0,
            odds_percentage: 0.0,
            top_points: 0,
        }
    }

    #[test]
    fn event_totals_equal_sum_of_outcomes() {
        let event = EventPrediction::new(
            "e".into(),
            "title".into(),
            Utc::now(),
            60.0,
            EventStatus::Active,
            vec![outcome(100, 10, &[5]), outcome(300, 20, &[50])],
        );
        assert_eq!(event.total_points, 400);
        assert_eq!(event.total_users, 30);
        for o in &event.outcomes {
            assert!((0.0..=100.0).contains(&o.percentage_users));
            assert!(o.odds >= 0.0);
            assert!((0.0..=100.0).contains(&o.odds_percentage));
            assert!(o.top_points <= o.total_points || o.top_predictors.is_empty());
        }
    }

    #[test]
    fn zero_point_outcome_has_zero_odds() {
        let mut o = outcome(0, 5, &[]);
        o.recompute(500, 10);
        assert_eq!(o.odds, 0.0);
        assert_eq!(o.odds_percentage, 0.0);
    }

    #[test]
    fn result_net_gain() {
        assert_eq!(
            PredictionResult {
                kind: ResultKind::Win,
                points_won: 300
            }
            .net_gain(100),
            200
        );
        assert_eq!(
            PredictionResult {
                kind: ResultKind::Lose,
                points_won: 0
            }
            .net_gain(100),
            -100
        );
        assert_eq!(
            PredictionResult {
                kind: ResultKind::Refund,
                points_won: 0
            }
            .net_gain(100),
            0
        );
    }

    #[test]
    fn community_goal_contribution_is_bounded() {
        let goal = CommunityGoal {
            id: "g".into(),
            title: "t".into(),
            amount_needed: 1000,
            points_contributed: 900,
            per_stream_user_maximum_contribution: 50,
            status: "ACTIVE".into(),
            is_in_stock: true,
            contributed_this_stream: 40,
        };
        // amount_left=100, remaining_allowance=10, streamer has plenty
        assert_eq!(goal.contribution_bound(10_000), 10);
    }
}
