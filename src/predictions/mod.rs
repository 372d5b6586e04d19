//! Event Prediction Manager, spec.md §4.6. A thin composite: the
//! Tracker sub-manager owns bookkeeping, the Bettor sub-manager owns
//! timing/placement; this module wires incoming dispatcher events to
//! both and owns the per-event timer lifecycle.

pub mod bettor;
pub mod strategy;
pub mod tracker;

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::miner::Miner;
use crate::model::{EventId, EventPrediction, Prediction, PredictionResult};
use crate::notify::EventKind;

/// `event-created`/`event-updated` from `predictions-channel-v1`.
pub async fn handle_event_created(miner: &Arc<Miner>, channel_id: &str, event: EventPrediction) {
    let Some(lock) = miner.streamer(channel_id) else {
        return;
    };
    let (event_id, fire_at, settings, channel_points, was_new) = {
        let mut streamer = lock.0.write().await;
        let settings = streamer.settings.bet.clone();
        let channel_points = streamer.channel_points;
        let was_new = tracker::on_created(&mut streamer, event.clone());
        (event.id.clone(), bettor::fire_at(&event, &settings), settings, channel_points, was_new)
    };
    if !was_new {
        return;
    }
    schedule_bet_if_eligible(miner, channel_id, event_id, fire_at, channel_points, settings.minimum_points).await;
}

pub async fn handle_event_updated(miner: &Arc<Miner>, channel_id: &str, event: EventPrediction) {
    let Some(lock) = miner.streamer(channel_id) else {
        return;
    };
    let mut streamer = lock.0.write().await;
    tracker::on_updated(&mut streamer, event);
}

pub async fn handle_prediction_made(
    miner: &Arc<Miner>,
    channel_id: &str,
    event_id: &EventId,
    prediction: Prediction,
) {
    let Some(lock) = miner.streamer(channel_id) else {
        return;
    };
    let mut streamer = lock.0.write().await;
    tracker::on_prediction_made(&mut streamer, event_id, prediction);
}

pub async fn handle_result(
    miner: &Arc<Miner>,
    channel_id: &str,
    event_id: &EventId,
    result: PredictionResult,
) {
    let Some(lock) = miner.streamer(channel_id) else {
        return;
    };
    let net_gain = {
        let mut streamer = lock.0.write().await;
        tracker::on_result(&mut streamer, event_id, result);
        result.net_gain(
            streamer
                .event_predictions
                .get(event_id)
                .and_then(|e| e.prediction.as_ref())
                .map(|p| p.points)
                .unwrap_or(0),
        )
    };
    let kind = match result.kind {
        crate::model::ResultKind::Win => EventKind::BetWin,
        crate::model::ResultKind::Lose => EventKind::BetLose,
        crate::model::ResultKind::Refund => EventKind::BetRefund,
    };
    miner
        .notifications
        .send(kind, &format!("prediction {event_id} settled, net {net_gain}"));
}

async fn schedule_bet_if_eligible(
    miner: &Arc<Miner>,
    channel_id: &str,
    event_id: EventId,
    fire_at: chrono::DateTime<chrono::Utc>,
    channel_points: u32,
    minimum_points: u32,
) {
    let now = chrono::Utc::now();
    if fire_at <= now || channel_points < minimum_points {
        return;
    }
    let delay = (fire_at - now)
        .to_std()
        .unwrap_or(std::time::Duration::ZERO);

    let (cancel_tx, cancel_rx) = oneshot::channel();
    miner.bet_timers.lock().await.insert(event_id.clone(), cancel_tx);

    let miner = miner.clone();
    let channel_id = channel_id.to_owned();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                create_and_place_bet(&miner, &channel_id, &event_id).await;
            }
            _ = cancel_rx => {}
        }
        miner.bet_timers.lock().await.remove(&event_id);
    });
}

async fn create_and_place_bet(miner: &Arc<Miner>, channel_id: &str, event_id: &EventId) {
    let Some(lock) = miner.streamer(channel_id) else {
        return;
    };

    let decision = {
        let streamer = lock.0.read().await;
        let Some(event) = streamer.event_predictions.get(event_id) else {
            return;
        };
        if event.status != crate::model::EventStatus::Active {
            return;
        }
        let settings = &streamer.settings.bet;
        match &settings.filter_condition {
            Some(filter) if !filter.holds(event) => BetDecision::FilteredOut,
            _ => pick_outcome_and_amount(event, settings, streamer.channel_points),
        }
    };

    let (outcome_id, amount) = match decision {
        BetDecision::FilteredOut => {
            miner
                .notifications
                .send(EventKind::BetFilters, "bet skipped: filter condition not met");
            return;
        }
        BetDecision::BelowMinimum => {
            miner
                .notifications
                .send(EventKind::BetGeneral, "bet abandoned: amount below platform minimum");
            return;
        }
        BetDecision::Place { outcome_id, amount } => (outcome_id, amount),
    };

    match miner.gql.make_prediction(event_id, &outcome_id, amount).await {
        Ok(None) => {
            let mut streamer = lock.0.write().await;
            if let Some(event) = streamer.event_predictions.get_mut(event_id) {
                event.prediction = Some(Prediction {
                    outcome_id,
                    points: amount,
                    result: None,
                });
            }
            drop(streamer);
            miner
                .notifications
                .send(EventKind::BetStart, &format!("placed {amount} on event {event_id}"));
        }
        Ok(Some(error)) => {
            miner
                .notifications
                .send(EventKind::BetFailed, &format!("makePrediction rejected: {error}"));
        }
        Err(err) => {
            miner
                .notifications
                .send(EventKind::BetFailed, &format!("makePrediction error: {err}"));
        }
    }
}

enum BetDecision {
    Place { outcome_id: String, amount: u32 },
    FilteredOut,
    BelowMinimum,
}

fn pick_outcome_and_amount(
    event: &EventPrediction,
    settings: &crate::config::BetSettings,
    channel_points: u32,
) -> BetDecision {
    let Some(idx) = strategy::select_outcome(&settings.strategy, &event.outcomes) else {
        return BetDecision::BelowMinimum;
    };
    let outcome = &event.outcomes[idx];
    match bettor::compute_amount(channel_points, settings, outcome.top_points) {
        Some(amount) => BetDecision::Place {
            outcome_id: outcome.id.clone(),
            amount,
        },
        None => BetDecision::BelowMinimum,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::strategy::Strategy;
    use crate::config::{BetSettings, DelayMode, FeatureToggles, StreamerSettings};
    use crate::gql::Client;
    use crate::model::{EventStatus, Outcome, Streamer};
    use crate::notify::{NotificationSink, SinkList};
    use crate::session::ClientSession;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::{Arc as StdArc, Mutex as StdMutex};
    use tokio::sync::RwLock;

    fn settings(minimum_points: u32) -> StreamerSettings {
        StreamerSettings {
            bet: BetSettings {
                strategy: Strategy::MostVoted,
                percentage: 10.0,
                max_points: 10_000,
                minimum_points,
                stealth_mode: false,
                filter_condition: None,
                delay: 0.0,
                delay_mode: DelayMode::FromStart,
            },
            toggles: FeatureToggles::default(),
        }
    }

    struct RecordingSink(StdArc<StdMutex<Vec<(EventKind, String)>>>);
    impl NotificationSink for RecordingSink {
        fn send(&self, event: EventKind, message: &str) {
            self.0.lock().unwrap().push((event, message.to_owned()));
        }
    }

    fn build_miner(channel_points: u32, minimum_points: u32) -> (Arc<Miner>, StdArc<StdMutex<Vec<(EventKind, String)>>>) {
        let session = Arc::new(RwLock::new(ClientSession {
            access_token: "t".into(),
            device_id: "d".into(),
            session_id: "s".into(),
            client_version: "v".into(),
            user_agent: "ua".into(),
            user_id: "u1".into(),
        }));
        let mut streamer = Streamer::new("c1".into(), "login".into(), settings(minimum_points));
        streamer.channel_points = channel_points;
        let mut streamers = HashMap::new();
        streamers.insert("c1".to_owned(), crate::model::StreamerLock::new(streamer));
        let log = StdArc::new(StdMutex::new(Vec::new()));
        let miner = Miner::new(
            streamers,
            Client::new(session),
            SinkList(vec![Box::new(RecordingSink(log.clone()))]),
            crate::config::Config {
                streamers: HashMap::new(),
                priority: vec![],
            },
        );
        (Arc::new(miner), log)
    }

    fn event_now(window: f64) -> EventPrediction {
        EventPrediction::new(
            "e1".into(),
            "t".into(),
            Utc::now(),
            window,
            EventStatus::Active,
            vec![Outcome {
                id: "o".into(),
                color: "blue".into(),
                title: "t".into(),
                total_points: 100,
                total_users: 5,
                top_predictors: vec![],
                percentage_users: 0.0,
                odds: 0.0,
                odds_percentage: 0.0,
                top_points: 0,
            }],
        )
    }

    #[tokio::test]
    async fn below_minimum_points_schedules_no_timer() {
        let (miner, _log) = build_miner(5, 1000);
        handle_event_created(&miner, "c1", event_now(600.0)).await;
        assert!(miner.bet_timers.lock().await.is_empty());
    }

    #[tokio::test]
    async fn eligible_event_schedules_exactly_one_timer() {
        let (miner, _log) = build_miner(5000, 0);
        handle_event_created(&miner, "c1", event_now(600.0)).await;
        assert_eq!(miner.bet_timers.lock().await.len(), 1);
    }
}
