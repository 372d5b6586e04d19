//! Owns `streamer.event_predictions`, spec.md §4.6's Tracker sub-manager.

use crate::model::{EventId, EventPrediction, HistoryReason, Prediction, PredictionResult, Streamer};

/// `new`: add if absent, never overwrite. Returns `true` if this event
/// was actually inserted (i.e. is new to the Tracker).
pub fn on_created(streamer: &mut Streamer, event: EventPrediction) -> bool {
    if streamer.event_predictions.contains_key(&event.id) {
        return false;
    }
    streamer.event_predictions.insert(event.id.clone(), event);
    true
}

/// `update`: copy the stored `prediction` onto the new event object and
/// replace the record, so live outcome stats refresh without losing the
/// user's bet.
pub fn on_updated(streamer: &mut Streamer, event: EventPrediction) {
    match streamer.event_predictions.get_mut(&event.id) {
        Some(existing) => existing.apply_update(event),
        None => {
            streamer.event_predictions.insert(event.id.clone(), event);
        }
    }
}

pub fn on_prediction_made(streamer: &mut Streamer, event_id: &EventId, prediction: Prediction) {
    if let Some(event) = streamer.event_predictions.get_mut(event_id) {
        event.prediction = Some(prediction);
    }
}

/// `result`: set the Result and emit history adjustments. Idempotent —
/// a result already recorded on the Prediction is not reapplied,
/// satisfying invariant 6 (no double-counting on a repeated message).
pub fn on_result(streamer: &mut Streamer, event_id: &EventId, result: PredictionResult) {
    let Some(event) = streamer.event_predictions.get_mut(event_id) else {
        return;
    };
    let Some(prediction) = event.prediction.as_mut() else {
        return;
    };
    if prediction.result.is_some() {
        return;
    }
    let net_gain = result.net_gain(prediction.points);
    prediction.result = Some(result);
    streamer.record_history(HistoryReason::Prediction, net_gain);

    match result.kind {
        crate::model::ResultKind::Win => {
            // Dedupe the community-points message already credited for
            // the win by recording a corrective, counter=-1 entry.
            streamer.record_history(HistoryReason::PredictionCorrection, -(result.points_won as i64));
        }
        crate::model::ResultKind::Refund => {
            streamer.record_history(HistoryReason::PredictionCorrection, -(prediction.points as i64));
        }
        crate::model::ResultKind::Lose => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::strategy::Strategy;
    use crate::config::{BetSettings, DelayMode, FeatureToggles, StreamerSettings};
    use crate::model::{EventStatus, Outcome, ResultKind};
    use chrono::Utc;

    fn settings() -> StreamerSettings {
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

    fn event() -> EventPrediction {
        EventPrediction::new(
            "e1".into(),
            "t".into(),
            Utc::now(),
            60.0,
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

    #[test]
    fn created_does_not_overwrite_existing() {
        let mut streamer = Streamer::new("c".into(), "login".into(), settings());
        assert!(on_created(&mut streamer, event()));
        let mut second = event();
        second.title = "changed".into();
        assert!(!on_created(&mut streamer, second));
        assert_eq!(streamer.event_predictions["e1"].title, "t");
    }

    #[test]
    fn update_preserves_prediction() {
        let mut streamer = Streamer::new("c".into(), "login".into(), settings());
        on_created(&mut streamer, event());
        on_prediction_made(
            &mut streamer,
            &"e1".to_owned(),
            Prediction {
                outcome_id: "o".into(),
                points: 100,
                result: None,
            },
        );
        let mut updated = event();
        updated.title = "new title".into();
        on_updated(&mut streamer, updated);
        let stored = &streamer.event_predictions["e1"];
        assert_eq!(stored.title, "new title");
        assert!(stored.prediction.is_some());
    }

    #[test]
    fn result_is_idempotent_and_does_not_double_count() {
        let mut streamer = Streamer::new("c".into(), "login".into(), settings());
        on_created(&mut streamer, event());
        on_prediction_made(
            &mut streamer,
            &"e1".to_owned(),
            Prediction {
                outcome_id: "o".into(),
                points: 100,
                result: None,
            },
        );
        let result = PredictionResult {
            kind: ResultKind::Win,
            points_won: 300,
        };
        on_result(&mut streamer, &"e1".to_owned(), result);
        on_result(&mut streamer, &"e1".to_owned(), result);
        let (count, sum) = streamer.history[&HistoryReason::Prediction];
        assert_eq!(count, 1);
        assert_eq!(sum, 200);
        let (correction_count, _) = streamer.history[&HistoryReason::PredictionCorrection];
        assert_eq!(correction_count, 1);
    }
}
