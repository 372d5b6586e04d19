//! Outcome-selection rules, spec.md §4.6. Every strategy picks an index
//! into `outcomes`; ties are broken by first occurrence (strict `>`
//! comparisons below, never `>=`).

use crate::config::strategy::Strategy;
use crate::model::Outcome;

pub fn select_outcome(strategy: &Strategy, outcomes: &[Outcome]) -> Option<usize> {
    if outcomes.is_empty() {
        return None;
    }
    Some(match strategy {
        Strategy::MostVoted => argmax(outcomes, |o| o.total_users as f64),
        Strategy::HighOdds => argmax(outcomes, |o| o.odds),
        Strategy::Percentage => argmax(outcomes, |o| o.odds_percentage),
        Strategy::SmartMoney => argmax(outcomes, |o| o.top_points as f64),
        Strategy::Smart { percentage_gap } => {
            if outcomes.len() >= 2
                && (outcomes[0].percentage_users - outcomes[1].percentage_users).abs()
                    < *percentage_gap
            {
                argmax(outcomes, |o| o.odds)
            } else {
                argmax(outcomes, |o| o.total_users as f64)
            }
        }
        Strategy::Number { k } => {
            let idx = *k as usize;
            if idx >= 1 && idx <= outcomes.len() {
                idx - 1
            } else {
                0
            }
        }
    })
}

fn argmax(outcomes: &[Outcome], key: impl Fn(&Outcome) -> f64) -> usize {
    let mut best = 0;
    let mut best_value = key(&outcomes[0]);
    for (idx, o) in outcomes.iter().enumerate().skip(1) {
        let value = key(o);
        if value > best_value {
            best = idx;
            best_value = value;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TopPredictor;

    fn outcome(total_users: u64, odds: f64, top_points: u64, percentage_users: f64) -> Outcome {
        Outcome {
            id: total_users.to_string(),
            color: "blue".into(),
            title: "t".into(),
            total_points: 0,
            total_users,
            top_predictors: vec![TopPredictor { points: top_points }],
            percentage_users,
            odds,
            odds_percentage: if odds == 0.0 { 0.0 } else { 100.0 / odds },
            top_points,
        }
    }

    #[test]
    fn smart_close_split_picks_high_odds() {
        let outcomes = vec![
            outcome(10, 2.0, 0, 20.0),
            outcome(11, 5.0, 0, 22.0),
        ];
        let idx = select_outcome(&Strategy::Smart { percentage_gap: 5.0 }, &outcomes).unwrap();
        assert_eq!(idx, 1);
    }

    #[test]
    fn smart_wide_split_picks_most_voted() {
        let outcomes = vec![
            outcome(10, 6.0, 100, 10.0),
            outcome(50, 2.0, 50, 50.0),
        ];
        let idx = select_outcome(&Strategy::Smart { percentage_gap: 5.0 }, &outcomes).unwrap();
        assert_eq!(idx, 1);
    }

    #[rstest::rstest]
    #[case(1, 0)]
    #[case(7, 0)]
    fn number_strategy_falls_back_to_zero_out_of_range(#[case] k: u8, #[case] expected: usize) {
        let outcomes = vec![outcome(1, 1.0, 1, 1.0)];
        assert_eq!(select_outcome(&Strategy::Number { k }, &outcomes), Some(expected));
    }

    #[test]
    fn ties_break_to_first_occurrence() {
        let outcomes = vec![outcome(10, 1.0, 0, 0.0), outcome(10, 1.0, 0, 0.0)];
        assert_eq!(select_outcome(&Strategy::MostVoted, &outcomes), Some(0));
    }
}
