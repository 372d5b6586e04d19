use serde::{Deserialize, Serialize};

use crate::model::EventPrediction;

/// A bet is skipped iff the condition evaluates to **false** — the
/// filter expresses a precondition that must hold, spec.md §4.6.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FilterCondition {
    pub by: FilterBy,
    pub comparator: Comparator,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterBy {
    TotalUsers,
    TotalPoints,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Lt,
    Lte,
    Gt,
    Gte,
}

impl FilterCondition {
    pub fn holds(&self, event: &EventPrediction) -> bool {
        let compared_value = match self.by {
            FilterBy::TotalUsers => event.total_users as f64,
            FilterBy::TotalPoints => event.total_points as f64,
        };
        match self.comparator {
            Comparator::Lt => compared_value < self.value,
            Comparator::Lte => compared_value <= self.value,
            Comparator::Gt => compared_value > self.value,
            Comparator::Gte => compared_value >= self.value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EventStatus, Outcome};
    use chrono::Utc;

    fn event_with_totals(points: u64, users: u64) -> EventPrediction {
        EventPrediction::new(
            "e".into(),
            "t".into(),
            Utc::now(),
            60.0,
            EventStatus::Active,
            vec![Outcome {
                id: "o".into(),
                color: "blue".into(),
                title: "t".into(),
                total_points: points,
                total_users: users,
                top_predictors: Vec::new(),
                percentage_users: 0.0,
                odds: 0.0,
                odds_percentage: 0.0,
                top_points: 0,
            }],
        )
    }

    #[test]
    fn total_users_gte_filter() {
        let cond = FilterCondition {
            by: FilterBy::TotalUsers,
            comparator: Comparator::Gte,
            value: 100.0,
        };
        assert!(cond.holds(&event_with_totals(0, 150)));
        assert!(!cond.holds(&event_with_totals(0, 50)));
    }
}
