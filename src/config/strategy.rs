use serde::{Deserialize, Serialize};

/// Outcome-selection rule, spec.md §4.6. `Number` indexes outcomes 1..=10
/// (falling back to index 0 when the event has fewer outcomes).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    MostVoted,
    HighOdds,
    Percentage,
    SmartMoney,
    Smart { percentage_gap: f64 },
    Number { k: u8 },
}

impl validator::Validate for Strategy {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        let mut errors = validator::ValidationErrors::new();
        if let Strategy::Number { k } = self {
            if !(1..=10).contains(k) {
                errors.add(
                    "k",
                    validator::ValidationError::new("number_strategy_out_of_range"),
                );
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
