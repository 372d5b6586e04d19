//! Environment/config boundary (spec.md §6). The core never parses CLI
//! flags or config files itself beyond a thin `serde_yaml` load in
//! `main.rs`; this module only defines the record shapes the core reads.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use validator::Validate;

pub mod filters;
pub mod strategy;

use filters::FilterCondition;
use strategy::Strategy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub streamers: HashMap<String, StreamerSettings>,
    #[serde(default)]
    pub priority: Vec<PriorityKind>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PriorityKind {
    Order,
    PointsAscending,
    PointsDescending,
    Streak,
    Drops,
    Subscribed,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StreamerSettings {
    #[validate(nested)]
    pub bet: BetSettings,
    pub toggles: FeatureToggles,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BetSettings {
    pub strategy: Strategy,
    #[validate(range(min = 0.0, max = 100.0))]
    pub percentage: f64,
    pub max_points: u32,
    pub minimum_points: u32,
    #[serde(default)]
    pub stealth_mode: bool,
    pub filter_condition: Option<FilterCondition>,
    pub delay: f64,
    pub delay_mode: DelayMode,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayMode {
    FromStart,
    FromEnd,
    Percentage,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FeatureToggles {
    #[serde(default)]
    pub claim_drops: bool,
    #[serde(default)]
    pub claim_moments: bool,
    #[serde(default)]
    pub make_predictions: bool,
    #[serde(default)]
    pub follow_raid: bool,
    #[serde(default)]
    pub community_goals: bool,
    #[serde(default)]
    pub watch_streak: bool,
    /// Stored only so config round-trips; the IRC chat presence thread
    /// is an excluded collaborator and the core never acts on this flag.
    #[serde(default)]
    pub chat_presence: bool,
}

impl Config {
    pub fn validate_all(&self) -> Result<(), validator::ValidationErrors> {
        for s in self.streamers.values() {
            s.validate()?;
        }
        Ok(())
    }
}
