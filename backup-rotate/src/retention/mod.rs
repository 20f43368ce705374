//! Retention tiers, calendar rules and the pruning selection engine.

pub mod calendar;
pub mod engine;
pub mod tier;

use chrono::Weekday;

pub use engine::{plan, select_for_deletion, sort_newest_first, RetentionPlan};
pub use tier::Tier;

/// Keep counts per tier plus the calendar days that trigger tier copies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub daily_keep: u32,
    pub weekly_keep: u32,
    pub monthly_keep: u32,
    pub weekly_day: Weekday,
    pub monthly_day: u32,
}

impl RetentionPolicy {
    pub fn keep_for(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Daily => self.daily_keep,
            Tier::Weekly => self.weekly_keep,
            Tier::Monthly => self.monthly_keep,
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            daily_keep: 7,
            weekly_keep: 4,
            monthly_keep: 12,
            weekly_day: Weekday::Sun,
            monthly_day: 1,
        }
    }
}
