//! Calendar rules deciding which tiers receive a copy of the daily archive.

use super::{RetentionPolicy, Tier};
use chrono::{Datelike, NaiveDate, Weekday};

pub fn is_weekly_day(date: NaiveDate, weekly_day: Weekday) -> bool {
    date.weekday() == weekly_day
}

pub fn is_monthly_day(date: NaiveDate, monthly_day: u32) -> bool {
    date.day() == monthly_day
}

/// Tiers (besides daily) that get a copy of an archive created on `date`
pub fn copy_tiers(date: NaiveDate, policy: &RetentionPolicy) -> Vec<Tier> {
    let mut tiers = Vec::with_capacity(2);
    if is_weekly_day(date, policy.weekly_day) {
        tiers.push(Tier::Weekly);
    }
    if is_monthly_day(date, policy.monthly_day) {
        tiers.push(Tier::Monthly);
    }
    tiers
}
