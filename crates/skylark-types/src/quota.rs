//! Per-calendar-day auto-post quota.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Posts made on one calendar day against the daily cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostQuota {
    pub day: NaiveDate,
    pub count: u32,
    pub max: u32,
}

impl PostQuota {
    pub fn new(day: NaiveDate, count: u32, max: u32) -> Self {
        Self { day, count, max }
    }

    /// Move the quota to `today`. Crossing a day boundary resets the count.
    /// Returns true if a reset happened.
    pub fn roll_to(&mut self, today: NaiveDate) -> bool {
        if self.day == today {
            return false;
        }
        self.day = today;
        self.count = 0;
        true
    }

    pub fn is_exhausted(&self) -> bool {
        self.count >= self.max
    }

    pub fn remaining(&self) -> u32 {
        self.max.saturating_sub(self.count)
    }

    /// Storage key for the day, e.g. `2026-03-14`.
    pub fn day_key(day: NaiveDate) -> String {
        day.format("%Y-%m-%d").to_string()
    }
}
