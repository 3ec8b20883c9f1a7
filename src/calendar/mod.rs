//! Business-day window: which daily files to ask the provider for.
//!
//! Only the weekday/weekend rule applies; holidays are not consulted, so a
//! holiday in the window simply shows up later as a failed fetch.

use chrono::{Datelike, NaiveDate, Weekday};

pub const DEFAULT_WINDOW_DAYS: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct DateWindowResolver {
    count: usize,
}

impl Default for DateWindowResolver {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_DAYS)
    }
}

impl DateWindowResolver {
    pub fn new(count: usize) -> Self {
        Self { count }
    }

    /// The `count` most recent weekdays strictly before `today`, newest first.
    pub fn resolve(&self, today: NaiveDate) -> Vec<NaiveDate> {
        let mut dates = Vec::with_capacity(self.count);
        let mut day = today;

        while dates.len() < self.count {
            match day.pred_opt() {
                Some(prev) => day = prev,
                None => break,
            }
            if is_business_day(day) {
                dates.push(day);
            }
        }

        dates
    }
}

pub fn is_business_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}
