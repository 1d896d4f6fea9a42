//! Calendar fields derived from an observation timestamp.

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::Serialize;

/// First and last day-of-month of the month-end window.
///
/// The window is a fixed range and does not track month length: the 31st
/// is a regular day.
pub const MONTH_END_DAYS: std::ops::RangeInclusive<u32> = 26..=30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CalendarFields {
    /// 0..=23
    pub hour: u32,
    /// Monday = 0 .. Sunday = 6
    pub day_of_week: u32,
    pub is_weekend: bool,
    /// 1..=31
    pub day_of_month: u32,
    pub is_month_end_window: bool,
}

impl CalendarFields {
    pub fn from_timestamp(ts: &NaiveDateTime) -> Self {
        let day_of_week = ts.weekday().num_days_from_monday();
        let day_of_month = ts.day();
        Self {
            hour: ts.hour(),
            day_of_week,
            is_weekend: day_of_week >= 5,
            day_of_month,
            is_month_end_window: MONTH_END_DAYS.contains(&day_of_month),
        }
    }
}
