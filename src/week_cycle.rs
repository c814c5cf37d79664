//! Week-cycle resolution
//!
//! Maps a calendar date onto a timetable's repeating cycle: which Monday-origin
//! day of the week it is, and which `weekN` variant applies. Everything here is
//! pure; calendar rendering and slot-targeted writes both call into it.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone};
use chrono_tz::Tz;
use serde::Serialize;

use crate::types::{Cycle, WeekSlot};

/// Where a date lands inside a timetable cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedSlot {
    /// Monday = 0 ... Sunday = 6
    pub day_index: usize,
    pub week_slot: WeekSlot,
}

/// Resolve a calendar date against a cycle.
///
/// Dates before `cycle.start_date` wrap backwards through the cycle, so the
/// day before the start of a two-week cycle is in `week2`.
pub fn resolve_slot(cycle: &Cycle, date: NaiveDate) -> ResolvedSlot {
    let day_index = date.weekday().num_days_from_monday() as usize;
    let repeat = i64::from(cycle.effective_repeat_weeks());

    if repeat <= 1 {
        return ResolvedSlot {
            day_index,
            week_slot: WeekSlot::FIRST,
        };
    }

    let diff_days = (date - cycle.start_date).num_days();
    // Floor division: -1 day is week -1, not week 0.
    let raw_week = diff_days.div_euclid(7);
    let week_index = ((raw_week % repeat) + repeat) % repeat;

    ResolvedSlot {
        day_index,
        week_slot: WeekSlot::new(week_index as u32 + 1).unwrap_or(WeekSlot::FIRST),
    }
}

/// Resolve an instant by taking its calendar date in the user's timezone.
///
/// Time of day is dropped before any arithmetic, so DST transitions cannot
/// shift the day difference.
pub fn resolve_slot_at<Z: TimeZone>(
    cycle: &Cycle,
    instant: &DateTime<Z>,
    tz: &Tz,
) -> ResolvedSlot {
    let local_date = instant.with_timezone(tz).date_naive();
    resolve_slot(cycle, local_date)
}

/// Week number to show in a "week N" badge, or `None` for single-week cycles.
pub fn week_badge(cycle: &Cycle, date: NaiveDate) -> Option<u32> {
    if cycle.effective_repeat_weeks() <= 1 {
        return None;
    }
    Some(resolve_slot(cycle, date).week_slot.number())
}

/// Monday of the week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - chrono::Duration::days(i64::from(date.weekday().num_days_from_monday()))
}
