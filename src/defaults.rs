//! First-run data: the timetable and store a new guest or account starts with.

use chrono::NaiveDate;

use crate::providers::IdGenerator;
use crate::types::{Cycle, GlobalSettings, ScheduleStore, Timetable};
use crate::week_cycle::week_start;

pub const DEFAULT_TIMETABLE_NAME: &str = "My timetable";

/// A single-week timetable whose cycle starts on the Monday of `today`'s week.
pub fn default_timetable(ids: &dyn IdGenerator, today: NaiveDate) -> Timetable {
    Timetable::new(
        ids.new_id(),
        DEFAULT_TIMETABLE_NAME,
        Cycle::new(week_start(today), 1),
    )
}

/// Fresh store with one default timetable selected.
pub fn default_store(ids: &dyn IdGenerator, today: NaiveDate) -> ScheduleStore {
    let timetable = default_timetable(ids, today);
    ScheduleStore {
        global: GlobalSettings::new(timetable.id.clone()),
        timetables: vec![timetable],
    }
}

/// Today's date in the local timezone.
pub fn local_today() -> NaiveDate {
    chrono::Local::now().date_naive()
}
