use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// Identifier for timetables and the entities inside them.
pub type Id = String;

/// Lower bound for the autosave interval. Enforced here and nowhere else.
pub const MIN_AUTOSAVE_INTERVAL_SECS: u32 = 10;
pub const MAX_AUTOSAVE_INTERVAL_SECS: u32 = 3600;
pub const DEFAULT_AUTOSAVE_INTERVAL_SECS: u32 = 30;

/// Longest supported week cycle.
pub const MAX_REPEAT_WEEKS: u32 = 6;

pub const DAYS_PER_WEEK: usize = 7;

// =============================================================================
// Global settings
// =============================================================================

/// Per-account settings, persisted next to the timetable collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSettings {
    #[serde(default)]
    pub current_schedule_id: Id,
    #[serde(default)]
    pub theme: ThemeSpec,
    #[serde(default = "default_autosave_interval")]
    pub auto_save_interval_seconds: u32,
}

fn default_autosave_interval() -> u32 {
    DEFAULT_AUTOSAVE_INTERVAL_SECS
}

impl GlobalSettings {
    pub fn new(current_schedule_id: impl Into<Id>) -> Self {
        Self {
            current_schedule_id: current_schedule_id.into(),
            theme: ThemeSpec::default(),
            auto_save_interval_seconds: DEFAULT_AUTOSAVE_INTERVAL_SECS,
        }
    }

    /// Clamp every bounded field into range.
    ///
    /// This is the single place the autosave interval bounds are applied;
    /// loaders and `DraftController::mutate_global` both route through it.
    pub fn normalized(mut self) -> Self {
        self.auto_save_interval_seconds = self
            .auto_save_interval_seconds
            .clamp(MIN_AUTOSAVE_INTERVAL_SECS, MAX_AUTOSAVE_INTERVAL_SECS);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    Light,
    Dark,
    #[default]
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeSpec {
    #[serde(default)]
    pub mode: ThemeMode,
    #[serde(default = "default_accent_color")]
    pub accent_color: String,
}

impl Default for ThemeSpec {
    fn default() -> Self {
        Self {
            mode: ThemeMode::default(),
            accent_color: default_accent_color(),
        }
    }
}

fn default_accent_color() -> String {
    "#4f46e5".to_string()
}

// =============================================================================
// Timetable
// =============================================================================

/// How many distinct week variants a timetable alternates through, and from when.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cycle {
    pub start_date: NaiveDate,
    #[serde(default = "default_repeat_weeks")]
    pub repeat_weeks: u32,
}

fn default_repeat_weeks() -> u32 {
    1
}

impl Cycle {
    pub fn new(start_date: NaiveDate, repeat_weeks: u32) -> Self {
        Self {
            start_date,
            repeat_weeks,
        }
    }

    /// Repeat count clamped to `1..=MAX_REPEAT_WEEKS`.
    pub fn effective_repeat_weeks(&self) -> u32 {
        self.repeat_weeks.clamp(1, MAX_REPEAT_WEEKS)
    }
}

/// One cyclic week variant, `week1..week{repeat_weeks}`. Stored 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WeekSlot(u32);

impl WeekSlot {
    pub const FIRST: WeekSlot = WeekSlot(1);

    /// Build from a 1-based week number. Returns `None` for 0.
    pub fn new(number: u32) -> Option<Self> {
        (number >= 1).then_some(WeekSlot(number))
    }

    pub fn number(&self) -> u32 {
        self.0
    }

    /// Key used in the persisted slot table, e.g. `"week2"`.
    pub fn key(&self) -> String {
        format!("week{}", self.0)
    }

    pub fn parse(key: &str) -> Option<Self> {
        key.strip_prefix("week")
            .and_then(|n| n.parse::<u32>().ok())
            .and_then(WeekSlot::new)
    }
}

impl fmt::Display for WeekSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "week{}", self.0)
    }
}

impl Serialize for WeekSlot {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.key())
    }
}

impl<'de> Deserialize<'de> for WeekSlot {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        WeekSlot::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid week slot '{}'", raw)))
    }
}

/// Daily lesson timing shared by every day of a timetable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonGeometry {
    #[serde(with = "hhmm", default = "default_start_time")]
    pub start_time: NaiveTime,
    #[serde(default = "default_lesson_duration")]
    pub lesson_duration_minutes: u32,
    /// Break after lesson `i` (0-based). Missing entries count as no break.
    #[serde(default)]
    pub inter_lesson_breaks_minutes: Vec<u32>,
}

fn default_start_time() -> NaiveTime {
    NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default()
}

fn default_lesson_duration() -> u32 {
    45
}

impl Default for LessonGeometry {
    fn default() -> Self {
        Self {
            start_time: default_start_time(),
            lesson_duration_minutes: default_lesson_duration(),
            inter_lesson_breaks_minutes: vec![10, 10, 20, 10, 10, 10],
        }
    }
}

/// `"HH:MM"` wall-clock times. Accepts a trailing `:SS` on input.
mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
            .map_err(|e| serde::de::Error::custom(format!("invalid time '{}': {}", raw, e)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: Id,
    pub name: String,
    #[serde(default = "default_subject_color")]
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher_id: Option<Id>,
    #[serde(default)]
    pub link_ids: Vec<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gradient_id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
}

fn default_subject_color() -> String {
    "#64748b".to_string()
}

impl Subject {
    pub fn new(id: impl Into<Id>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            color: default_subject_color(),
            teacher_id: None,
            link_ids: Vec::new(),
            status_id: None,
            gradient_id: None,
            room: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Teacher {
    pub id: Id,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub id: Id,
    pub label: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub id: Id,
    pub label: String,
    #[serde(default = "default_subject_color")]
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gradient {
    pub id: Id,
    #[serde(default)]
    pub colors: Vec<String>,
    #[serde(default)]
    pub angle_degrees: u16,
}

/// Per-timetable lookup tables. Ids are unique within one timetable only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entities {
    #[serde(default)]
    pub subjects: BTreeMap<Id, Subject>,
    #[serde(default)]
    pub teachers: BTreeMap<Id, Teacher>,
    #[serde(default)]
    pub links: BTreeMap<Id, Link>,
    #[serde(default)]
    pub statuses: BTreeMap<Id, Status>,
    #[serde(default)]
    pub gradients: BTreeMap<Id, Gradient>,
}

/// Ordered lessons of one day in one week variant; `None` is a free period.
pub type Lessons = Vec<Option<Id>>;

/// Week-slot key (`"week1"`, ...) to the lessons of that day.
pub type DaySlots = BTreeMap<String, Lessons>;

/// One named recurring schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timetable {
    pub id: Id,
    #[serde(default)]
    pub name: String,
    pub cycle: Cycle,
    #[serde(default)]
    pub lesson_geometry: LessonGeometry,
    #[serde(default)]
    pub entities: Entities,
    /// Monday-origin, always `DAYS_PER_WEEK` long after `normalize_slots`.
    #[serde(default)]
    pub slots: Vec<DaySlots>,
}

impl Timetable {
    pub fn new(id: impl Into<Id>, name: impl Into<String>, cycle: Cycle) -> Self {
        let mut timetable = Self {
            id: id.into(),
            name: name.into(),
            cycle,
            lesson_geometry: LessonGeometry::default(),
            entities: Entities::default(),
            slots: Vec::new(),
        };
        timetable.normalize_slots();
        timetable
    }

    /// Week slots that can be resolved for this timetable.
    pub fn week_slots(&self) -> impl Iterator<Item = WeekSlot> {
        (1..=self.cycle.effective_repeat_weeks()).map(WeekSlot)
    }

    /// Pad or truncate to seven days and make sure every active week slot has an entry.
    ///
    /// Entries for week slots beyond `repeat_weeks` are left in place; they are never read.
    pub fn normalize_slots(&mut self) {
        self.cycle.repeat_weeks = self.cycle.effective_repeat_weeks();
        self.slots.resize_with(DAYS_PER_WEEK, DaySlots::new);
        let keys: Vec<String> = self.week_slots().map(|w| w.key()).collect();
        for day in &mut self.slots {
            for key in &keys {
                day.entry(key.clone()).or_default();
            }
        }
    }

    /// Lessons for a Monday-origin day index in the given week variant.
    pub fn lessons(&self, day_index: usize, slot: WeekSlot) -> &[Option<Id>] {
        self.slots
            .get(day_index)
            .and_then(|day| day.get(&slot.key()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Mutable lessons for a day/week, creating the entry if absent.
    pub fn lessons_mut(&mut self, day_index: usize, slot: WeekSlot) -> Option<&mut Lessons> {
        if day_index >= DAYS_PER_WEEK {
            return None;
        }
        if self.slots.len() < DAYS_PER_WEEK {
            self.slots.resize_with(DAYS_PER_WEEK, DaySlots::new);
        }
        Some(self.slots[day_index].entry(slot.key()).or_default())
    }
}

// =============================================================================
// Store
// =============================================================================

/// Everything one account (or guest) owns: settings plus all timetables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleStore {
    pub global: GlobalSettings,
    #[serde(default)]
    pub timetables: Vec<Timetable>,
}

impl ScheduleStore {
    pub fn timetable(&self, id: &str) -> Option<&Timetable> {
        self.timetables.iter().find(|t| t.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.timetable(id).is_some()
    }

    pub fn current_timetable(&self) -> Option<&Timetable> {
        self.timetable(&self.global.current_schedule_id)
    }

    pub fn timetable_ids(&self) -> Vec<Id> {
        self.timetables.iter().map(|t| t.id.clone()).collect()
    }

    /// Keep `current_schedule_id` pointing at an existing timetable.
    ///
    /// Repoints to the first timetable, or inserts `make_default()` when the
    /// collection is empty. Returns true when anything changed.
    pub fn repair_current_schedule(&mut self, make_default: impl FnOnce() -> Timetable) -> bool {
        if self.contains(&self.global.current_schedule_id) {
            return false;
        }

        if self.timetables.is_empty() {
            self.timetables.push(make_default());
        }

        let first = self.timetables[0].id.clone();
        log::info!(
            "Repairing current schedule: '{}' not found, repointing to '{}'",
            self.global.current_schedule_id,
            first
        );
        self.global.current_schedule_id = first;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_week_slot_key_roundtrip() {
        let slot = WeekSlot::new(3).unwrap();
        assert_eq!(slot.key(), "week3");
        assert_eq!(WeekSlot::parse("week3"), Some(slot));
        assert_eq!(WeekSlot::parse("week0"), None);
        assert_eq!(WeekSlot::parse("monday"), None);
        assert_eq!(WeekSlot::new(0), None);
    }

    #[test]
    fn test_settings_normalized_clamps_interval() {
        let mut settings = GlobalSettings::new("a");
        settings.auto_save_interval_seconds = 2;
        assert_eq!(settings.clone().normalized().auto_save_interval_seconds, 10);
        settings.auto_save_interval_seconds = 90_000;
        assert_eq!(settings.clone().normalized().auto_save_interval_seconds, 3600);
        settings.auto_save_interval_seconds = 45;
        assert_eq!(settings.normalized().auto_save_interval_seconds, 45);
    }

    #[test]
    fn test_new_timetable_has_seven_days_and_all_week_keys() {
        let t = Timetable::new("t1", "Main", Cycle::new(date(2024, 9, 2), 3));
        assert_eq!(t.slots.len(), DAYS_PER_WEEK);
        for day in &t.slots {
            assert_eq!(
                day.keys().cloned().collect::<Vec<_>>(),
                vec!["week1", "week2", "week3"]
            );
        }
    }

    #[test]
    fn test_normalize_slots_keeps_stale_weeks_and_fixes_zero_repeat() {
        let mut t = Timetable::new("t1", "Main", Cycle::new(date(2024, 9, 2), 2));
        t.slots[0].insert("week2".into(), vec![Some("math".into())]);
        t.cycle.repeat_weeks = 0;
        t.slots.truncate(3);
        t.normalize_slots();
        assert_eq!(t.cycle.repeat_weeks, 1);
        assert_eq!(t.slots.len(), DAYS_PER_WEEK);
        // Unused week2 data is retained but not part of the active slots.
        assert_eq!(t.slots[0]["week2"], vec![Some("math".to_string())]);
        assert_eq!(t.week_slots().count(), 1);
    }

    #[test]
    fn test_normalize_slots_caps_oversized_cycle() {
        let mut t = Timetable::new("t1", "Main", Cycle::new(date(2024, 9, 2), 1));
        t.cycle.repeat_weeks = 3_000_000;
        t.normalize_slots();
        assert_eq!(t.cycle.repeat_weeks, MAX_REPEAT_WEEKS);
        assert_eq!(t.slots[0].len(), MAX_REPEAT_WEEKS as usize);
        assert_eq!(t.week_slots().count(), MAX_REPEAT_WEEKS as usize);
    }

    #[test]
    fn test_lesson_geometry_time_format() {
        let geometry = LessonGeometry::default();
        let json = serde_json::to_value(&geometry).unwrap();
        assert_eq!(json["startTime"], "08:00");

        let parsed: LessonGeometry =
            serde_json::from_str(r#"{"startTime":"07:45:00","lessonDurationMinutes":50}"#).unwrap();
        assert_eq!(parsed.start_time, NaiveTime::from_hms_opt(7, 45, 0).unwrap());
        assert!(parsed.inter_lesson_breaks_minutes.is_empty());
    }

    #[test]
    fn test_repair_current_schedule_points_at_first() {
        let mut store = ScheduleStore {
            global: GlobalSettings::new("gone"),
            timetables: vec![
                Timetable::new("a", "A", Cycle::new(date(2024, 1, 1), 1)),
                Timetable::new("b", "B", Cycle::new(date(2024, 1, 1), 1)),
            ],
        };
        assert!(store.repair_current_schedule(|| unreachable!()));
        assert_eq!(store.global.current_schedule_id, "a");
        assert!(!store.repair_current_schedule(|| unreachable!()));
    }

    #[test]
    fn test_repair_current_schedule_creates_default_when_empty() {
        let mut store = ScheduleStore {
            global: GlobalSettings::new(""),
            timetables: vec![],
        };
        let repaired = store.repair_current_schedule(|| {
            Timetable::new("fresh", "Fresh", Cycle::new(date(2024, 1, 1), 1))
        });
        assert!(repaired);
        assert_eq!(store.global.current_schedule_id, "fresh");
        assert_eq!(store.timetables.len(), 1);
    }
}
