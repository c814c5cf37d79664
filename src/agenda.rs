//! Date-addressed reads and writes over a timetable, plus entity bookkeeping.
//!
//! All functions take a `Timetable` directly so they compose with
//! `DraftController::mutate_current_timetable`.

use chrono::{Duration, NaiveDate, NaiveTime};
use serde::Serialize;

use crate::error::SyncError;
use crate::types::{
    Gradient, Id, LessonGeometry, Link, Status, Subject, Teacher, Timetable, MAX_REPEAT_WEEKS,
};
use crate::week_cycle::{resolve_slot, ResolvedSlot};

/// Upper bound on lessons in one day.
pub const MAX_PERIODS_PER_DAY: usize = 16;

/// Wall-clock span of one lesson.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonTime {
    /// 0-based position within the day.
    pub period: usize,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// One lesson on a concrete date.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgendaEntry {
    pub period: usize,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub subject_id: Option<Id>,
    /// Resolved record; `None` for free periods and dangling ids.
    pub subject: Option<Subject>,
}

/// Start and end times of the first `count` lessons of a day.
///
/// Lesson `i + 1` starts when lesson `i` ends plus `inter_lesson_breaks_minutes[i]`.
/// Times wrap at midnight.
pub fn lesson_times(geometry: &LessonGeometry, count: usize) -> Vec<LessonTime> {
    let duration = Duration::minutes(i64::from(geometry.lesson_duration_minutes));
    let mut start = geometry.start_time;
    let mut times = Vec::with_capacity(count);

    for period in 0..count {
        let end = start.overflowing_add_signed(duration).0;
        times.push(LessonTime { period, start, end });

        let gap = geometry
            .inter_lesson_breaks_minutes
            .get(period)
            .copied()
            .unwrap_or(0);
        start = end.overflowing_add_signed(Duration::minutes(i64::from(gap))).0;
    }
    times
}

/// Lessons scheduled on `date`, in period order.
pub fn lessons_on(timetable: &Timetable, date: NaiveDate) -> Vec<AgendaEntry> {
    let ResolvedSlot {
        day_index,
        week_slot,
    } = resolve_slot(&timetable.cycle, date);
    let lessons = timetable.lessons(day_index, week_slot);
    let times = lesson_times(&timetable.lesson_geometry, lessons.len());

    lessons
        .iter()
        .zip(times)
        .map(|(subject_id, time)| AgendaEntry {
            period: time.period,
            start: time.start,
            end: time.end,
            subject: subject_id
                .as_ref()
                .and_then(|id| timetable.entities.subjects.get(id).cloned()),
            subject_id: subject_id.clone(),
        })
        .collect()
}

/// Put `subject_id` (or a free period) into the slot `date` resolves to.
///
/// The day's lesson list is padded with free periods up to `period`.
pub fn set_lesson_on(
    timetable: &mut Timetable,
    date: NaiveDate,
    period: usize,
    subject_id: Option<Id>,
) -> Result<ResolvedSlot, SyncError> {
    if period >= MAX_PERIODS_PER_DAY {
        return Err(SyncError::PeriodOutOfRange(period));
    }
    if let Some(id) = &subject_id {
        if !timetable.entities.subjects.contains_key(id) {
            return Err(SyncError::UnknownEntity {
                kind: "subject",
                id: id.clone(),
            });
        }
    }

    let resolved = resolve_slot(&timetable.cycle, date);
    let Some(lessons) = timetable.lessons_mut(resolved.day_index, resolved.week_slot) else {
        return Err(SyncError::PeriodOutOfRange(period));
    };

    if subject_id.is_none() && period >= lessons.len() {
        return Ok(resolved);
    }
    if lessons.len() <= period {
        lessons.resize(period + 1, None);
    }
    lessons[period] = subject_id;
    Ok(resolved)
}

/// Change the cycle length. Clamped to `1..=MAX_REPEAT_WEEKS`; returns the applied value.
///
/// New week slots start empty. Data for dropped weeks stays in the document
/// and comes back if the cycle is lengthened again.
pub fn set_repeat_weeks(timetable: &mut Timetable, repeat_weeks: u32) -> u32 {
    let applied = repeat_weeks.clamp(1, MAX_REPEAT_WEEKS);
    timetable.cycle.repeat_weeks = applied;
    timetable.normalize_slots();
    applied
}

// =============================================================================
// Entities
// =============================================================================

pub fn upsert_subject(timetable: &mut Timetable, subject: Subject) {
    timetable.entities.subjects.insert(subject.id.clone(), subject);
}

pub fn upsert_teacher(timetable: &mut Timetable, teacher: Teacher) {
    timetable.entities.teachers.insert(teacher.id.clone(), teacher);
}

pub fn upsert_link(timetable: &mut Timetable, link: Link) {
    timetable.entities.links.insert(link.id.clone(), link);
}

pub fn upsert_status(timetable: &mut Timetable, status: Status) {
    timetable.entities.statuses.insert(status.id.clone(), status);
}

pub fn upsert_gradient(timetable: &mut Timetable, gradient: Gradient) {
    timetable.entities.gradients.insert(gradient.id.clone(), gradient);
}

/// Remove a subject and free every period that referenced it, in all weeks.
pub fn remove_subject(timetable: &mut Timetable, id: &str) -> bool {
    if timetable.entities.subjects.remove(id).is_none() {
        return false;
    }

    let mut cleared = 0usize;
    for day in &mut timetable.slots {
        for lessons in day.values_mut() {
            for lesson in lessons.iter_mut() {
                if lesson.as_deref() == Some(id) {
                    *lesson = None;
                    cleared += 1;
                }
            }
        }
    }
    log::debug!("Removed subject {} ({} periods freed)", id, cleared);
    true
}

pub fn remove_teacher(timetable: &mut Timetable, id: &str) -> bool {
    if timetable.entities.teachers.remove(id).is_none() {
        return false;
    }
    for subject in timetable.entities.subjects.values_mut() {
        if subject.teacher_id.as_deref() == Some(id) {
            subject.teacher_id = None;
        }
    }
    true
}

pub fn remove_link(timetable: &mut Timetable, id: &str) -> bool {
    if timetable.entities.links.remove(id).is_none() {
        return false;
    }
    for subject in timetable.entities.subjects.values_mut() {
        subject.link_ids.retain(|link| link != id);
    }
    true
}

pub fn remove_status(timetable: &mut Timetable, id: &str) -> bool {
    if timetable.entities.statuses.remove(id).is_none() {
        return false;
    }
    for subject in timetable.entities.subjects.values_mut() {
        if subject.status_id.as_deref() == Some(id) {
            subject.status_id = None;
        }
    }
    true
}

pub fn remove_gradient(timetable: &mut Timetable, id: &str) -> bool {
    if timetable.entities.gradients.remove(id).is_none() {
        return false;
    }
    for subject in timetable.entities.subjects.values_mut() {
        if subject.gradient_id.as_deref() == Some(id) {
            subject.gradient_id = None;
        }
    }
    true
}
