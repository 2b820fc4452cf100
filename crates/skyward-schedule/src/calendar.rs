//! Projection of policy schedule entries onto concrete UTC windows.
//!
//! All the timezone arithmetic lives here. Local wall-clock times that do
//! not exist (spring-forward gaps) drop the occurrence for that day;
//! times that exist twice (fall-back overlaps) resolve to the earlier
//! instant.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use skyward_core::policy::{InstanceBounds, RecurringSchedule, SpecificDateSchedule};
use skyward_core::ActiveSchedule;

/// A half-open UTC window `[start, end)` during which one schedule entry
/// overrides the policy bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub schedule_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub bounds: InstanceBounds,
    pub initial_min: Option<u32>,
}

impl Occurrence {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }

    pub fn to_active(&self) -> ActiveSchedule {
        ActiveSchedule {
            schedule_id: self.schedule_id.clone(),
            instance_min: self.bounds.min,
            instance_max: self.bounds.max,
            initial_min: self.initial_min,
        }
    }
}

/// Stable id for the `index`-th recurring entry of a policy.
pub fn recurring_id(index: usize) -> String {
    format!("recurring-{index}")
}

/// Stable id for the `index`-th specific-date entry of a policy.
pub fn specific_id(index: usize) -> String {
    format!("specific-{index}")
}

/// Maps a local wall-clock time into UTC under the gap/overlap rules
/// above. `None` means the time does not exist in `tz` that day.
pub fn to_utc(tz: Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&local)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
}

/// Whether `entry` is selected on `date`. Entries carry exactly one day
/// selector once validated; an entry with neither matches nothing.
pub fn day_selected(entry: &RecurringSchedule, date: NaiveDate) -> bool {
    if let Some(days) = &entry.days_of_week {
        return days.contains(&date.weekday().number_from_monday());
    }
    if let Some(days) = &entry.days_of_month {
        return days.contains(&date.day());
    }
    false
}

/// UTC occurrence of a recurring entry on one local calendar day, if the
/// entry is selected that day and both endpoints exist in `tz`.
pub fn recurring_occurrence_on(
    tz: Tz,
    entry: &RecurringSchedule,
    index: usize,
    date: NaiveDate,
) -> Option<Occurrence> {
    if !day_selected(entry, date) {
        return None;
    }
    let start = to_utc(tz, date.and_time(entry.start_time))?;
    let end = to_utc(tz, date.and_time(entry.end_time))?;
    if end <= start {
        return None;
    }
    Some(Occurrence {
        schedule_id: recurring_id(index),
        start,
        end,
        bounds: entry.bounds(),
        initial_min: entry.initial_min,
    })
}

/// UTC occurrence of a specific-date entry, if both endpoints exist in
/// `tz`.
pub fn specific_occurrence(
    tz: Tz,
    entry: &SpecificDateSchedule,
    index: usize,
) -> Option<Occurrence> {
    let start = to_utc(tz, entry.start_date_time)?;
    let end = to_utc(tz, entry.end_date_time)?;
    if end <= start {
        return None;
    }
    Some(Occurrence {
        schedule_id: specific_id(index),
        start,
        end,
        bounds: entry.bounds(),
        initial_min: entry.initial_min,
    })
}

/// Naive local windows of a recurring entry over `[from, from + days)`,
/// in date order. Used by overlap validation, which compares wall-clock
/// intervals and never needs the UTC mapping.
pub fn recurring_local_windows(
    entry: &RecurringSchedule,
    from: NaiveDate,
    days: u32,
) -> Vec<(NaiveDateTime, NaiveDateTime)> {
    from.iter_days()
        .take(days as usize)
        .filter(|date| day_selected(entry, *date))
        .map(|date| (date.and_time(entry.start_time), date.and_time(entry.end_time)))
        .collect()
}
