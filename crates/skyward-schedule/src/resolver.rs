//! Pure schedule resolution: which override is in effect, and when that
//! answer next changes.
//!
//! The resolver never reads a clock. Callers pass the instant they care
//! about, which keeps resolution replayable and makes the worker's
//! boundary sleeps testable.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use skyward_core::policy::ScalingSchedules;
use skyward_core::ActiveSchedule;
use tracing::trace;

use crate::calendar::{self, Occurrence};
use crate::error::{ScheduleError, ScheduleResult};

/// Resolution outcome at one instant, paired with the next instant at
/// which it could differ.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleSnapshot {
    pub active: Option<ActiveSchedule>,
    /// Earliest window start or end strictly after the queried instant,
    /// `None` when nothing changes within the resolver's lookahead.
    pub next_boundary: Option<DateTime<Utc>>,
}

/// Resolves schedule overrides against the IANA timezone database.
#[derive(Debug, Clone)]
pub struct ScheduleResolver {
    /// How many days ahead to search for the next boundary. A year plus a
    /// leap day covers every recurring selector.
    lookahead_days: u32,
}

impl Default for ScheduleResolver {
    fn default() -> Self {
        Self { lookahead_days: 366 }
    }
}

impl ScheduleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn with_lookahead_days(lookahead_days: u32) -> Self {
        Self { lookahead_days }
    }

    /// The override in effect at `at`, if any. A specific-date window
    /// shadows any recurring window covering the same instant.
    pub fn resolve(
        &self,
        schedules: &ScalingSchedules,
        at: DateTime<Utc>,
    ) -> ScheduleResult<Option<ActiveSchedule>> {
        let tz = parse_tz(&schedules.timezone)?;

        if let Some(occ) = Self::specific_covering(tz, schedules, at) {
            return Ok(Some(occ.to_active()));
        }
        Ok(Self::recurring_covering(tz, schedules, at).map(|occ| occ.to_active()))
    }

    /// Earliest boundary strictly after `after`: any window start or end,
    /// from either kind of entry. Ends of shadowed recurring windows count
    /// too; the caller re-resolves at the boundary and sees no change,
    /// which is harmless.
    pub fn next_boundary(
        &self,
        schedules: &ScalingSchedules,
        after: DateTime<Utc>,
    ) -> ScheduleResult<Option<DateTime<Utc>>> {
        let tz = parse_tz(&schedules.timezone)?;

        let mut earliest: Option<DateTime<Utc>> = None;
        let mut push = |instant: DateTime<Utc>| {
            if instant > after && earliest.is_none_or(|e| instant < e) {
                earliest = Some(instant);
            }
        };

        for (index, entry) in schedules.specific_date.iter().enumerate() {
            if let Some(occ) = calendar::specific_occurrence(tz, entry, index) {
                push(occ.start);
                push(occ.end);
            }
        }

        // Recurring entries: walk local days forward until one produces a
        // boundary after `after`; later days only get larger.
        let mut day = after.with_timezone(&tz).date_naive();
        for _ in 0..=self.lookahead_days {
            let mut found_on_day = false;
            for (index, entry) in schedules.recurring.iter().enumerate() {
                if let Some(occ) = calendar::recurring_occurrence_on(tz, entry, index, day) {
                    if occ.start > after || occ.end > after {
                        found_on_day = true;
                    }
                    push(occ.start);
                    push(occ.end);
                }
            }
            if found_on_day {
                break;
            }
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }

        trace!(after = %after, boundary = ?earliest, "schedule boundary search");
        Ok(earliest)
    }

    /// Resolution and next boundary in one call, as the worker consumes
    /// them together.
    pub fn snapshot(
        &self,
        schedules: &ScalingSchedules,
        at: DateTime<Utc>,
    ) -> ScheduleResult<ScheduleSnapshot> {
        Ok(ScheduleSnapshot {
            active: self.resolve(schedules, at)?,
            next_boundary: self.next_boundary(schedules, at)?,
        })
    }

    fn specific_covering(
        tz: Tz,
        schedules: &ScalingSchedules,
        at: DateTime<Utc>,
    ) -> Option<Occurrence> {
        schedules
            .specific_date
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| calendar::specific_occurrence(tz, entry, index))
            .filter(|occ| occ.contains(at))
            .min_by_key(|occ| occ.start)
    }

    fn recurring_covering(
        tz: Tz,
        schedules: &ScalingSchedules,
        at: DateTime<Utc>,
    ) -> Option<Occurrence> {
        // Windows never cross local midnight, so only the local day of
        // `at` can produce a covering occurrence.
        let day = at.with_timezone(&tz).date_naive();
        schedules
            .recurring
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| calendar::recurring_occurrence_on(tz, entry, index, day))
            .filter(|occ| occ.contains(at))
            .min_by_key(|occ| occ.start)
    }
}

fn parse_tz(name: &str) -> ScheduleResult<Tz> {
    name.parse::<Tz>()
        .map_err(|_| ScheduleError::unknown_timezone(name))
}

/// Sleep duration until `boundary`, saturating at zero when the boundary
/// has already passed.
pub fn until(boundary: DateTime<Utc>, now: DateTime<Utc>) -> std::time::Duration {
    (boundary - now)
        .max(Duration::zero())
        .to_std()
        .unwrap_or(std::time::Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime, TimeZone};
    use skyward_core::policy::{RecurringSchedule, SpecificDateSchedule};

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, 0).unwrap()
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn weekday_window() -> RecurringSchedule {
        RecurringSchedule {
            start_time: time(10, 0),
            end_time: time(18, 0),
            days_of_week: Some(vec![1, 2, 3]),
            days_of_month: None,
            instance_min: 2,
            instance_max: 10,
            initial_min: Some(5),
        }
    }

    fn june_window() -> SpecificDateSchedule {
        SpecificDateSchedule {
            start_date_time: local(2020, 6, 2, 10, 0),
            end_date_time: local(2020, 6, 15, 13, 59),
            instance_min: 3,
            instance_max: 12,
            initial_min: Some(7),
        }
    }

    fn schedules(
        recurring: Vec<RecurringSchedule>,
        specific: Vec<SpecificDateSchedule>,
    ) -> ScalingSchedules {
        ScalingSchedules {
            timezone: "Asia/Shanghai".into(),
            recurring,
            specific_date: specific,
        }
    }

    #[test]
    fn resolves_recurring_window_on_selected_day() {
        let resolver = ScheduleResolver::new();
        let s = schedules(vec![weekday_window()], vec![]);

        // 2020-06-02 is a Tuesday; 11:00 local is 03:00 UTC.
        let active = resolver.resolve(&s, utc(2020, 6, 2, 3, 0)).unwrap().unwrap();
        assert_eq!(active.schedule_id, "recurring-0");
        assert_eq!(active.instance_min, 2);
        assert_eq!(active.initial_min, Some(5));

        // 09:59 local, before the window.
        assert_eq!(resolver.resolve(&s, utc(2020, 6, 2, 1, 59)).unwrap(), None);
        // Saturday, never selected.
        assert_eq!(resolver.resolve(&s, utc(2020, 6, 6, 3, 0)).unwrap(), None);
    }

    #[test]
    fn specific_date_shadows_recurring() {
        let resolver = ScheduleResolver::new();
        let s = schedules(vec![weekday_window()], vec![june_window()]);

        let active = resolver.resolve(&s, utc(2020, 6, 2, 3, 0)).unwrap().unwrap();
        assert_eq!(active.schedule_id, "specific-0");
        assert_eq!(active.instance_max, 12);

        // After the specific window ends the recurring one shows through.
        // 2020-06-16 is a Tuesday; 11:00 local.
        let later = resolver.resolve(&s, utc(2020, 6, 16, 3, 0)).unwrap().unwrap();
        assert_eq!(later.schedule_id, "recurring-0");
    }

    #[test]
    fn window_boundaries_are_half_open() {
        let resolver = ScheduleResolver::new();
        let s = schedules(vec![weekday_window()], vec![]);

        // Start instant is inside, end instant is outside.
        let at_start = resolver.resolve(&s, utc(2020, 6, 2, 2, 0)).unwrap();
        assert!(at_start.is_some());
        let at_end = resolver.resolve(&s, utc(2020, 6, 2, 10, 0)).unwrap();
        assert_eq!(at_end, None);
    }

    #[test]
    fn next_boundary_walks_starts_and_ends() {
        let resolver = ScheduleResolver::new();
        let s = schedules(vec![weekday_window()], vec![]);

        // During Tuesday's window the next boundary is its end, 18:00
        // local = 10:00 UTC.
        let b = resolver.next_boundary(&s, utc(2020, 6, 2, 3, 0)).unwrap();
        assert_eq!(b, Some(utc(2020, 6, 2, 10, 0)));

        // Exactly at the end the next boundary is Wednesday's start.
        let b = resolver.next_boundary(&s, utc(2020, 6, 2, 10, 0)).unwrap();
        assert_eq!(b, Some(utc(2020, 6, 3, 2, 0)));

        // Wednesday evening rolls over the weekend gap to Monday.
        let b = resolver.next_boundary(&s, utc(2020, 6, 3, 10, 0)).unwrap();
        assert_eq!(b, Some(utc(2020, 6, 8, 2, 0)));
    }

    #[test]
    fn next_boundary_sees_specific_dates() {
        let resolver = ScheduleResolver::new();
        let s = schedules(vec![], vec![june_window()]);

        let b = resolver.next_boundary(&s, utc(2020, 6, 1, 0, 0)).unwrap();
        assert_eq!(b, Some(utc(2020, 6, 2, 2, 0)));
        let b = resolver.next_boundary(&s, utc(2020, 6, 2, 2, 0)).unwrap();
        assert_eq!(b, Some(utc(2020, 6, 15, 5, 59)));
        let b = resolver.next_boundary(&s, utc(2020, 6, 15, 5, 59)).unwrap();
        assert_eq!(b, None);
    }

    #[test]
    fn no_boundary_within_lookahead() {
        let resolver = ScheduleResolver::with_lookahead_days(3);
        // Month-day 15 only; querying from the 16th leaves nothing within
        // three days.
        let entry = RecurringSchedule {
            days_of_week: None,
            days_of_month: Some(vec![15]),
            ..weekday_window()
        };
        let s = schedules(vec![entry], vec![]);
        let b = resolver.next_boundary(&s, utc(2020, 6, 16, 0, 0)).unwrap();
        assert_eq!(b, None);
    }

    #[test]
    fn unknown_timezone_is_an_error() {
        let resolver = ScheduleResolver::new();
        let mut s = schedules(vec![weekday_window()], vec![]);
        s.timezone = "Mars/Olympus".into();
        let err = resolver.resolve(&s, utc(2020, 6, 2, 3, 0)).unwrap_err();
        assert_eq!(err, ScheduleError::unknown_timezone("Mars/Olympus"));
    }

    #[test]
    fn snapshot_pairs_resolution_with_boundary() {
        let resolver = ScheduleResolver::new();
        let s = schedules(vec![weekday_window()], vec![]);
        let snap = resolver.snapshot(&s, utc(2020, 6, 2, 3, 0)).unwrap();
        assert_eq!(snap.active.unwrap().schedule_id, "recurring-0");
        assert_eq!(snap.next_boundary, Some(utc(2020, 6, 2, 10, 0)));
    }

    #[test]
    fn until_saturates_at_zero() {
        let now = utc(2020, 6, 2, 10, 0);
        assert_eq!(until(utc(2020, 6, 2, 10, 5), now), std::time::Duration::from_secs(300));
        assert_eq!(until(utc(2020, 6, 2, 9, 0), now), std::time::Duration::ZERO);
    }
}
