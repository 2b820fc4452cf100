//! Overlap detection between schedule entries of the same kind.
//!
//! Entries are compared as wall-clock intervals in the policy timezone;
//! the UTC mapping cannot change whether two local windows collide.
//! Recurring entries are projected over a 13 month horizon so every
//! weekday/month-day combination gets a chance to coincide.

use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveDateTime};
use skyward_core::policy::{RecurringSchedule, SpecificDateSchedule};
use skyward_schedule::calendar::recurring_local_windows;

/// Covers every month length plus a leap day.
const HORIZON_DAYS: u32 = 397;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    start: NaiveDateTime,
    end: NaiveDateTime,
    entry: usize,
}

/// Pairs of recurring entries that would be active simultaneously on some
/// day within the horizon. Each pair `(i, j)` has `i < j`.
pub fn overlapping_recurring(
    entries: &[RecurringSchedule],
    from: NaiveDate,
) -> Vec<(usize, usize)> {
    let mut windows = Vec::new();
    for (entry, schedule) in entries.iter().enumerate() {
        if schedule.start_time >= schedule.end_time {
            // Inverted windows get their own violation elsewhere.
            continue;
        }
        for (start, end) in recurring_local_windows(schedule, from, HORIZON_DAYS) {
            windows.push(Window { start, end, entry });
        }
    }
    sweep(windows)
}

/// Pairs of specific-date entries whose intervals intersect.
pub fn overlapping_specific(entries: &[SpecificDateSchedule]) -> Vec<(usize, usize)> {
    let windows = entries
        .iter()
        .enumerate()
        .filter(|(_, s)| s.start_date_time < s.end_date_time)
        .map(|(entry, s)| Window {
            start: s.start_date_time,
            end: s.end_date_time,
            entry,
        })
        .collect();
    sweep(windows)
}

/// Sort-and-sweep over half-open intervals. Windows of the same entry are
/// disjoint by construction, so only cross-entry intersections surface.
fn sweep(mut windows: Vec<Window>) -> Vec<(usize, usize)> {
    windows.sort_by_key(|w| (w.start, w.end, w.entry));

    let mut pairs = BTreeSet::new();
    let mut active: Vec<Window> = Vec::new();
    for window in windows {
        active.retain(|a| a.end > window.start);
        for a in &active {
            if a.entry != window.entry {
                pairs.insert((a.entry.min(window.entry), a.entry.max(window.entry)));
            }
        }
        active.push(window);
    }
    pairs.into_iter().collect()
}
