//! Store-side record wrappers.

use serde::{Deserialize, Serialize};
use skyward_core::ActiveSchedule;

/// Versioned active-schedule row. The generation bumps on every committed
/// swap, including clears, so a cleared-then-reactivated schedule can
/// never satisfy a stale expectation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveScheduleRecord {
    pub generation: u64,
    /// `None` records "no schedule active" without losing the generation.
    pub schedule: Option<ActiveSchedule>,
}

/// Outcome of a compare-and-swap on an active-schedule row.
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome {
    /// The swap committed; carries the new generation.
    Committed(u64),
    /// The expectation did not match; carries what is actually stored.
    Conflict(Option<ActiveScheduleRecord>),
}

impl CasOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, CasOutcome::Committed(_))
    }
}
