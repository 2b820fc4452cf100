//! Scale decisions and their persisted artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AppId;
use crate::policy::{Adjustment, InstanceBounds, MetricType, Operator};

/// The schedule override currently in effect for an app, persisted so a
/// restart can tell a boundary crossing from a resumed window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveSchedule {
    /// Stable id of the policy entry this window came from, e.g.
    /// `"recurring-0"` or `"specific-2"`.
    pub schedule_id: String,
    #[serde(rename = "instance_min_count")]
    pub instance_min: u32,
    #[serde(rename = "instance_max_count")]
    pub instance_max: u32,
    #[serde(
        rename = "initial_min_instance_count",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub initial_min: Option<u32>,
}

impl ActiveSchedule {
    pub fn bounds(&self) -> InstanceBounds {
        InstanceBounds::new(self.instance_min, self.instance_max)
    }

    /// Floor applied once when the window activates: the larger of the
    /// window minimum and its initial minimum.
    pub fn activation_floor(&self) -> u32 {
        self.instance_min.max(self.initial_min.unwrap_or(0))
    }
}

/// A fired breach adjustment, pending combination with schedule state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleIntent {
    pub metric_type: MetricType,
    pub operator: Operator,
    pub threshold: i64,
    pub adjustment: Adjustment,
    /// Metric value that completed the breach, for operator diagnostics.
    pub breached_value: f64,
}

/// Why a scale action was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionReason {
    ScheduleChange,
    Breach,
    Both,
}

impl ActionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionReason::ScheduleChange => "schedule_change",
            ActionReason::Breach => "breach",
            ActionReason::Both => "both",
        }
    }

    /// Merges the schedule-side reason with a breach-side one.
    pub fn merge(self, other: ActionReason) -> ActionReason {
        if self == other { self } else { ActionReason::Both }
    }
}

impl std::fmt::Display for ActionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final scale instruction handed to the platform executor.
///
/// Actions are pure functions of their inputs; replaying the same inputs
/// yields a byte-identical action with the same `table_key`, which is what
/// makes at-least-once delivery safe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleAction {
    pub app_id: AppId,
    /// Decision instant. Supplied by the caller, never sampled internally.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub reason: ActionReason,
    pub bounds: InstanceBounds,
    pub current_instances: u32,
    pub target_instances: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjustment: Option<Adjustment>,
    /// Set when clamping collapsed the decision back to the current count.
    pub no_op: bool,
}

impl ScaleAction {
    pub fn is_scaling(&self) -> bool {
        !self.no_op
    }

    /// Composite key for the scale-actions table, sorted by app then time.
    pub fn table_key(&self) -> String {
        format!(
            "{}:{:020}:{}",
            self.app_id,
            self.timestamp.timestamp_millis(),
            self.reason.as_str()
        )
    }
}
