//! The decision combiner: one pure function from consistent inputs to a
//! scale action.
//!
//! Everything here is arithmetic over values the worker already holds;
//! no clock, no store, no I/O. Replaying the same inputs produces a
//! byte-identical action, which is what lets the executor treat delivery
//! as at-least-once.

use chrono::{DateTime, Utc};
use skyward_core::policy::InstanceBounds;
use skyward_core::{ActionReason, ActiveSchedule, ScaleAction, ScaleIntent};

/// A consistent view of one application at one decision instant.
#[derive(Debug, Clone)]
pub struct DecisionInputs<'a> {
    pub app_id: &'a str,
    /// Decision instant, supplied by the caller.
    pub at: DateTime<Utc>,
    /// Static bounds from the policy, used when no schedule is active.
    pub policy_bounds: InstanceBounds,
    pub active: Option<&'a ActiveSchedule>,
    pub intent: Option<&'a ScaleIntent>,
    pub current_instances: u32,
    /// This decision was prompted by a schedule transition.
    pub schedule_changed: bool,
    /// The transition entered a window (as opposed to leaving one or
    /// swapping bounds), so the window's initial-minimum floor applies.
    pub just_activated: bool,
}

/// Combines schedule state and breach intent into the final action.
///
/// Effective bounds come from the active schedule when present, else the
/// policy. An intent moves the target by its adjustment; a bare schedule
/// change clamps the current count into the new bounds. The action is
/// emitted even when the target equals the current count, flagged no-op.
pub fn combine(inputs: DecisionInputs<'_>) -> ScaleAction {
    let bounds = inputs
        .active
        .map_or(inputs.policy_bounds, ActiveSchedule::bounds);

    let mut target = match inputs.intent {
        Some(intent) => {
            let proposed = i64::from(inputs.current_instances)
                + intent.adjustment.delta(inputs.current_instances);
            bounds.clamp(proposed)
        }
        None => bounds.clamp(i64::from(inputs.current_instances)),
    };

    if inputs.just_activated {
        if let Some(active) = inputs.active {
            // The floor never exceeds the window max; validation holds
            // initial_min inside the window bounds.
            target = target.max(active.activation_floor());
        }
    }

    let reason = match (inputs.schedule_changed, inputs.intent.is_some()) {
        (true, true) => ActionReason::Both,
        (false, true) => ActionReason::Breach,
        // Bare reconciliation counts as a schedule-side decision.
        (_, false) => ActionReason::ScheduleChange,
    };

    ScaleAction {
        app_id: inputs.app_id.to_owned(),
        timestamp: inputs.at,
        reason,
        bounds,
        current_instances: inputs.current_instances,
        target_instances: target,
        adjustment: inputs.intent.map(|i| i.adjustment),
        no_op: target == inputs.current_instances,
    }
}
