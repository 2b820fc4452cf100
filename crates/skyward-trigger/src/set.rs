//! The trigger states for one application, routed by metric type.

use chrono::{DateTime, Utc};
use skyward_core::policy::{ScalingDefaults, ScalingPolicy};
use skyward_core::{MetricSample, ScaleIntent};
use tracing::debug;

use crate::error::{EvaluationError, EvaluationResult};
use crate::evaluator::{BreachRule, TriggerState};

/// All trigger states for one application, in rule declaration order.
#[derive(Debug, Clone)]
pub struct TriggerSet {
    defaults: ScalingDefaults,
    breach_rule: BreachRule,
    triggers: Vec<TriggerState>,
}

impl TriggerSet {
    pub fn new(policy: &ScalingPolicy, defaults: ScalingDefaults, breach_rule: BreachRule) -> Self {
        let triggers = policy
            .scaling_rules
            .iter()
            .map(|rule| TriggerState::new(rule.clone(), defaults, breach_rule))
            .collect();
        Self { defaults, breach_rule, triggers }
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Routes one sample to every rule watching its metric and returns the
    /// fired intents in declaration order. A malformed sample touches no
    /// window.
    pub fn observe(
        &mut self,
        sample: &MetricSample,
        now: DateTime<Utc>,
    ) -> EvaluationResult<Vec<ScaleIntent>> {
        if !sample.value.is_finite() {
            return Err(EvaluationError::NonFiniteValue {
                metric: sample.metric_type.clone(),
                value: sample.value,
            });
        }

        let mut fired = Vec::new();
        for trigger in &mut self.triggers {
            if trigger.rule().metric_type != sample.metric_type {
                continue;
            }
            if let Some(intent) = trigger.observe(sample.timestamp, sample.value, now)? {
                fired.push(intent);
            }
        }
        Ok(fired)
    }

    /// Rebuilds the set against an updated policy. Windows survive for
    /// rules that are unchanged; removed rules lose their state, new rules
    /// start cold.
    pub fn rebuild(&mut self, policy: &ScalingPolicy) {
        let mut old: Vec<Option<TriggerState>> =
            std::mem::take(&mut self.triggers).into_iter().map(Some).collect();
        self.triggers = policy
            .scaling_rules
            .iter()
            .map(|rule| {
                let carried = old.iter_mut().find_map(|slot| {
                    if slot.as_ref().is_some_and(|t| t.rule() == rule) {
                        slot.take()
                    } else {
                        None
                    }
                });
                carried.unwrap_or_else(|| {
                    TriggerState::new(rule.clone(), self.defaults, self.breach_rule)
                })
            })
            .collect();
        debug!(rules = self.triggers.len(), "trigger set rebuilt");
    }
}
