//! Per-rule breach detection.
//!
//! A [`TriggerState`] owns the sliding sample window for one scaling rule.
//! Every evaluation appends the new sample, prunes anything older than the
//! breach duration, and fires an intent only when the retained window
//! covers the full duration, the sustained-breach rule holds, and the
//! cooldown since the last fired intent has elapsed.
//!
//! Evaluation never reads a clock; `now` is an argument, which in the
//! engine is the sample's own timestamp. Decisions are therefore a pure
//! function of the sample history and replay identically.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use skyward_core::policy::{Operator, ScalingDefaults, ScalingRule};
use skyward_core::ScaleIntent;
use tracing::trace;

use crate::error::{EvaluationError, EvaluationResult};

/// What "sustained" means for a breach window. `AllSamples` is the
/// default; the others exist so the policy can be loosened without
/// touching the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BreachRule {
    /// Every sample in the window must satisfy the comparison.
    #[default]
    AllSamples,
    /// A strict majority of the window must satisfy it.
    Majority,
    /// Only the newest sample is consulted.
    LatestOnly,
}

impl BreachRule {
    fn sustained(self, window: &VecDeque<(DateTime<Utc>, f64)>, operator: Operator, threshold: i64) -> bool {
        match self {
            BreachRule::AllSamples => {
                window.iter().all(|&(_, v)| operator.compare(v, threshold))
            }
            BreachRule::Majority => {
                let hits = window.iter().filter(|&&(_, v)| operator.compare(v, threshold)).count();
                hits * 2 > window.len()
            }
            BreachRule::LatestOnly => window
                .back()
                .is_some_and(|&(_, v)| operator.compare(v, threshold)),
        }
    }
}

/// Sliding-window breach state for one (application, rule) pair.
#[derive(Debug, Clone)]
pub struct TriggerState {
    rule: ScalingRule,
    defaults: ScalingDefaults,
    breach_rule: BreachRule,
    /// Samples in timestamp order, oldest at the front.
    window: VecDeque<(DateTime<Utc>, f64)>,
    last_fired_at: Option<DateTime<Utc>>,
}

impl TriggerState {
    pub fn new(rule: ScalingRule, defaults: ScalingDefaults, breach_rule: BreachRule) -> Self {
        Self {
            rule,
            defaults,
            breach_rule,
            window: VecDeque::new(),
            last_fired_at: None,
        }
    }

    pub fn rule(&self) -> &ScalingRule {
        &self.rule
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    pub fn last_fired_at(&self) -> Option<DateTime<Utc>> {
        self.last_fired_at
    }

    /// Feeds one sample and returns the intent it completes, if any.
    pub fn observe(
        &mut self,
        timestamp: DateTime<Utc>,
        value: f64,
        now: DateTime<Utc>,
    ) -> EvaluationResult<Option<ScaleIntent>> {
        if !value.is_finite() {
            return Err(EvaluationError::NonFiniteValue {
                metric: self.rule.metric_type.clone(),
                value,
            });
        }

        // Samples usually arrive in order; walk from the back for the
        // occasional straggler.
        let mut idx = self.window.len();
        while idx > 0 && self.window[idx - 1].0 > timestamp {
            idx -= 1;
        }
        self.window.insert(idx, (timestamp, value));

        let breach_duration = self.rule.breach_duration(&self.defaults);
        let cutoff = now - breach_duration;
        while let Some(&(ts, _)) = self.window.front() {
            if ts < cutoff {
                self.window.pop_front();
            } else {
                break;
            }
        }

        // Sufficiency is a coverage test, not an exact-span test: n
        // samples spanning s seconds cover s + s/(n-1), the newest
        // sample standing for one cadence interval. A lone sample
        // carries no cadence and is never enough.
        if self.window.len() < 2 {
            return Ok(None);
        }
        let span = now - self.window[0].0;
        let gap = span / (self.window.len() as i32 - 1);
        if span + gap < breach_duration {
            return Ok(None);
        }
        if !self.breach_rule.sustained(&self.window, self.rule.operator, self.rule.threshold) {
            return Ok(None);
        }

        if let Some(last) = self.last_fired_at {
            if now - last < self.rule.cool_down(&self.defaults) {
                trace!(
                    metric = %self.rule.metric_type,
                    last_fired = %last,
                    "sustained breach suppressed by cooldown"
                );
                return Ok(None);
            }
        }

        self.last_fired_at = Some(now);
        let breached_value = self.window.back().map_or(value, |&(_, v)| v);
        Ok(Some(ScaleIntent {
            metric_type: self.rule.metric_type.clone(),
            operator: self.rule.operator,
            threshold: self.rule.threshold,
            adjustment: self.rule.adjustment,
            breached_value,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use skyward_core::policy::{Adjustment, MetricType};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 6, 1, 12, 0, 0).unwrap()
    }

    fn memory_rule() -> ScalingRule {
        ScalingRule {
            metric_type: MetricType::MemoryUsed,
            stat_window_secs: Some(600),
            breach_duration_secs: Some(600),
            threshold: 30,
            operator: Operator::LessThan,
            cool_down_secs: Some(300),
            adjustment: Adjustment::Step(-1),
        }
    }

    fn state() -> TriggerState {
        TriggerState::new(memory_rule(), ScalingDefaults::default(), BreachRule::AllSamples)
    }

    fn feed(state: &mut TriggerState, offsets_secs: impl IntoIterator<Item = i64>, value: f64) -> Vec<ScaleIntent> {
        let mut fired = Vec::new();
        for offset in offsets_secs {
            let ts = base() + Duration::seconds(offset);
            if let Some(intent) = state.observe(ts, value, ts).unwrap() {
                fired.push(intent);
            }
        }
        fired
    }

    #[test]
    fn fires_once_when_window_covers_breach_duration() {
        let mut state = state();
        // Ten samples, 60s apart, are 600s of evidence.
        let fired = feed(&mut state, (0..10).map(|i| i * 60), 12.0);
        assert_eq!(fired.len(), 1);
        let intent = &fired[0];
        assert_eq!(intent.adjustment, Adjustment::Step(-1));
        assert_eq!(intent.threshold, 30);
        assert_eq!(intent.breached_value, 12.0);
        assert_eq!(state.last_fired_at(), Some(base() + Duration::seconds(540)));
    }

    #[test]
    fn short_history_is_insufficient() {
        let mut state = state();
        // Nine samples only cover 540s.
        let fired = feed(&mut state, (0..9).map(|i| i * 60), 12.0);
        assert!(fired.is_empty());
    }

    #[test]
    fn misaligned_cadence_still_fires() {
        let mut state = state();
        // 45s never divides 600s evenly; no sample ever lands exactly on
        // the window cutoff. Coverage reaches 600s at t=585.
        let fired = feed(&mut state, (0..14).map(|i| i * 45), 12.0);
        assert_eq!(fired.len(), 1);
        assert_eq!(state.last_fired_at(), Some(base() + Duration::seconds(585)));

        // The cooldown gates the refire the same as an aligned cadence.
        let fired = feed(&mut state, (14..=20).map(|i| i * 45), 12.0);
        assert_eq!(fired.len(), 1);
        assert_eq!(state.last_fired_at(), Some(base() + Duration::seconds(900)));
    }

    #[test]
    fn cooldown_suppresses_then_releases() {
        let mut state = state();
        // Continuous breach for 15 minutes at 60s cadence.
        let fired = feed(&mut state, (0..=15).map(|i| i * 60), 12.0);
        // Fires at t=540, cooldown suppresses t=600..780, fires again at
        // t=840 when the 300s cooldown has elapsed.
        assert_eq!(fired.len(), 2);
        assert_eq!(state.last_fired_at(), Some(base() + Duration::seconds(840)));
    }

    #[test]
    fn one_good_sample_blocks_until_it_ages_out() {
        let mut state = state();
        let mut fired = feed(&mut state, (0..=8).map(|i| i * 60), 12.0);
        // A recovering sample at t=540 spoils the all-samples test.
        fired.extend(feed(&mut state, [540], 45.0));
        assert!(fired.is_empty());

        // Keep breaching. The good sample leaves the window once the
        // cutoff passes t=540, at t=1200.
        fired.extend(feed(&mut state, (10..=20).map(|i| i * 60), 12.0));
        assert_eq!(fired.len(), 1);
        assert_eq!(state.last_fired_at(), Some(base() + Duration::seconds(1200)));
    }

    #[test]
    fn out_of_order_samples_are_inserted_in_order() {
        let mut state = state();
        let ts = |s: i64| base() + Duration::seconds(s);
        state.observe(ts(0), 10.0, ts(0)).unwrap();
        state.observe(ts(120), 12.0, ts(120)).unwrap();
        // Straggler lands between the two.
        state.observe(ts(60), 11.0, ts(120)).unwrap();
        assert_eq!(state.window_len(), 3);

        // An ancient straggler is pruned straight back out.
        state.observe(ts(-1200), 9.0, ts(120)).unwrap();
        assert_eq!(state.window_len(), 3);
    }

    #[test]
    fn non_finite_sample_is_rejected_and_window_untouched() {
        let mut state = state();
        feed(&mut state, [0, 60], 12.0);
        let err = state
            .observe(base() + Duration::seconds(120), f64::NAN, base() + Duration::seconds(120))
            .unwrap_err();
        assert!(matches!(err, EvaluationError::NonFiniteValue { .. }));
        assert_eq!(state.window_len(), 2);
    }

    #[test]
    fn majority_rule_tolerates_minority_recovery() {
        let mut state =
            TriggerState::new(memory_rule(), ScalingDefaults::default(), BreachRule::Majority);
        let ts = |s: i64| base() + Duration::seconds(s);
        for i in 0..=9 {
            let value = if i == 4 { 45.0 } else { 12.0 };
            let t = ts(i * 60);
            let fired = state.observe(t, value, t).unwrap();
            if i < 9 {
                assert!(fired.is_none());
            } else {
                // 9 of 10 samples breach; majority holds.
                assert!(fired.is_some());
            }
        }
    }

    #[test]
    fn latest_only_rule_ignores_history() {
        let mut state =
            TriggerState::new(memory_rule(), ScalingDefaults::default(), BreachRule::LatestOnly);
        let mut fired = feed(&mut state, (0..=8).map(|i| i * 60), 45.0);
        assert!(fired.is_empty());
        // Only the newest sample matters once the window is covered.
        fired.extend(feed(&mut state, [540], 12.0));
        assert_eq!(fired.len(), 1);
    }
}
