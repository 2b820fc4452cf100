//! Policy document validation.
//!
//! Three phases, in order: JSON Schema (shape and field grammar), typed
//! parse into [`ScalingPolicy`], then semantic rules the schema cannot
//! express. Schema failures stop the pipeline; semantic checks keep going
//! and report everything wrong at once.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use jsonschema::JSONSchema;
use serde_json::Value;
use skyward_core::policy::{
    MetricType, RecurringSchedule, ScalingPolicy, ScalingRule, ScalingSchedules,
    SpecificDateSchedule,
};
use tracing::debug;

use crate::error::{PolicyError, PolicyResult, Violation};
use crate::overlap;

const POLICY_SCHEMA: &str = include_str!("policy_schema.json");

const HM: &str = "%H:%M";
const YMDHM: &str = "%Y-%m-%dT%H:%M";

/// Validates raw policy documents into typed policies.
///
/// Holds the compiled schema; construct once and share.
pub struct PolicyValidator {
    schema: JSONSchema,
}

impl PolicyValidator {
    pub fn new() -> Self {
        let raw: Value =
            serde_json::from_str(POLICY_SCHEMA).expect("embedded policy schema is valid JSON");
        let schema = JSONSchema::compile(&raw).expect("embedded policy schema compiles");
        Self { schema }
    }

    /// Validates `document` and returns the typed policy.
    ///
    /// `reference` is the instant used for past-window checks; it is a
    /// parameter so validation is replayable.
    pub fn validate(
        &self,
        document: &Value,
        reference: DateTime<Utc>,
    ) -> PolicyResult<ScalingPolicy> {
        if let Err(errors) = self.schema.validate(document) {
            let violations: Vec<Violation> = errors
                .map(|e| Violation::new(e.instance_path.to_string(), e.to_string()))
                .collect();
            debug!(count = violations.len(), "policy rejected by schema");
            return Err(PolicyError::Schema(violations));
        }

        let policy: ScalingPolicy = serde_json::from_value(document.clone()).map_err(|e| {
            PolicyError::Schema(vec![Violation::new("", format!("document does not parse: {e}"))])
        })?;

        let mut violations = Vec::new();
        check_instance_bounds(&policy, &mut violations);
        for (i, rule) in policy.scaling_rules.iter().enumerate() {
            check_rule(rule, i, &mut violations);
        }
        if let Some(schedules) = &policy.schedules {
            check_schedules(schedules, reference, &mut violations);
        }

        if violations.is_empty() {
            Ok(policy)
        } else {
            debug!(count = violations.len(), "policy failed semantic validation");
            Err(PolicyError::Semantic(violations))
        }
    }
}

impl Default for PolicyValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn check_instance_bounds(policy: &ScalingPolicy, out: &mut Vec<Violation>) {
    if policy.instance_min > policy.instance_max {
        out.push(Violation::new(
            "/instance_min_count",
            format!(
                "instance_min_count {} is greater than instance_max_count {}",
                policy.instance_min, policy.instance_max
            ),
        ));
    }
}

fn check_rule(rule: &ScalingRule, index: usize, out: &mut Vec<Violation>) {
    let path = format!("/scaling_rules/{index}/threshold");
    match &rule.metric_type {
        // Utilization metrics are percentages.
        MetricType::MemoryUtil | MetricType::Cpu => {
            if !(1..=100).contains(&rule.threshold) {
                out.push(Violation::new(
                    path,
                    format!("threshold for {} must be between 1 and 100", rule.metric_type),
                ));
            }
        }
        _ => {
            if rule.threshold <= 0 {
                out.push(Violation::new(
                    path,
                    format!("threshold for {} must be greater than 0", rule.metric_type),
                ));
            }
        }
    }
}

fn check_schedules(schedules: &ScalingSchedules, reference: DateTime<Utc>, out: &mut Vec<Violation>) {
    let tz = match schedules.timezone.parse::<Tz>() {
        Ok(tz) => Some(tz),
        Err(_) => {
            out.push(Violation::new(
                "/schedules/timezone",
                format!("unknown timezone {:?}", schedules.timezone),
            ));
            None
        }
    };
    // Past-window checks compare wall clocks in the policy timezone, so
    // they are skipped when the timezone itself is bad.
    let now_local = tz.map(|tz| reference.with_timezone(&tz).naive_local());

    for (i, entry) in schedules.recurring.iter().enumerate() {
        check_recurring(entry, i, out);
    }
    for (i, entry) in schedules.specific_date.iter().enumerate() {
        check_specific(entry, i, now_local, out);
    }

    for (i, j) in overlap::overlapping_recurring(&schedules.recurring, reference.date_naive()) {
        out.push(Violation::new(
            format!("/schedules/recurring_schedule/{j}"),
            format!("recurring_schedule[{j}] overlaps recurring_schedule[{i}]"),
        ));
    }
    for (i, j) in overlap::overlapping_specific(&schedules.specific_date) {
        out.push(Violation::new(
            format!("/schedules/specific_date/{j}"),
            format!("specific_date[{j}] overlaps specific_date[{i}]"),
        ));
    }
}

fn check_recurring(entry: &RecurringSchedule, index: usize, out: &mut Vec<Violation>) {
    let base = format!("/schedules/recurring_schedule/{index}");

    match (&entry.days_of_week, &entry.days_of_month) {
        (None, None) => out.push(Violation::new(
            base.clone(),
            "one of days_of_week and days_of_month must be set",
        )),
        (Some(_), Some(_)) => out.push(Violation::new(
            base.clone(),
            "only one of days_of_week and days_of_month may be set",
        )),
        _ => {}
    }

    if entry.start_time >= entry.end_time {
        out.push(Violation::new(
            format!("{base}/start_time"),
            format!(
                "start_time {} must be before end_time {}",
                entry.start_time.format(HM),
                entry.end_time.format(HM)
            ),
        ));
    }

    check_entry_bounds(&base, entry.instance_min, entry.instance_max, entry.initial_min, out);
}

fn check_specific(
    entry: &SpecificDateSchedule,
    index: usize,
    now_local: Option<chrono::NaiveDateTime>,
    out: &mut Vec<Violation>,
) {
    let base = format!("/schedules/specific_date/{index}");

    if entry.start_date_time >= entry.end_date_time {
        out.push(Violation::new(
            format!("{base}/start_date_time"),
            format!(
                "start_date_time {} must be before end_date_time {}",
                entry.start_date_time.format(YMDHM),
                entry.end_date_time.format(YMDHM)
            ),
        ));
    } else if let Some(now) = now_local {
        if entry.end_date_time <= now {
            out.push(Violation::new(
                format!("{base}/end_date_time"),
                format!("end_date_time {} is in the past", entry.end_date_time.format(YMDHM)),
            ));
        }
    }

    check_entry_bounds(&base, entry.instance_min, entry.instance_max, entry.initial_min, out);
}

fn check_entry_bounds(
    base: &str,
    min: u32,
    max: u32,
    initial: Option<u32>,
    out: &mut Vec<Violation>,
) {
    if min > max {
        out.push(Violation::new(
            format!("{base}/instance_min_count"),
            format!("instance_min_count {min} is greater than instance_max_count {max}"),
        ));
    }
    if let Some(initial) = initial {
        if initial > max {
            out.push(Violation::new(
                format!("{base}/initial_min_instance_count"),
                format!("initial_min_instance_count {initial} is greater than instance_max_count {max}"),
            ));
        } else if initial < min {
            out.push(Violation::new(
                format!("{base}/initial_min_instance_count"),
                format!("initial_min_instance_count {initial} is less than instance_min_count {min}"),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
    }

    fn validator() -> PolicyValidator {
        PolicyValidator::new()
    }

    fn valid_rule() -> Value {
        json!({
            "metric_type": "memoryused",
            "stat_window_secs": 600,
            "breach_duration_secs": 600,
            "threshold": 30,
            "operator": "<",
            "cool_down_secs": 300,
            "adjustment": "-1"
        })
    }

    #[test]
    fn accepts_a_minimal_valid_policy() {
        let doc = json!({
            "instance_min_count": 1,
            "instance_max_count": 3,
            "scaling_rules": [valid_rule()]
        });
        let policy = validator().validate(&doc, reference()).unwrap();
        assert_eq!(policy.instance_min, 1);
        assert_eq!(policy.scaling_rules[0].metric_type, MetricType::MemoryUsed);
    }

    #[test]
    fn schema_violations_accumulate() {
        let doc = json!({
            "instance_min_count": 0,
            "instance_max_count": 3,
            "scaling_rules": [{
                "metric_type": "memoryused",
                "threshold": 30,
                "operator": 5,
                "adjustment": "five"
            }]
        });
        let err = validator().validate(&doc, reference()).unwrap_err();
        let PolicyError::Schema(violations) = &err else {
            panic!("expected schema error, got {err:?}");
        };
        assert!(violations.iter().any(|v| v.path == "/instance_min_count"));
        assert!(violations.iter().any(|v| v.path == "/scaling_rules/0/operator"));
        assert!(violations.iter().any(|v| v.path == "/scaling_rules/0/adjustment"));
    }

    #[test]
    fn policy_needs_rules_or_schedules() {
        let doc = json!({ "instance_min_count": 1, "instance_max_count": 3 });
        let err = validator().validate(&doc, reference()).unwrap_err();
        assert!(matches!(err, PolicyError::Schema(_)));
    }

    #[test]
    fn schedules_alone_are_enough() {
        let doc = json!({
            "instance_min_count": 1,
            "instance_max_count": 3,
            "schedules": {
                "timezone": "Asia/Shanghai",
                "recurring_schedule": [{
                    "start_time": "10:00",
                    "end_time": "18:00",
                    "days_of_week": [1, 2, 3],
                    "instance_min_count": 2,
                    "instance_max_count": 10
                }]
            }
        });
        let policy = validator().validate(&doc, reference()).unwrap();
        assert!(policy.scaling_rules.is_empty());
        assert_eq!(policy.schedules.unwrap().recurring.len(), 1);
    }

    #[test]
    fn rejects_min_above_max() {
        let doc = json!({
            "instance_min_count": 5,
            "instance_max_count": 2,
            "scaling_rules": [valid_rule()]
        });
        let err = validator().validate(&doc, reference()).unwrap_err();
        let PolicyError::Semantic(violations) = &err else {
            panic!("expected semantic error, got {err:?}");
        };
        assert_eq!(violations[0].path, "/instance_min_count");
        assert!(violations[0].message.contains("5 is greater than instance_max_count 2"));
    }

    #[test]
    fn utilization_thresholds_are_percentages() {
        let doc = json!({
            "instance_min_count": 1,
            "instance_max_count": 3,
            "scaling_rules": [
                {
                    "metric_type": "memoryutil",
                    "threshold": 300,
                    "operator": ">",
                    "adjustment": "+1"
                },
                {
                    "metric_type": "throughput",
                    "threshold": -5,
                    "operator": ">",
                    "adjustment": "+1"
                }
            ]
        });
        let err = validator().validate(&doc, reference()).unwrap_err();
        let violations = err.violations();
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].path, "/scaling_rules/0/threshold");
        assert!(violations[0].message.contains("between 1 and 100"));
        assert!(violations[1].message.contains("greater than 0"));
    }

    #[test]
    fn rejects_unknown_timezone() {
        let doc = json!({
            "instance_min_count": 1,
            "instance_max_count": 3,
            "schedules": {
                "timezone": "Mars/Olympus",
                "specific_date": [{
                    "start_date_time": "2020-06-02T10:00",
                    "end_date_time": "2020-06-15T13:59",
                    "instance_min_count": 2,
                    "instance_max_count": 5
                }]
            }
        });
        let err = validator().validate(&doc, reference()).unwrap_err();
        assert!(err
            .violations()
            .iter()
            .any(|v| v.path == "/schedules/timezone" && v.message.contains("Mars/Olympus")));
    }

    #[test]
    fn rejects_overlapping_specific_dates() {
        let doc = json!({
            "instance_min_count": 1,
            "instance_max_count": 3,
            "schedules": {
                "timezone": "Asia/Shanghai",
                "specific_date": [
                    {
                        "start_date_time": "2020-01-02T10:00",
                        "end_date_time": "2020-06-15T13:59",
                        "instance_min_count": 2,
                        "instance_max_count": 5
                    },
                    {
                        "start_date_time": "2020-01-04T20:00",
                        "end_date_time": "2020-02-19T23:15",
                        "instance_min_count": 2,
                        "instance_max_count": 5
                    }
                ]
            }
        });
        let err = validator().validate(&doc, reference()).unwrap_err();
        assert!(err.violations().iter().any(|v| {
            v.path == "/schedules/specific_date/1"
                && v.message == "specific_date[1] overlaps specific_date[0]"
        }));
    }

    #[test]
    fn rejects_day_selector_misuse() {
        let doc = json!({
            "instance_min_count": 1,
            "instance_max_count": 3,
            "schedules": {
                "timezone": "Asia/Shanghai",
                "recurring_schedule": [
                    {
                        "start_time": "10:00",
                        "end_time": "18:00",
                        "instance_min_count": 2,
                        "instance_max_count": 5
                    },
                    {
                        "start_time": "19:00",
                        "end_time": "20:00",
                        "days_of_week": [4],
                        "days_of_month": [10],
                        "instance_min_count": 2,
                        "instance_max_count": 5
                    }
                ]
            }
        });
        let err = validator().validate(&doc, reference()).unwrap_err();
        let violations = err.violations();
        assert!(violations
            .iter()
            .any(|v| v.path == "/schedules/recurring_schedule/0"
                && v.message.contains("one of days_of_week and days_of_month must be set")));
        assert!(violations
            .iter()
            .any(|v| v.path == "/schedules/recurring_schedule/1"
                && v.message.contains("only one of")));
    }

    #[test]
    fn rejects_inverted_and_past_windows() {
        let doc = json!({
            "instance_min_count": 1,
            "instance_max_count": 3,
            "schedules": {
                "timezone": "Asia/Shanghai",
                "recurring_schedule": [{
                    "start_time": "18:00",
                    "end_time": "10:00",
                    "days_of_week": [1],
                    "instance_min_count": 2,
                    "instance_max_count": 5
                }],
                "specific_date": [{
                    "start_date_time": "2019-06-01T10:00",
                    "end_date_time": "2019-06-02T10:00",
                    "instance_min_count": 2,
                    "instance_max_count": 5
                }]
            }
        });
        let err = validator().validate(&doc, reference()).unwrap_err();
        let violations = err.violations();
        assert!(violations
            .iter()
            .any(|v| v.message == "start_time 18:00 must be before end_time 10:00"));
        assert!(violations
            .iter()
            .any(|v| v.message == "end_date_time 2019-06-02T10:00 is in the past"));
    }

    #[test]
    fn rejects_initial_min_outside_entry_bounds() {
        let doc = json!({
            "instance_min_count": 1,
            "instance_max_count": 3,
            "schedules": {
                "timezone": "Asia/Shanghai",
                "recurring_schedule": [{
                    "start_time": "10:00",
                    "end_time": "18:00",
                    "days_of_week": [1],
                    "instance_min_count": 2,
                    "instance_max_count": 5,
                    "initial_min_instance_count": 8
                }]
            }
        });
        let err = validator().validate(&doc, reference()).unwrap_err();
        assert!(err.violations().iter().any(|v| {
            v.path == "/schedules/recurring_schedule/0/initial_min_instance_count"
                && v.message.contains("8 is greater than instance_max_count 5")
        }));
    }

    #[test]
    fn semantic_violations_accumulate_across_sections() {
        let doc = json!({
            "instance_min_count": 5,
            "instance_max_count": 2,
            "scaling_rules": [{
                "metric_type": "cpu",
                "threshold": 500,
                "operator": ">",
                "adjustment": "+1"
            }],
            "schedules": {
                "timezone": "Nowhere/Special",
                "recurring_schedule": [{
                    "start_time": "10:00",
                    "end_time": "09:00",
                    "days_of_week": [1],
                    "instance_min_count": 2,
                    "instance_max_count": 5
                }]
            }
        });
        let err = validator().validate(&doc, reference()).unwrap_err();
        assert_eq!(err.violations().len(), 4);
    }
}
