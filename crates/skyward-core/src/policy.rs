//! Scaling policy model.
//!
//! Mirrors the JSON policy document apps submit: instance bounds, dynamic
//! scaling rules, and optional schedule overrides. Field renames keep the
//! wire format stable; the Rust names are the ones the rest of the
//! workspace reasons in.

use std::fmt;
use std::str::FromStr;

use chrono::{Duration, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Inclusive instance-count bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceBounds {
    pub min: u32,
    pub max: u32,
}

impl InstanceBounds {
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn contains(self, count: u32) -> bool {
        self.min <= count && count <= self.max
    }

    /// Clamps a proposed count into the bounds. Takes `i64` so negative
    /// adjustment arithmetic clamps up to `min` instead of wrapping.
    pub fn clamp(self, proposed: i64) -> u32 {
        proposed.clamp(i64::from(self.min), i64::from(self.max)) as u32
    }
}

impl fmt::Display for InstanceBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// A complete scaling policy for one application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingPolicy {
    #[serde(rename = "instance_min_count")]
    pub instance_min: u32,
    #[serde(rename = "instance_max_count")]
    pub instance_max: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scaling_rules: Vec<ScalingRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedules: Option<ScalingSchedules>,
}

impl ScalingPolicy {
    /// Baseline bounds that apply whenever no schedule is active.
    pub fn bounds(&self) -> InstanceBounds {
        InstanceBounds::new(self.instance_min, self.instance_max)
    }
}

/// One dynamic scaling rule: breach `threshold` per `operator` for
/// `breach_duration_secs`, then apply `adjustment`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingRule {
    pub metric_type: MetricType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stat_window_secs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breach_duration_secs: Option<u32>,
    pub threshold: i64,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cool_down_secs: Option<u32>,
    pub adjustment: Adjustment,
}

impl ScalingRule {
    pub fn stat_window(&self, defaults: &ScalingDefaults) -> Duration {
        secs_or(self.stat_window_secs, defaults.stat_window)
    }

    pub fn breach_duration(&self, defaults: &ScalingDefaults) -> Duration {
        secs_or(self.breach_duration_secs, defaults.breach_duration)
    }

    pub fn cool_down(&self, defaults: &ScalingDefaults) -> Duration {
        secs_or(self.cool_down_secs, defaults.cool_down)
    }
}

fn secs_or(value: Option<u32>, default: Duration) -> Duration {
    match value {
        Some(secs) if secs > 0 => Duration::seconds(i64::from(secs)),
        _ => default,
    }
}

/// Operator-supplied fallbacks for the optional rule durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalingDefaults {
    pub stat_window: Duration,
    pub breach_duration: Duration,
    pub cool_down: Duration,
}

impl Default for ScalingDefaults {
    fn default() -> Self {
        Self {
            stat_window: Duration::seconds(300),
            breach_duration: Duration::seconds(300),
            cool_down: Duration::seconds(300),
        }
    }
}

/// Metric a rule watches. Anything outside the built-in set is a custom
/// metric emitted by the app itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MetricType {
    MemoryUsed,
    MemoryUtil,
    ResponseTime,
    Throughput,
    Cpu,
    Custom(String),
}

impl MetricType {
    pub fn from_name(name: &str) -> Self {
        match name {
            "memoryused" => MetricType::MemoryUsed,
            "memoryutil" => MetricType::MemoryUtil,
            "responsetime" => MetricType::ResponseTime,
            "throughput" => MetricType::Throughput,
            "cpu" => MetricType::Cpu,
            other => MetricType::Custom(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MetricType::MemoryUsed => "memoryused",
            MetricType::MemoryUtil => "memoryutil",
            MetricType::ResponseTime => "responsetime",
            MetricType::Throughput => "throughput",
            MetricType::Cpu => "cpu",
            MetricType::Custom(name) => name,
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, MetricType::Custom(_))
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(MetricType::from_name(s))
    }
}

impl Serialize for MetricType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MetricType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(MetricType::from_name(&name))
    }
}

/// Comparison between a metric value and a rule threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<=")]
    LessThanOrEqual,
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
}

impl Operator {
    pub fn compare(self, value: f64, threshold: i64) -> bool {
        let threshold = threshold as f64;
        match self {
            Operator::LessThan => value < threshold,
            Operator::GreaterThan => value > threshold,
            Operator::LessThanOrEqual => value <= threshold,
            Operator::GreaterThanOrEqual => value >= threshold,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operator::LessThan => "<",
            Operator::GreaterThan => ">",
            Operator::LessThanOrEqual => "<=",
            Operator::GreaterThanOrEqual => ">=",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instance-count adjustment, written on the wire as `"+2"`, `"-1"`, or
/// `"+10%"`. The sign is mandatory and zero is not representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Adjustment {
    /// Absolute step in instances.
    Step(i32),
    /// Percentage of the current instance count.
    Percentage(i32),
}

impl Adjustment {
    /// Instance delta for the given current count. Percentages round half
    /// away from zero, so `+10%` of 5 instances is +1.
    pub fn delta(self, current: u32) -> i64 {
        match self {
            Adjustment::Step(n) => i64::from(n),
            Adjustment::Percentage(p) => {
                (f64::from(current) * f64::from(p) / 100.0).round() as i64
            }
        }
    }

    pub fn is_downscale(self) -> bool {
        match self {
            Adjustment::Step(n) => n < 0,
            Adjustment::Percentage(p) => p < 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid adjustment {0:?}: expected a signed step like \"-1\" or a percentage like \"+10%\"")]
pub struct ParseAdjustmentError(pub String);

impl FromStr for Adjustment {
    type Err = ParseAdjustmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseAdjustmentError(s.to_owned());
        let (body, percent) = match s.strip_suffix('%') {
            Some(body) => (body, true),
            None => (s, false),
        };
        let digits = body
            .strip_prefix(['+', '-'])
            .ok_or_else(err)?;
        // Leading zeros (and bare zero) are rejected, matching the wire
        // grammar `[-+][1-9][0-9]*%?`.
        if digits.is_empty() || digits.starts_with('0') || !digits.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(err());
        }
        let magnitude: i32 = digits.parse().map_err(|_| err())?;
        let signed = if body.starts_with('-') { -magnitude } else { magnitude };
        Ok(if percent {
            Adjustment::Percentage(signed)
        } else {
            Adjustment::Step(signed)
        })
    }
}

impl fmt::Display for Adjustment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Adjustment::Step(n) => write!(f, "{n:+}"),
            Adjustment::Percentage(p) => write!(f, "{p:+}%"),
        }
    }
}

impl Serialize for Adjustment {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Adjustment {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Schedule overrides attached to a policy. All wall-clock fields are
/// interpreted in `timezone` (an IANA name such as `Asia/Shanghai`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingSchedules {
    pub timezone: String,
    #[serde(rename = "recurring_schedule", default, skip_serializing_if = "Vec::is_empty")]
    pub recurring: Vec<RecurringSchedule>,
    #[serde(rename = "specific_date", default, skip_serializing_if = "Vec::is_empty")]
    pub specific_date: Vec<SpecificDateSchedule>,
}

impl ScalingSchedules {
    pub fn is_empty(&self) -> bool {
        self.recurring.is_empty() && self.specific_date.is_empty()
    }
}

/// A daily window repeated on selected weekdays or month days. Exactly one
/// of the day selectors must be present; the validator enforces this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringSchedule {
    #[serde(with = "hm_time")]
    pub start_time: NaiveTime,
    #[serde(with = "hm_time")]
    pub end_time: NaiveTime,
    /// ISO weekdays, 1 = Monday through 7 = Sunday.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_of_week: Option<Vec<u32>>,
    /// Calendar days, 1 through 31.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_of_month: Option<Vec<u32>>,
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

impl RecurringSchedule {
    pub fn bounds(&self) -> InstanceBounds {
        InstanceBounds::new(self.instance_min, self.instance_max)
    }
}

/// A one-off window between two local datetimes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecificDateSchedule {
    #[serde(with = "minute_stamp")]
    pub start_date_time: NaiveDateTime,
    #[serde(with = "minute_stamp")]
    pub end_date_time: NaiveDateTime,
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

impl SpecificDateSchedule {
    pub fn bounds(&self) -> InstanceBounds {
        InstanceBounds::new(self.instance_min, self.instance_max)
    }
}

/// `"HH:MM"` wall-clock times.
mod hm_time {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(t: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&t.format(FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&s, FORMAT).map_err(serde::de::Error::custom)
    }
}

/// `"YYYY-MM-DDTHH:MM"` local datetimes, minute precision.
mod minute_stamp {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M";

    pub fn serialize<S: Serializer>(t: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&t.format(FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<NaiveDateTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&s, FORMAT).map_err(serde::de::Error::custom)
    }
}
