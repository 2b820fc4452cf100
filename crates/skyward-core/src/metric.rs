//! Metric samples delivered by the upstream metrics pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AppId;
use crate::policy::MetricType;

/// One metric observation for an application.
///
/// Samples arrive pre-aggregated per app; `instance_index` records which
/// instance reported the underlying measurement and is carried for
/// diagnostics only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    #[serde(rename = "app_guid")]
    pub app_id: AppId,
    #[serde(rename = "name")]
    pub metric_type: MetricType,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Source timestamp, milliseconds since the Unix epoch on the wire.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub instance_index: u32,
}

impl MetricSample {
    pub fn new(
        app_id: impl Into<AppId>,
        metric_type: MetricType,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            metric_type,
            value,
            unit: None,
            timestamp,
            instance_index: 0,
        }
    }
}
