use skyward_core::policy::MetricType;
use thiserror::Error;

pub type EvaluationResult<T> = Result<T, EvaluationError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    /// NaN or infinite metric value. The sample is dropped and the window
    /// stays as it was.
    #[error("non-finite value {value} for metric {metric}")]
    NonFiniteValue { metric: MetricType, value: f64 },
}
