pub mod error;
pub mod evaluator;
pub mod set;

pub use error::{EvaluationError, EvaluationResult};
pub use evaluator::{BreachRule, TriggerState};
pub use set::TriggerSet;
