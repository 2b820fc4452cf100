//! Scaling decision engine.
//!
//! Ties the decision core together: one worker task per application
//! folds schedule boundaries, metric samples, and live policy updates
//! into scale actions. Schedule transitions and emitted actions are
//! persisted through `skyward-state`; all platform I/O goes through
//! injected callbacks. The decision itself is a pure function in
//! [`combiner`].

pub mod combiner;
pub mod engine;
pub mod error;
mod worker;

pub use combiner::{combine, DecisionInputs};
pub use engine::{ActionSink, EngineConfig, InstanceLookup, ScalingEngine};
pub use error::{EngineError, EngineResult};
