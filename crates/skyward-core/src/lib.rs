pub mod action;
pub mod metric;
pub mod policy;
pub mod redact;

pub use action::{ActionReason, ActiveSchedule, ScaleAction, ScaleIntent};
pub use metric::MetricSample;
pub use policy::*;
pub use redact::{CredentialRedacter, Redact};

/// Application identifier, opaque to the decision core (a GUID in most
/// hosting platforms).
pub type AppId = String;
