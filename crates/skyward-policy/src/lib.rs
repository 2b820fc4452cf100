pub mod error;
pub mod overlap;
pub mod validator;

pub use error::{PolicyError, PolicyResult, Violation};
pub use validator::PolicyValidator;
