use std::fmt;

use thiserror::Error;

pub type PolicyResult<T> = Result<T, PolicyError>;

/// One rejected aspect of a policy document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// JSON pointer into the document, `/` for the root.
    pub path: String,
    pub message: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        let mut path = path.into();
        if path.is_empty() {
            path.push('/');
        }
        Self { path, message: message.into() }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Validation failure. Each variant carries every violation found, not
/// just the first, so a submitter can fix the document in one pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("policy rejected by schema: {}", format_violations(.0))]
    Schema(Vec<Violation>),
    #[error("policy failed semantic validation: {}", format_violations(.0))]
    Semantic(Vec<Violation>),
}

impl PolicyError {
    pub fn violations(&self) -> &[Violation] {
        match self {
            PolicyError::Schema(v) | PolicyError::Semantic(v) => v,
        }
    }
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(Violation::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
