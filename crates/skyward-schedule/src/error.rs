use thiserror::Error;

pub type ScheduleResult<T> = Result<T, ScheduleError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// The policy names a timezone the IANA database does not know.
    /// Validation rejects these, so hitting this at resolve time means the
    /// stored policy predates the current tzdb.
    #[error("unknown timezone {name:?}")]
    UnknownTimezone { name: String },
}

impl ScheduleError {
    pub fn unknown_timezone(name: impl Into<String>) -> Self {
        ScheduleError::UnknownTimezone { name: name.into() }
    }
}
