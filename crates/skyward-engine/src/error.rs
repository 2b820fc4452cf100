use skyward_state::StateError;
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    State(#[from] StateError),

    /// Active-schedule writes kept conflicting after bounded retries.
    /// The worker logs this and tries again at the next wake.
    #[error("persistence conflict on active schedule for {app_id} after {attempts} attempts")]
    PersistenceConflict { app_id: String, attempts: u32 },

    #[error("no policy deployed for {app_id}")]
    UnknownApp { app_id: String },
}
