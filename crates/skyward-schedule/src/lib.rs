pub mod calendar;
pub mod error;
pub mod resolver;

pub use calendar::Occurrence;
pub use error::{ScheduleError, ScheduleResult};
pub use resolver::{until, ScheduleResolver, ScheduleSnapshot};
