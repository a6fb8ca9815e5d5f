//! Activity trail of onboarding operations.

pub mod log;
pub mod model;

pub use log::ActivityLog;
pub use model::{ActivityAction, ActivityOutcome, ActivityRecord, NewActivity};
