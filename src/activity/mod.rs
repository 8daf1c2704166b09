//! Background activity history: what the user worked on and how the machine behaved.

pub mod changelog;
pub mod health;

pub use changelog::{ChangeLog, CommitRecord, FileAction, FileChange};
pub use health::{HealthJournal, HealthSample, HealthSummary, SystemEvent};
